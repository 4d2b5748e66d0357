//! Persistent snapshot store using sled database

use async_trait::async_trait;
use mosaic_committee::CommitteeState;
use mosaic_consensus::{CoreState, ValidatorRecord, VoteCount};
use mosaic_core::{Address, BlockHeight, Hash, MosaicError, MosaicResult, Position};
use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

use crate::snapshot::Snapshot;
use crate::store::{
    committee_positions, committee_snapshot_key, core_snapshot_key, decode_hash, kernel_key,
    parse_committee_snapshot_key, position_key, validator_key, vote_count_key, CoreIndex,
    SnapshotStore,
};

const SNAPSHOTS_TREE: &str = "snapshots";
const VALIDATORS_TREE: &str = "validators";
const KERNELS_TREE: &str = "kernels";
const VOTE_COUNTS_TREE: &str = "vote_counts";
const POSITIONS_TREE: &str = "positions";

/// Persistent snapshot store backed by sled database
pub struct PersistentSnapshotStore {
    db: Db,
    snapshots: Tree,
    validators: Tree,
    kernels: Tree,
    vote_counts: Tree,
    positions: Tree,
}

fn storage_error(e: sled::Error) -> MosaicError {
    MosaicError::StorageError(e.to_string())
}

impl PersistentSnapshotStore {
    pub fn open<P: AsRef<Path>>(path: P) -> MosaicResult<Self> {
        let db = sled::open(path).map_err(storage_error)?;
        let snapshots = db.open_tree(SNAPSHOTS_TREE).map_err(storage_error)?;
        let validators = db.open_tree(VALIDATORS_TREE).map_err(storage_error)?;
        let kernels = db.open_tree(KERNELS_TREE).map_err(storage_error)?;
        let vote_counts = db.open_tree(VOTE_COUNTS_TREE).map_err(storage_error)?;
        let positions = db.open_tree(POSITIONS_TREE).map_err(storage_error)?;

        Ok(Self {
            db,
            snapshots,
            validators,
            kernels,
            vote_counts,
            positions,
        })
    }

    fn write_batch(tree: &Tree, entries: Vec<(Vec<u8>, Vec<u8>)>) -> MosaicResult<()> {
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            batch.insert(key, value);
        }
        tree.apply_batch(batch).map_err(storage_error)
    }

    fn get(tree: &Tree, key: &[u8]) -> MosaicResult<Option<Vec<u8>>> {
        tree.get(key)
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(storage_error)
    }

    /// Flush to disk
    fn flush(&self) -> MosaicResult<()> {
        self.db.flush().map_err(storage_error)?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PersistentSnapshotStore {
    async fn save_core(&self, state: &CoreState) -> MosaicResult<()> {
        let index = CoreIndex::build(state)?;
        let snapshot = Snapshot::seal(state)?;

        Self::write_batch(&self.validators, index.validators)?;
        Self::write_batch(&self.kernels, index.kernels)?;
        Self::write_batch(&self.vote_counts, index.vote_counts)?;
        // Snapshot last, so a stored snapshot always has its views
        self.snapshots
            .insert(core_snapshot_key(&state.core_id()), snapshot.to_bytes()?)
            .map_err(storage_error)?;
        self.flush()?;

        debug!(
            "Saved core {} at kernel height {}",
            state.core_id(),
            state.open_kernel_height()
        );
        Ok(())
    }

    async fn load_core(&self, core_id: &Address) -> MosaicResult<Option<CoreState>> {
        match Self::get(&self.snapshots, &core_snapshot_key(core_id))? {
            Some(bytes) => Ok(Some(Snapshot::from_bytes(&bytes)?.open()?)),
            None => Ok(None),
        }
    }

    async fn save_committee(&self, state: &CommitteeState) -> MosaicResult<()> {
        let snapshot = Snapshot::seal(state)?;
        Self::write_batch(&self.positions, committee_positions(state))?;
        self.snapshots
            .insert(committee_snapshot_key(&state.proposal()), snapshot.to_bytes()?)
            .map_err(storage_error)?;
        self.flush()?;

        debug!("Saved committee {}", state.proposal());
        Ok(())
    }

    async fn load_committee(&self, proposal: &Hash) -> MosaicResult<Option<CommitteeState>> {
        match Self::get(&self.snapshots, &committee_snapshot_key(proposal))? {
            Some(bytes) => Ok(Some(Snapshot::from_bytes(&bytes)?.open()?)),
            None => Ok(None),
        }
    }

    async fn committees(&self) -> MosaicResult<Vec<Hash>> {
        let mut proposals = Vec::new();
        for result in self.snapshots.iter() {
            let (key, _) = result.map_err(storage_error)?;
            if let Some(proposal) = parse_committee_snapshot_key(&key) {
                proposals.push(proposal);
            }
        }
        Ok(proposals)
    }

    async fn validator_range(
        &self,
        core_id: &Address,
        validator: &Address,
    ) -> MosaicResult<Option<ValidatorRecord>> {
        match Self::get(&self.validators, &validator_key(core_id, validator))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn kernel_hash(
        &self,
        core_id: &Address,
        height: BlockHeight,
    ) -> MosaicResult<Option<Hash>> {
        Self::get(&self.kernels, &kernel_key(core_id, height))?
            .map(|bytes| decode_hash(&bytes))
            .transpose()
    }

    async fn vote_count(
        &self,
        core_id: &Address,
        proposal: &Hash,
    ) -> MosaicResult<Option<VoteCount>> {
        match Self::get(&self.vote_counts, &vote_count_key(core_id, proposal))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn committee_position(
        &self,
        committee: &Hash,
        member: &Address,
    ) -> MosaicResult<Option<Position>> {
        Self::get(&self.positions, &position_key(committee, member))?
            .map(|bytes| decode_hash(&bytes))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_consensus::{Core, Metablock, MemoryReputation};
    use mosaic_core::{CallContext, CoreConfig, CoreGenesis};
    use mosaic_crypto::keys::KeyPair;
    use mosaic_crypto::signing::sign_vote;
    use std::sync::Arc;
    use tempfile::TempDir;

    const ORCHESTRATOR: Address = Address([0xaa; 32]);
    const CORE_ID: Address = Address([2u8; 32]);

    fn voting_core() -> (Core, Hash, Vec<KeyPair>) {
        let reputation = Arc::new(MemoryReputation::new());
        let config = CoreConfig {
            orchestrator: ORCHESTRATOR,
            metachain_id: Hash([1u8; 32]),
            core_id: CORE_ID,
            ..Default::default()
        };
        let mut core = Core::new(config, CoreGenesis::default(), reputation.clone()).unwrap();
        let keys: Vec<KeyPair> = (1..=5u8).map(|n| KeyPair::from_seed(&[n; 32])).collect();
        for key in &keys {
            reputation.set(key.address(), 1);
            core.join_before_open(&CallContext::new(ORCHESTRATOR, 0), key.address())
                .unwrap();
        }
        let metablock = Metablock {
            kernel_hash: core.open_kernel_hash(),
            origin_observation: Hash([3u8; 32]),
            dynasty: 1,
            accumulated_gas: 10,
            committee_lock: Hash([4u8; 32]),
            source: Hash([5u8; 32]),
            target: Hash([6u8; 32]),
            source_block_height: 100,
            target_block_height: 200,
        };
        let proposal = core.propose_metablock(&metablock).unwrap();
        let signature = sign_vote(&keys[0], &proposal);
        core.register_vote(&CallContext::new(ORCHESTRATOR, 1), proposal, &signature)
            .unwrap();
        (core, proposal, keys)
    }

    #[tokio::test]
    async fn test_persistent_store_basic() {
        let dir = TempDir::new().unwrap();
        let store = PersistentSnapshotStore::open(dir.path()).unwrap();
        let (core, proposal, keys) = voting_core();

        store.save_core(&core.snapshot()).await.unwrap();

        let count = store.vote_count(&CORE_ID, &proposal).await.unwrap().unwrap();
        assert_eq!(count.count, 1);
        assert_eq!(count.dynasty, 1);
        let record = store
            .validator_range(&CORE_ID, &keys[4].address())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.address, keys[4].address());
    }

    #[tokio::test]
    async fn test_persistent_store_reopen() {
        let dir = TempDir::new().unwrap();
        let (core, proposal, _) = voting_core();

        {
            let store = PersistentSnapshotStore::open(dir.path()).unwrap();
            store.save_core(&core.snapshot()).await.unwrap();
        }

        let store = PersistentSnapshotStore::open(dir.path()).unwrap();
        let state = store.load_core(&CORE_ID).await.unwrap().unwrap();
        let restored = Core::restore(state, Arc::new(MemoryReputation::new())).unwrap();
        assert_eq!(restored.vote_count(&proposal).unwrap().count, 1);
        assert_eq!(
            store.kernel_hash(&CORE_ID, 0).await.unwrap(),
            Some(core.open_kernel_hash())
        );
    }
}
