//! In-memory snapshot store for testing and ephemeral nodes

use async_trait::async_trait;
use dashmap::DashMap;
use mosaic_committee::CommitteeState;
use mosaic_consensus::{CoreState, ValidatorRecord, VoteCount};
use mosaic_core::{Address, BlockHeight, Hash, MosaicResult, Position};

use crate::snapshot::Snapshot;
use crate::store::{
    committee_positions, committee_snapshot_key, core_snapshot_key, decode_hash, kernel_key,
    parse_committee_snapshot_key, position_key, validator_key, vote_count_key, CoreIndex,
    SnapshotStore,
};

type Tree = DashMap<Vec<u8>, Vec<u8>>;

/// In-memory snapshot store
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Tree,
    validators: Tree,
    kernels: Tree,
    vote_counts: Tree,
    positions: Tree,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put_all(tree: &Tree, entries: Vec<(Vec<u8>, Vec<u8>)>) {
        for (key, value) in entries {
            tree.insert(key, value);
        }
    }

    fn get(tree: &Tree, key: &[u8]) -> Option<Vec<u8>> {
        tree.get(key).map(|v| v.value().clone())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save_core(&self, state: &CoreState) -> MosaicResult<()> {
        let index = CoreIndex::build(state)?;
        let snapshot = Snapshot::seal(state)?;

        Self::put_all(&self.validators, index.validators);
        Self::put_all(&self.kernels, index.kernels);
        Self::put_all(&self.vote_counts, index.vote_counts);
        self.snapshots
            .insert(core_snapshot_key(&state.core_id()), snapshot.to_bytes()?);
        Ok(())
    }

    async fn load_core(&self, core_id: &Address) -> MosaicResult<Option<CoreState>> {
        match Self::get(&self.snapshots, &core_snapshot_key(core_id)) {
            Some(bytes) => Ok(Some(Snapshot::from_bytes(&bytes)?.open()?)),
            None => Ok(None),
        }
    }

    async fn save_committee(&self, state: &CommitteeState) -> MosaicResult<()> {
        let snapshot = Snapshot::seal(state)?;
        Self::put_all(&self.positions, committee_positions(state));
        self.snapshots
            .insert(committee_snapshot_key(&state.proposal()), snapshot.to_bytes()?);
        Ok(())
    }

    async fn load_committee(&self, proposal: &Hash) -> MosaicResult<Option<CommitteeState>> {
        match Self::get(&self.snapshots, &committee_snapshot_key(proposal)) {
            Some(bytes) => Ok(Some(Snapshot::from_bytes(&bytes)?.open()?)),
            None => Ok(None),
        }
    }

    async fn committees(&self) -> MosaicResult<Vec<Hash>> {
        let mut proposals: Vec<Hash> = self
            .snapshots
            .iter()
            .filter_map(|entry| parse_committee_snapshot_key(entry.key()))
            .collect();
        proposals.sort();
        Ok(proposals)
    }

    async fn validator_range(
        &self,
        core_id: &Address,
        validator: &Address,
    ) -> MosaicResult<Option<ValidatorRecord>> {
        match Self::get(&self.validators, &validator_key(core_id, validator)) {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn kernel_hash(
        &self,
        core_id: &Address,
        height: BlockHeight,
    ) -> MosaicResult<Option<Hash>> {
        Self::get(&self.kernels, &kernel_key(core_id, height))
            .map(|bytes| decode_hash(&bytes))
            .transpose()
    }

    async fn vote_count(
        &self,
        core_id: &Address,
        proposal: &Hash,
    ) -> MosaicResult<Option<VoteCount>> {
        match Self::get(&self.vote_counts, &vote_count_key(core_id, proposal)) {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn committee_position(
        &self,
        committee: &Hash,
        member: &Address,
    ) -> MosaicResult<Option<Position>> {
        Self::get(&self.positions, &position_key(committee, member))
            .map(|bytes| decode_hash(&bytes))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_committee::Committee;
    use mosaic_consensus::{Core, MemoryReputation};
    use mosaic_core::{CallContext, CommitteeConfig, CoreConfig, CoreGenesis};
    use std::sync::Arc;

    const ORCHESTRATOR: Address = Address([0xaa; 32]);

    fn core() -> Core {
        let config = CoreConfig {
            orchestrator: ORCHESTRATOR,
            metachain_id: Hash([1u8; 32]),
            core_id: Address([2u8; 32]),
            ..Default::default()
        };
        let mut core = Core::new(
            config,
            CoreGenesis::default(),
            Arc::new(MemoryReputation::new()),
        )
        .unwrap();
        for n in 10..15u8 {
            core.join_before_open(&CallContext::new(ORCHESTRATOR, 0), Address([n; 32]))
                .unwrap();
        }
        core
    }

    #[tokio::test]
    async fn test_core_roundtrip_and_views() {
        let store = MemorySnapshotStore::new();
        let core = core();
        store.save_core(&core.snapshot()).await.unwrap();

        let loaded = store.load_core(&Address([2u8; 32])).await.unwrap().unwrap();
        assert_eq!(loaded.status(), core.status());
        assert!(store.load_core(&Address([3u8; 32])).await.unwrap().is_none());

        let record = store
            .validator_range(&Address([2u8; 32]), &Address([10u8; 32]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.begin_height, 0);
        assert!(!record.is_retired());

        assert_eq!(
            store.kernel_hash(&Address([2u8; 32]), 0).await.unwrap(),
            Some(core.open_kernel_hash())
        );
        assert_eq!(store.kernel_hash(&Address([2u8; 32]), 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_committee_roundtrip() {
        let store = MemorySnapshotStore::new();
        let config = CommitteeConfig {
            orchestrator: ORCHESTRATOR,
            committee_size: 3,
            dislocation: Hash([5u8; 32]),
            proposal: Hash([6u8; 32]),
            ..Default::default()
        };
        let committee = Committee::new(config).unwrap();
        store.save_committee(&committee.snapshot()).await.unwrap();

        assert_eq!(store.committees().await.unwrap(), vec![Hash([6u8; 32])]);
        let loaded = store.load_committee(&Hash([6u8; 32])).await.unwrap().unwrap();
        assert_eq!(loaded.status(), committee.status());
        assert_eq!(
            store
                .committee_position(&Hash([6u8; 32]), &Address([1u8; 32]))
                .await
                .unwrap(),
            None
        );
    }
}
