//! Snapshot store trait and key layout
//!
//! Keyed views are written alongside every snapshot so that external
//! components can read them without decoding a whole state:
//! - `validators`: `core_id ‖ address` -> latest `ValidatorRecord`
//! - `kernels`: `core_id ‖ height (BE)` -> kernel hash
//! - `vote_counts`: `core_id ‖ proposal` -> `VoteCount`
//! - `positions`: `committee proposal ‖ member` -> revealed position

use async_trait::async_trait;
use mosaic_committee::CommitteeState;
use mosaic_consensus::{CoreState, ValidatorRecord, VoteCount};
use mosaic_core::{Address, BlockHeight, Hash, MosaicResult, Position};

/// Persistence of core and committee state
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Save a core snapshot and refresh its keyed views
    async fn save_core(&self, state: &CoreState) -> MosaicResult<()>;

    async fn load_core(&self, core_id: &Address) -> MosaicResult<Option<CoreState>>;

    /// Save a committee snapshot, keyed by its proposal
    async fn save_committee(&self, state: &CommitteeState) -> MosaicResult<()>;

    async fn load_committee(&self, proposal: &Hash) -> MosaicResult<Option<CommitteeState>>;

    /// Proposals of all stored committees
    async fn committees(&self) -> MosaicResult<Vec<Hash>>;

    async fn validator_range(
        &self,
        core_id: &Address,
        validator: &Address,
    ) -> MosaicResult<Option<ValidatorRecord>>;

    async fn kernel_hash(&self, core_id: &Address, height: BlockHeight)
        -> MosaicResult<Option<Hash>>;

    async fn vote_count(&self, core_id: &Address, proposal: &Hash)
        -> MosaicResult<Option<VoteCount>>;

    async fn committee_position(
        &self,
        committee: &Hash,
        member: &Address,
    ) -> MosaicResult<Option<Position>>;
}

/// Key prefix for core snapshots
const CORE_PREFIX: &[u8] = b"core:";
/// Key prefix for committee snapshots
const COMMITTEE_PREFIX: &[u8] = b"committee:";

pub fn core_snapshot_key(core_id: &Address) -> Vec<u8> {
    let mut key = CORE_PREFIX.to_vec();
    key.extend_from_slice(core_id.as_bytes());
    key
}

pub fn committee_snapshot_key(proposal: &Hash) -> Vec<u8> {
    let mut key = COMMITTEE_PREFIX.to_vec();
    key.extend_from_slice(proposal.as_bytes());
    key
}

/// Parse a committee snapshot key
pub fn parse_committee_snapshot_key(key: &[u8]) -> Option<Hash> {
    let rest = key.strip_prefix(COMMITTEE_PREFIX)?;
    let bytes: [u8; 32] = rest.try_into().ok()?;
    Some(Hash::from_bytes(bytes))
}

pub fn validator_key(core_id: &Address, validator: &Address) -> Vec<u8> {
    pair_key(core_id.as_bytes(), validator.as_bytes())
}

/// Heights are big-endian so keys sort by height
pub fn kernel_key(core_id: &Address, height: BlockHeight) -> Vec<u8> {
    pair_key(core_id.as_bytes(), &height.to_be_bytes())
}

pub fn vote_count_key(core_id: &Address, proposal: &Hash) -> Vec<u8> {
    pair_key(core_id.as_bytes(), proposal.as_bytes())
}

pub fn position_key(committee: &Hash, member: &Address) -> Vec<u8> {
    pair_key(committee.as_bytes(), member.as_bytes())
}

fn pair_key(first: &[u8], second: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(first.len() + second.len());
    key.extend_from_slice(first);
    key.extend_from_slice(second);
    key
}

/// Encoded keyed views of a core
#[derive(Debug, Default)]
pub struct CoreIndex {
    pub validators: Vec<(Vec<u8>, Vec<u8>)>,
    pub kernels: Vec<(Vec<u8>, Vec<u8>)>,
    pub vote_counts: Vec<(Vec<u8>, Vec<u8>)>,
}

impl CoreIndex {
    pub fn build(state: &CoreState) -> MosaicResult<Self> {
        let core_id = state.core_id();
        let mut index = Self::default();

        for record in state.validator_records() {
            index.validators.push((
                validator_key(&core_id, &record.address),
                bincode::serialize(&record)?,
            ));
        }
        for (height, kernel_hash) in state.kernel_hashes() {
            index
                .kernels
                .push((kernel_key(&core_id, *height), kernel_hash.as_bytes().to_vec()));
        }
        for (proposal, count) in state.vote_counts() {
            index
                .vote_counts
                .push((vote_count_key(&core_id, proposal), bincode::serialize(count)?));
        }
        Ok(index)
    }
}

/// Encoded revealed positions of a committee
pub fn committee_positions(state: &CommitteeState) -> Vec<(Vec<u8>, Vec<u8>)> {
    let proposal = state.proposal();
    state
        .positions()
        .iter()
        .map(|(member, position)| {
            (
                position_key(&proposal, member),
                position.as_bytes().to_vec(),
            )
        })
        .collect()
}

/// Decode a stored 32-byte hash value
pub fn decode_hash(bytes: &[u8]) -> MosaicResult<Hash> {
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
        mosaic_core::MosaicError::DeserializationError("expected a 32-byte hash".into())
    })?;
    Ok(Hash::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_keys_sort_by_height() {
        let core = Address([1u8; 32]);
        assert!(kernel_key(&core, 1) < kernel_key(&core, 2));
        assert!(kernel_key(&core, 255) < kernel_key(&core, 256));
    }

    #[test]
    fn test_committee_key() {
        let proposal = Hash([9u8; 32]);
        let key = committee_snapshot_key(&proposal);
        assert_eq!(parse_committee_snapshot_key(&key), Some(proposal));
        assert_eq!(parse_committee_snapshot_key(&core_snapshot_key(&Address([9u8; 32]))), None);
    }

    #[test]
    fn test_decode_hash() {
        assert_eq!(decode_hash(&[3u8; 32]).unwrap(), Hash([3u8; 32]));
        assert!(decode_hash(&[3u8; 31]).is_err());
    }
}
