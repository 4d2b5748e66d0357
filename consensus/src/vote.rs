//! Vote bookkeeping for metablock proposals

use mosaic_core::{Address, BlockHeight, Dynasty, Hash, MosaicError, MosaicResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tally of one registered proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCount {
    /// Kernel height the proposal was registered at
    pub height: BlockHeight,
    pub dynasty: Dynasty,
    pub count: u64,
}

/// Registered proposals and the latest vote of every validator
///
/// A validator holds at most one vote. Recasting moves it to a proposal of
/// strictly higher dynasty, which is what makes replaying an old signature
/// impossible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteBook {
    counts: HashMap<Hash, VoteCount>,
    votes: HashMap<Address, Hash>,
}

impl VoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a proposal with an empty tally
    pub fn register(
        &mut self,
        proposal: Hash,
        height: BlockHeight,
        dynasty: Dynasty,
    ) -> MosaicResult<()> {
        if self.counts.contains_key(&proposal) {
            return Err(MosaicError::Idempotency(format!(
                "Proposal {} is already registered",
                proposal
            )));
        }
        self.counts.insert(
            proposal,
            VoteCount {
                height,
                dynasty,
                count: 0,
            },
        );
        Ok(())
    }

    pub fn get(&self, proposal: &Hash) -> Option<&VoteCount> {
        self.counts.get(proposal)
    }

    /// Proposal `validator` currently votes for
    pub fn vote_of(&self, validator: &Address) -> Option<Hash> {
        self.votes.get(validator).copied()
    }

    /// All registered proposals
    pub fn iter(&self) -> impl Iterator<Item = (&Hash, &VoteCount)> {
        self.counts.iter()
    }

    /// Move the vote of `validator` to `proposal`, returning the new count
    ///
    /// The previous vote is only subtracted when it was registered at
    /// `open_height`; tallies of older heights stay frozen.
    pub fn cast(
        &mut self,
        validator: Address,
        proposal: Hash,
        open_height: BlockHeight,
    ) -> MosaicResult<u64> {
        let target = *self.counts.get(&proposal).ok_or_else(|| {
            MosaicError::InvariantViolation(format!("Proposal {} is not registered", proposal))
        })?;

        let previous = self.vote_of(&validator);
        if let Some(previous) = previous {
            if previous == proposal {
                return Err(MosaicError::Idempotency(format!(
                    "Validator {} has already voted for {}",
                    validator, proposal
                )));
            }
            let previous_dynasty = self.counts.get(&previous).map(|c| c.dynasty).unwrap_or(0);
            if target.dynasty <= previous_dynasty {
                return Err(MosaicError::InvariantViolation(format!(
                    "Vote can only be recast for a higher dynasty than {}",
                    previous_dynasty
                )));
            }
        }

        if let Some(previous) = previous {
            if let Some(count) = self.counts.get_mut(&previous) {
                if count.height == open_height {
                    count.count = count.count.saturating_sub(1);
                }
            }
        }

        self.votes.insert(validator, proposal);
        let count = self
            .counts
            .get_mut(&proposal)
            .ok_or_else(|| MosaicError::Internal("registered proposal vanished".into()))?;
        count.count += 1;
        Ok(count.count)
    }

    /// Drop the vote of `validator`, returning the proposal it was for
    pub fn withdraw(&mut self, validator: &Address, open_height: BlockHeight) -> Option<Hash> {
        let proposal = self.votes.remove(validator)?;
        if let Some(count) = self.counts.get_mut(&proposal) {
            if count.height == open_height {
                count.count = count.count.saturating_sub(1);
            }
        }
        Some(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(n: u8) -> Address {
        Address([n; 32])
    }

    #[test]
    fn test_register_twice_fails() {
        let mut book = VoteBook::new();
        let proposal = Hash([1u8; 32]);
        book.register(proposal, 0, 1).unwrap();
        assert!(matches!(
            book.register(proposal, 0, 1),
            Err(MosaicError::Idempotency(_))
        ));
    }

    #[test]
    fn test_cast_counts() {
        let mut book = VoteBook::new();
        let proposal = Hash([1u8; 32]);
        book.register(proposal, 0, 1).unwrap();

        assert_eq!(book.cast(validator(1), proposal, 0).unwrap(), 1);
        assert_eq!(book.cast(validator(2), proposal, 0).unwrap(), 2);
        assert!(matches!(
            book.cast(validator(1), proposal, 0),
            Err(MosaicError::Idempotency(_))
        ));
        assert_eq!(book.get(&proposal).unwrap().count, 2);
    }

    #[test]
    fn test_recast_requires_higher_dynasty() {
        let mut book = VoteBook::new();
        let first = Hash([1u8; 32]);
        let same = Hash([2u8; 32]);
        let higher = Hash([3u8; 32]);
        book.register(first, 0, 2).unwrap();
        book.register(same, 0, 2).unwrap();
        book.register(higher, 0, 3).unwrap();

        book.cast(validator(1), first, 0).unwrap();
        assert!(matches!(
            book.cast(validator(1), same, 0),
            Err(MosaicError::InvariantViolation(_))
        ));

        assert_eq!(book.cast(validator(1), higher, 0).unwrap(), 1);
        assert_eq!(book.get(&first).unwrap().count, 0);
        assert_eq!(book.vote_of(&validator(1)), Some(higher));
    }

    #[test]
    fn test_old_height_tally_is_frozen() {
        let mut book = VoteBook::new();
        let old = Hash([1u8; 32]);
        let new = Hash([2u8; 32]);
        book.register(old, 0, 1).unwrap();
        book.cast(validator(1), old, 0).unwrap();

        book.register(new, 1, 2).unwrap();
        book.cast(validator(1), new, 1).unwrap();
        assert_eq!(book.get(&old).unwrap().count, 1);
        assert_eq!(book.get(&new).unwrap().count, 1);
    }

    #[test]
    fn test_withdraw() {
        let mut book = VoteBook::new();
        let proposal = Hash([1u8; 32]);
        book.register(proposal, 0, 1).unwrap();
        book.cast(validator(1), proposal, 0).unwrap();

        assert_eq!(book.withdraw(&validator(1), 0), Some(proposal));
        assert_eq!(book.get(&proposal).unwrap().count, 0);
        assert_eq!(book.withdraw(&validator(1), 0), None);
    }
}
