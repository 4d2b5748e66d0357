//! Core traits defining Mosaic interfaces
//!
//! These are the seams between the state machines and their collaborators:
//! the external reputation registry and the hash primitives behind
//! sortition and sealed commits.

use crate::types::*;

/// Result type for Mosaic operations
pub type MosaicResult<T> = Result<T, crate::error::MosaicError>;

/// External registry of validator weight and standing
pub trait Reputation: Send + Sync {
    /// True while the validator holds non-zero reputation and has not been slashed
    fn is_active_and_honest(&self, validator: &Address) -> bool;
}

/// Hash commitment used by the committee's commit-reveal vote
pub trait Commitment: Send + Sync {
    /// Seal a position with a salt on behalf of a sender
    fn seal(&self, position: &Position, salt: &Hash, sender: &Address) -> Hash;

    /// Check that (position, salt, sender) opens a sealed commit
    fn reveal(&self, sealed: &Hash, position: &Position, salt: &Hash, sender: &Address) -> bool {
        self.seal(position, salt, sender) == *sealed
    }
}

/// Metric ranking accounts by closeness to a committee proposal
pub trait Sortition: Send + Sync {
    /// Smaller is closer
    fn distance(&self, account: &Address, dislocation: &Hash, proposal: &Hash) -> Distance;
}
