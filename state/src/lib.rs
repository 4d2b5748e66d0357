//! Mosaic State Persistence
//!
//! Stores snapshots of cores and committees, plus the keyed views external
//! components address state by: validator ranges, kernel hashes, vote counts
//! and committee positions.

pub mod store;
pub mod memory;
pub mod persistent;
pub mod snapshot;

pub use store::*;
pub use memory::*;
pub use persistent::*;
pub use snapshot::*;
