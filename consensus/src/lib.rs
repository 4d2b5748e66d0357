//! Mosaic Core Engine
//!
//! Implements the validator-voting core of a metachain:
//! - Height-ranged validator membership
//! - Signed votes on metablock proposals
//! - Super-majority precommit and kernel opening

pub mod engine;
pub mod kernel;
pub mod reputation;
pub mod validator_set;
pub mod vote;

pub use engine::*;
pub use kernel::*;
pub use reputation::*;
pub use validator_set::*;
pub use vote::*;
