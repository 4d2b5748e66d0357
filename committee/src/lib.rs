//! Mosaic Committee
//!
//! A bounded committee is selected by sortition distance to a proposal and
//! then decides on a position through a sealed commit-reveal vote.

pub mod committee;
pub mod members;
pub mod tally;

pub use committee::*;
pub use members::*;
pub use tally::*;
