//! Mosaic Core Library
//!
//! Core types, traits, and abstractions shared by the Mosaic metachain crates:
//! the validator-voting core, the sortition committee, and their hosts.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
