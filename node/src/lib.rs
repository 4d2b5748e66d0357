//! Mosaic Node Implementation
//!
//! Hosts one validator-voting core and the committees formed for it:
//! - Orchestrator runtime and snapshot persistence
//! - HTTP API

mod api;
mod node;
mod runtime;

pub use api::*;
pub use node::*;
pub use runtime::*;
