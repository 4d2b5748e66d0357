//! Mosaic Cryptography Module
//!
//! Provides the primitives the state machines are built on:
//! - Ed25519 for vote signatures
//! - BLAKE3 for typed hashing, sortition distance and sealed commits
//! - HKDF for deterministic validator key derivation

pub mod keys;
pub mod signing;
pub mod hashing;
pub mod derivation;
pub mod commitment;

pub use keys::*;
pub use signing::*;
pub use hashing::*;
pub use derivation::*;
pub use commitment::*;
