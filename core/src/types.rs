//! Core types for Mosaic
//!
//! Defines the fundamental data structures shared by the core and committee
//! state machines.

use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use std::fmt;

/// Height of the origin/auxiliary chain as seen by the calling environment
pub type BlockHeight = u64;

/// Generation counter of successive metablock proposals
pub type Dynasty = u64;

/// Gas amount
pub type Gas = u64;

/// 32-byte account address derived from a public key hash
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(#[serde_as(as = "Hex")] pub [u8; 32]);

impl Address {
    /// The null address
    pub const ZERO: Address = Address([0u8; 32]);

    /// Reserved address that can never be a validator or member
    pub const SENTINEL: Address = {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        Address(bytes)
    };

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Null or sentinel
    pub fn is_reserved(&self) -> bool {
        self.is_zero() || *self == Self::SENTINEL
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        decode_fixed(s).map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", self.to_hex())
    }
}

/// 32-byte hash type
///
/// Ordering is that of the big-endian unsigned integer the bytes encode,
/// which is what the sortition distance comparisons rely on.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash(#[serde_as(as = "Hex")] pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);
    pub const MAX: Hash = Hash([0xffu8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Bitwise XOR of two hashes
    pub fn xor(&self, other: &Hash) -> Hash {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Hash(out)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        decode_fixed(s).map(Hash)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(0x{})", self.to_hex())
    }
}

/// A committee position (the value members commit to and reveal)
pub type Position = Hash;

/// Sortition distance of an account to a committee proposal
pub type Distance = Hash;

/// 64-byte signature
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde_as(as = "Hex")] pub [u8; 64]);

impl Signature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        decode_fixed(s).map(Signature)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{}...)", &self.to_hex()[..16])
    }
}

/// 32-byte public key
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde_as(as = "Hex")] pub [u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        decode_fixed(s).map(PublicKey)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{})", self.to_hex())
    }
}

/// Detached vote signature
///
/// Ed25519 has no public-key recovery, so the signer's key travels with the
/// signature and the signer address is derived from it after verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSignature {
    pub public_key: PublicKey,
    pub signature: Signature,
}

/// Ambient information of a single state-mutating call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Identity of the caller, as authenticated by the host
    pub caller: Address,
    /// Current height of the totally ordered environment
    pub block_height: BlockHeight,
}

impl CallContext {
    pub fn new(caller: Address, block_height: BlockHeight) -> Self {
        Self { caller, block_height }
    }
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], hex::FromHexError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != N {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
