//! Validator keys and addresses
//!
//! A validator signs votes and committee actions with an Ed25519 key. Its
//! address is the BLAKE3 hash of the public key, and the two reserved
//! addresses (null and sentinel) can never belong to a signer.

use ed25519_dalek::{SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use mosaic_core::{Address, MosaicError, MosaicResult, PublicKey};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hashing::blake3_hash;

/// Signing key of a validator or orchestrator
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a key from its 32 secret bytes as stored in key files
    pub fn from_secret_bytes(bytes: &[u8]) -> MosaicResult<Self> {
        let mut seed: [u8; SECRET_KEY_LENGTH] =
            bytes.try_into().map_err(|_| MosaicError::InvalidPrivateKey)?;
        let keypair = Self::from_seed(&seed);
        seed.zeroize();
        Ok(keypair)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    /// Address votes and member actions signed by this key are counted under
    pub fn address(&self) -> Address {
        address_of(&self.public_key())
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

fn address_of(public_key: &PublicKey) -> Address {
    Address::from_bytes(*blake3_hash(public_key.as_bytes()).as_bytes())
}

/// Address of the validator owning `public_key`
///
/// A key whose hash lands on a reserved address is not a valid signer.
pub fn validator_address(public_key: &PublicKey) -> MosaicResult<Address> {
    let address = address_of(public_key);
    if address.is_reserved() {
        return Err(MosaicError::InvalidPublicKey);
    }
    Ok(address)
}

pub(crate) fn verifying_key(public_key: &PublicKey) -> MosaicResult<VerifyingKey> {
    VerifyingKey::from_bytes(public_key.as_bytes()).map_err(|_| MosaicError::InvalidPublicKey)
}

/// Derived secret, wiped on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; 32],
}

impl SecretKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_keypair(&self) -> KeyPair {
        KeyPair::from_seed(&self.bytes)
    }
}
