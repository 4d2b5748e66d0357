//! Deterministic validator key derivation using HKDF

use hkdf::Hkdf;
use mosaic_core::{MosaicError, MosaicResult};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::{KeyPair, SecretKey};

/// Derive a key using HKDF-SHA256
pub fn derive_key(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output_length: usize,
) -> MosaicResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = vec![0u8; output_length];

    hk.expand(info, &mut output)
        .map_err(|e| MosaicError::KeyDerivationFailed(e.to_string()))?;

    Ok(output)
}

/// Derive a 32-byte key
pub fn derive_key_32(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> MosaicResult<[u8; 32]> {
    let mut key = derive_key(input_key_material, salt, info, 32)?;
    let mut result = [0u8; 32];
    result.copy_from_slice(&key);
    key.zeroize();
    Ok(result)
}

/// Derive the secret key of the validator at `index`
pub fn derive_validator_secret(seed: &[u8], index: u32) -> MosaicResult<SecretKey> {
    let info = format!("mosaic/validator/{}", index);
    let derived = derive_key_32(seed, None, info.as_bytes())?;
    Ok(SecretKey::new(derived))
}

/// Root secret of an operator running several validators
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct OperatorKey {
    seed: [u8; 32],
}

impl OperatorKey {
    /// Create from a 32-byte seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { seed }
    }

    /// Generate a random operator key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self { seed }
    }

    /// Derive the operator key from a passphrase
    pub fn from_phrase(phrase: &str) -> MosaicResult<Self> {
        let seed = derive_key_32(phrase.as_bytes(), Some(b"mosaic-operator"), b"root")?;
        Ok(Self { seed })
    }

    /// Derive the validator keypair at the given index
    pub fn validator_keypair(&self, index: u32) -> MosaicResult<KeyPair> {
        let secret = derive_validator_secret(&self.seed, index)?;
        Ok(secret.to_keypair())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key() {
        let ikm = b"input key material";
        let salt = b"salt";
        let info = b"context info";

        let key1 = derive_key(ikm, Some(salt), info, 32).unwrap();
        let key2 = derive_key(ikm, Some(salt), info, 32).unwrap();

        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 32);
    }

    #[test]
    fn test_derive_key_too_long() {
        // HKDF-SHA256 output is bounded by 255 * 32 bytes
        assert!(matches!(
            derive_key(b"ikm", None, b"info", 255 * 32 + 1),
            Err(MosaicError::KeyDerivationFailed(_))
        ));
    }

    #[test]
    fn test_operator_key() {
        let operator = OperatorKey::from_phrase("my secret phrase").unwrap();

        let kp0 = operator.validator_keypair(0).unwrap();
        let kp1 = operator.validator_keypair(1).unwrap();

        assert_ne!(kp0.address(), kp1.address());

        // Deterministic
        let again = OperatorKey::from_phrase("my secret phrase").unwrap();
        assert_eq!(kp0.address(), again.validator_keypair(0).unwrap().address());
    }
}
