//! Integrity-checked snapshot envelopes

use mosaic_core::{Hash, MosaicError, MosaicResult};
use mosaic_crypto::hashing::hash;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Encoded state with a digest of its bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// BLAKE3 digest of `bytes`
    pub digest: Hash,
    /// bincode-encoded state
    pub bytes: Vec<u8>,
    /// Seconds since the Unix epoch at creation
    pub timestamp: u64,
}

impl Snapshot {
    /// Encode a state
    pub fn seal<T: Serialize>(state: &T) -> MosaicResult<Self> {
        let bytes = bincode::serialize(state)?;
        Ok(Self {
            digest: hash(&bytes),
            bytes,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        })
    }

    /// Verify snapshot integrity
    pub fn verify(&self) -> bool {
        hash(&self.bytes) == self.digest
    }

    /// Decode the state after verifying the digest
    pub fn open<T: DeserializeOwned>(&self) -> MosaicResult<T> {
        if !self.verify() {
            return Err(MosaicError::StorageError(
                "Snapshot digest does not match its contents".into(),
            ));
        }
        Ok(bincode::deserialize(&self.bytes)?)
    }

    /// Serialize snapshot to bytes
    pub fn to_bytes(&self) -> MosaicResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize snapshot from bytes
    pub fn from_bytes(bytes: &[u8]) -> MosaicResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        height: u64,
        label: String,
    }

    #[test]
    fn test_seal_and_open() {
        let sample = Sample {
            height: 7,
            label: "core".into(),
        };
        let snapshot = Snapshot::seal(&sample).unwrap();
        assert!(snapshot.verify());

        let bytes = snapshot.to_bytes().unwrap();
        let restored = Snapshot::from_bytes(&bytes).unwrap();
        assert_eq!(restored.open::<Sample>().unwrap(), sample);
    }

    #[test]
    fn test_tampered_snapshot() {
        let mut snapshot = Snapshot::seal(&Sample {
            height: 7,
            label: "core".into(),
        })
        .unwrap();
        snapshot.bytes[0] ^= 0xff;
        assert!(!snapshot.verify());
        assert!(matches!(
            snapshot.open::<Sample>(),
            Err(MosaicError::StorageError(_))
        ));
    }
}
