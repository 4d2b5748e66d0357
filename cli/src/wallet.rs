//! Validator key management

use mosaic_core::{Address, Hash, MosaicError, MosaicResult, Position, VoteSignature};
use mosaic_crypto::commitment::seal_position;
use mosaic_crypto::derivation::{derive_key_32, OperatorKey};
use mosaic_crypto::keys::KeyPair;
use mosaic_crypto::signing::{sign_member_action, sign_vote, MemberAction};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Key file format
#[derive(Serialize, Deserialize)]
pub struct KeyFile {
    pub version: u32,
    pub name: String,
    pub address: String,
    pub public_key: String,
    pub secret_key: String,
    /// Derivation index when derived from an operator phrase
    #[serde(default)]
    pub index: Option<u32>,
}

/// Local validator key
pub struct ValidatorKey {
    name: String,
    keypair: KeyPair,
    index: Option<u32>,
}

impl ValidatorKey {
    /// Create a new random key
    pub fn new(name: &str) -> Self {
        Self::from_keypair(name, KeyPair::generate())
    }

    /// Create key from keypair
    pub fn from_keypair(name: &str, keypair: KeyPair) -> Self {
        Self {
            name: name.to_string(),
            keypair,
            index: None,
        }
    }

    /// Derive the validator key at `index` of an operator phrase
    pub fn derive(name: &str, phrase: &str, index: u32) -> MosaicResult<Self> {
        let keypair = OperatorKey::from_phrase(phrase)?.validator_keypair(index)?;
        Ok(Self {
            name: name.to_string(),
            keypair,
            index: Some(index),
        })
    }

    /// Load key from file
    pub fn load(path: &Path) -> MosaicResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let key_file: KeyFile = serde_json::from_str(&content)?;

        let secret_bytes = hex::decode(&key_file.secret_key)
            .map_err(|e| MosaicError::DeserializationError(e.to_string()))?;
        let keypair = KeyPair::from_secret_bytes(&secret_bytes)?;

        if keypair.address().to_hex() != key_file.address {
            return Err(MosaicError::ConfigError(format!(
                "Key file {} does not match its address",
                path.display()
            )));
        }

        Ok(Self {
            name: key_file.name,
            keypair,
            index: key_file.index,
        })
    }

    /// Save key to file
    pub fn save(&self, path: &Path) -> MosaicResult<()> {
        let key_file = KeyFile {
            version: 1,
            name: self.name.clone(),
            address: self.address().to_hex(),
            public_key: self.keypair.public_key().to_hex(),
            secret_key: hex::encode(self.keypair.secret_bytes()),
            index: self.index,
        };
        std::fs::write(path, serde_json::to_string_pretty(&key_file)?)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn sign_vote(&self, proposal: &Hash) -> VoteSignature {
        sign_vote(&self.keypair, proposal)
    }

    /// Salt for a position on a committee, reproducible from the key alone
    pub fn commit_salt(&self, committee: &Hash, position: &Position) -> MosaicResult<Hash> {
        let mut info = Vec::with_capacity(64);
        info.extend_from_slice(committee.as_bytes());
        info.extend_from_slice(position.as_bytes());
        let salt = derive_key_32(&self.keypair.secret_bytes(), Some(b"mosaic-commit-salt"), &info)?;
        Ok(Hash::from_bytes(salt))
    }

    pub fn seal(&self, position: &Position, salt: &Hash) -> Hash {
        seal_position(position, salt, &self.address())
    }

    pub fn sign_member_action(
        &self,
        committee: &Hash,
        action: MemberAction,
        payload: &[u8],
    ) -> VoteSignature {
        sign_member_action(&self.keypair, committee, action, payload)
    }
}

/// Key manager for a directory of key files
pub struct KeyManager {
    keys_dir: PathBuf,
}

impl KeyManager {
    pub fn new(keys_dir: PathBuf) -> Self {
        Self { keys_dir }
    }

    /// Create keys directory if it doesn't exist
    pub fn init(&self) -> MosaicResult<()> {
        std::fs::create_dir_all(&self.keys_dir)?;
        Ok(())
    }

    fn path(&self, name: &str) -> PathBuf {
        self.keys_dir.join(format!("{}.json", name))
    }

    /// List all keys
    pub fn list(&self) -> MosaicResult<Vec<KeyInfo>> {
        self.init()?;

        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.keys_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(key) = ValidatorKey::load(&path) {
                    keys.push(KeyInfo {
                        name: key.name().to_string(),
                        address: key.address().to_hex(),
                        path,
                    });
                }
            }
        }
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    /// Store a key under its name, refusing to overwrite
    pub fn add(&self, key: ValidatorKey) -> MosaicResult<ValidatorKey> {
        self.init()?;
        let path = self.path(key.name());
        if path.exists() {
            return Err(MosaicError::ConfigError(format!(
                "Key '{}' already exists",
                key.name()
            )));
        }
        key.save(&path)?;
        Ok(key)
    }

    pub fn create(&self, name: &str) -> MosaicResult<ValidatorKey> {
        self.add(ValidatorKey::new(name))
    }

    pub fn derive(&self, name: &str, phrase: &str, index: u32) -> MosaicResult<ValidatorKey> {
        self.add(ValidatorKey::derive(name, phrase, index)?)
    }

    /// Import key from secret key
    pub fn import(&self, name: &str, secret_hex: &str) -> MosaicResult<ValidatorKey> {
        let secret_bytes = hex::decode(secret_hex.trim_start_matches("0x"))
            .map_err(|e| MosaicError::DeserializationError(e.to_string()))?;
        let keypair = KeyPair::from_secret_bytes(&secret_bytes)?;
        self.add(ValidatorKey::from_keypair(name, keypair))
    }

    /// Get key by name
    pub fn get(&self, name: &str) -> MosaicResult<ValidatorKey> {
        let path = self.path(name);
        if !path.exists() {
            return Err(MosaicError::ConfigError(format!("Key '{}' not found", name)));
        }
        ValidatorKey::load(&path)
    }
}

/// Key info for listing
#[derive(Debug)]
pub struct KeyInfo {
    pub name: String,
    pub address: String,
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_crypto::commitment::Blake3Commitment;
    use mosaic_core::Commitment;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_load() {
        let dir = TempDir::new().unwrap();
        let manager = KeyManager::new(dir.path().to_path_buf());

        let created = manager.create("alice").unwrap();
        let loaded = manager.get("alice").unwrap();
        assert_eq!(created.address(), loaded.address());
        assert!(manager.create("alice").is_err());
        assert!(manager.get("bob").is_err());

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "alice");
    }

    #[test]
    fn test_derived_keys_are_reproducible() {
        let dir = TempDir::new().unwrap();
        let manager = KeyManager::new(dir.path().to_path_buf());

        let first = manager.derive("v0", "operator phrase", 0).unwrap();
        let again = ValidatorKey::derive("other", "operator phrase", 0).unwrap();
        let next = ValidatorKey::derive("v1", "operator phrase", 1).unwrap();
        assert_eq!(first.address(), again.address());
        assert_ne!(first.address(), next.address());
        assert_eq!(manager.get("v0").unwrap().index(), Some(0));
    }

    #[test]
    fn test_import_round_trip() {
        let dir = TempDir::new().unwrap();
        let manager = KeyManager::new(dir.path().to_path_buf());
        let keypair = KeyPair::from_seed(&[7u8; 32]);

        let imported = manager
            .import("carol", &hex::encode(keypair.secret_bytes()))
            .unwrap();
        assert_eq!(imported.address(), keypair.address());
        assert!(manager.import("dave", "zz").is_err());
    }

    #[test]
    fn test_commit_salt_opens_seal() {
        let key = ValidatorKey::from_keypair("alice", KeyPair::from_seed(&[3u8; 32]));
        let committee = Hash([8u8; 32]);
        let position = Hash([9u8; 32]);

        let salt = key.commit_salt(&committee, &position).unwrap();
        assert_eq!(salt, key.commit_salt(&committee, &position).unwrap());
        assert_ne!(salt, key.commit_salt(&Hash([1u8; 32]), &position).unwrap());

        let sealed = key.seal(&position, &salt);
        assert!(Blake3Commitment.reveal(&sealed, &position, &salt, &key.address()));
    }
}
