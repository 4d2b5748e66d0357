//! Error types for Mosaic

use thiserror::Error;

/// Main error type for Mosaic
///
/// Every protocol failure is reported synchronously and leaves the state of
/// the called instance exactly as it was before the call.
#[derive(Error, Debug)]
pub enum MosaicError {
    // ============ Protocol Errors ============
    /// Caller is not the orchestrator, not a seated member, or not an active validator
    #[error("Access denied: {0}")]
    AccessControl(String),

    /// Operation invoked outside of its required phase
    #[error("Invalid state transition: {0}")]
    StateTransition(String),

    /// Input that would break an entity invariant
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Action already performed once and may not repeat
    #[error("Already performed: {0}")]
    Idempotency(String),

    /// Supplied preimage does not reproduce a committed hash
    #[error("Mismatch: {0}")]
    Mismatch(String),

    // ============ Cryptography Errors ============
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // ============ Storage Errors ============
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization failed: {0}")]
    SerializationError(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of a [`MosaicError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AccessControl,
    StateTransition,
    InvariantViolation,
    Idempotency,
    Mismatch,
    Crypto,
    Storage,
    Config,
    Internal,
}

impl MosaicError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MosaicError::AccessControl(_) => ErrorKind::AccessControl,
            MosaicError::StateTransition(_) => ErrorKind::StateTransition,
            MosaicError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            MosaicError::Idempotency(_) => ErrorKind::Idempotency,
            MosaicError::Mismatch(_) => ErrorKind::Mismatch,
            // A forged vote signature is an authentication failure
            MosaicError::InvalidSignature | MosaicError::InvalidPublicKey => {
                ErrorKind::AccessControl
            }
            MosaicError::InvalidPrivateKey | MosaicError::KeyDerivationFailed(_) => {
                ErrorKind::Crypto
            }
            MosaicError::StorageError(_)
            | MosaicError::SerializationError(_)
            | MosaicError::DeserializationError(_) => ErrorKind::Storage,
            MosaicError::ConfigError(_) => ErrorKind::Config,
            MosaicError::Internal(_) | MosaicError::Other(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for MosaicError {
    fn from(err: std::io::Error) -> Self {
        MosaicError::StorageError(err.to_string())
    }
}

impl From<bincode::Error> for MosaicError {
    fn from(err: bincode::Error) -> Self {
        MosaicError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for MosaicError {
    fn from(err: serde_json::Error) -> Self {
        MosaicError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            MosaicError::Idempotency("vote already cast".into()).kind(),
            ErrorKind::Idempotency
        );
        assert_eq!(MosaicError::InvalidSignature.kind(), ErrorKind::AccessControl);
        assert_eq!(
            MosaicError::StorageError("disk".into()).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_error_display() {
        let err = MosaicError::Mismatch("sealed commit".into());
        assert_eq!(err.to_string(), "Mismatch: sealed commit");
    }
}
