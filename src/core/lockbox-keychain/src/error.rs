//! Keychain error types.

use thiserror::Error;

use lockbox_crypto::CryptoError;

/// Errors that can occur during keychain operations.
///
/// Every error is terminal for the call that produced it - nothing is
/// retried inside the core. Callers branch on the kind (re-prompt for a
/// password, treat the envelope as corrupt, abort).
#[derive(Debug, Error)]
pub enum KeychainError {
    /// Cipher tag verification failed: the envelope was tampered with or
    /// the password is wrong. No partial plaintext is ever returned.
    #[error("authentication failed")]
    Authentication,

    /// Digest mismatch - the envelope (or the out-of-band trusted digest)
    /// does not match the decrypted content.
    #[error("integrity check failed")]
    Integrity,

    /// An operation requiring an unlocked keychain was invoked without one.
    #[error("keychain not initialized")]
    NotInitialized,

    /// The input does not parse into the expected envelope structure.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Internal cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<CryptoError> for KeychainError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::DecryptionFailed(_) => KeychainError::Authentication,
            other => KeychainError::Crypto(other.to_string()),
        }
    }
}
