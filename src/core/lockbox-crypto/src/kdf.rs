//! Password-based key derivation.
//!
//! Provides PBKDF2 with HMAC-SHA256 as specified in RFC 8018.
//! Used to turn a human password plus a random salt into the keychain
//! master key. Derivation is deterministic: identical inputs always yield
//! the identical key, which is what lets an unlock recover the same key
//! that creation produced.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::aead::KEY_SIZE;
use crate::error::CryptoError;
use crate::keys::MasterKey;

/// PBKDF2 iteration count for master key derivation.
///
/// Chosen to balance brute-force resistance against interactive latency.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Size of a key derivation salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Derives key material using PBKDF2-HMAC-SHA256.
///
/// # Arguments
///
/// * `password` - The secret to derive from
/// * `salt` - Random salt value
/// * `iterations` - Number of PBKDF2 rounds
/// * `length` - Desired output key length in bytes
///
/// # Returns
///
/// Derived key wrapped in `Zeroizing` for automatic memory cleanup.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    length: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::InvalidInput(
            "iteration count must be > 0".to_string(),
        ));
    }

    if length == 0 {
        return Err(CryptoError::InvalidInput(
            "output length must be > 0".to_string(),
        ));
    }

    let mut okm = Zeroizing::new(vec![0u8; length]);
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut okm);

    Ok(okm)
}

/// Derives the keychain master key from a password and salt.
///
/// Convenience wrapper around `derive_key` using the fixed iteration
/// count and a 256-bit output, scoped exclusively for use as an
/// AES-256-GCM key.
///
/// A wrong password is not observable at this layer - it simply derives
/// a different key, detected later by authentication-tag failure.
///
/// # Errors
///
/// Returns an error if the salt is not exactly [`SALT_SIZE`] bytes.
pub fn derive_master_key(password: &str, salt: &[u8]) -> Result<MasterKey, CryptoError> {
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::InvalidInput(format!(
            "expected {} byte salt, got {}",
            SALT_SIZE,
            salt.len()
        )));
    }

    let derived = derive_key(password.as_bytes(), salt, PBKDF2_ITERATIONS, KEY_SIZE)?;
    MasterKey::from_bytes(&derived)
}
