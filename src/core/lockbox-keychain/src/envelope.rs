//! Envelope pack/unpack - the portable exported representation.
//!
//! ## Wire format
//!
//! An exported keychain travels as the JSON pair `[opaque, digest]` where
//!
//! ```text
//! opaque = base64( salt (16) || nonce (12) || ciphertext || tag (16) )
//! digest = lowercase hex SHA-256 of the serialized plaintext state
//! ```
//!
//! The derivation salt lives in the clear at the head of the blob: it must
//! be available before decryption can occur, since it is required to
//! re-derive the key that performs the decryption. The AEAD nonce is fresh
//! on every export and is never used as the derivation salt.
//!
//! The digest is computed over the state before encryption, so it attests
//! to plaintext authenticity after decryption; the GCM tag attests to the
//! envelope itself before decryption.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use lockbox_crypto::{aead, kdf, MasterKey};

use crate::error::KeychainError;
use crate::KeychainState;

/// Minimum decoded blob length: salt, nonce, and tag around an empty
/// ciphertext.
const MIN_BLOB_SIZE: usize = kdf::SALT_SIZE + aead::NONCE_SIZE + aead::TAG_SIZE;

/// A packed keychain: the opaque encrypted blob plus the clear digest of
/// the plaintext state it protects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// base64 of `salt || nonce || ciphertext || tag`.
    pub opaque: String,
    /// Lowercase hex SHA-256 of the serialized plaintext state.
    pub digest: String,
}

impl Envelope {
    /// Serializes the envelope as the `[opaque, digest]` transport pair.
    pub fn to_repr(&self) -> String {
        serde_json::to_string(&(&self.opaque, &self.digest))
            .expect("a pair of strings always serializes")
    }

    /// Parses an envelope from the `[opaque, digest]` transport pair.
    pub fn from_repr(repr: &str) -> Result<Self, KeychainError> {
        let (opaque, digest): (String, String) = serde_json::from_str(repr).map_err(|e| {
            KeychainError::MalformedEnvelope(format!("invalid representation: {}", e))
        })?;

        Ok(Self { opaque, digest })
    }
}

/// Packs a keychain state into a portable envelope.
///
/// Serializes the state canonically, digests the serialized bytes, and
/// seals them under `key` with a fresh nonce.
pub(crate) fn pack(state: &KeychainState, key: &MasterKey) -> Result<Envelope, KeychainError> {
    let plaintext = serde_json::to_vec(state)
        .map_err(|e| KeychainError::Crypto(format!("state serialization failed: {}", e)))?;

    let digest = hex_encode(&Sha256::digest(&plaintext));
    let sealed = aead::encrypt(key.as_bytes(), &plaintext)?;

    let mut blob = Vec::with_capacity(kdf::SALT_SIZE + sealed.len());
    blob.extend_from_slice(&state.salt);
    blob.extend_from_slice(&sealed);

    Ok(Envelope {
        opaque: BASE64.encode(blob),
        digest,
    })
}

/// Unpacks an envelope back into a keychain state and its master key.
///
/// Order of verification:
/// 1. decode and length-check the opaque blob,
/// 2. derive the key from `password` and the clear salt, decrypt
///    (authentication failure means tampering or a wrong password),
/// 3. if the caller supplied a trusted digest, it must equal the embedded
///    one,
/// 4. the digest recomputed over the decrypted bytes must equal the
///    embedded one,
/// 5. deserialize, and require the salt inside the state to match the
///    clear header salt.
pub(crate) fn unpack(
    envelope: &Envelope,
    password: &str,
    trusted_digest: Option<&str>,
) -> Result<(KeychainState, MasterKey), KeychainError> {
    let blob = BASE64
        .decode(&envelope.opaque)
        .map_err(|e| KeychainError::MalformedEnvelope(format!("invalid base64: {}", e)))?;

    if blob.len() < MIN_BLOB_SIZE {
        return Err(KeychainError::MalformedEnvelope(format!(
            "blob too short: {} bytes",
            blob.len()
        )));
    }

    let (salt, sealed) = blob.split_at(kdf::SALT_SIZE);

    let master_key = kdf::derive_master_key(password, salt)?;
    let plaintext = aead::decrypt(master_key.as_bytes(), sealed)?;

    if let Some(trusted) = trusted_digest {
        if trusted != envelope.digest {
            return Err(KeychainError::Integrity);
        }
    }

    let recomputed = hex_encode(&Sha256::digest(&*plaintext));
    if recomputed != envelope.digest {
        return Err(KeychainError::Integrity);
    }

    let state: KeychainState = serde_json::from_slice(&plaintext)
        .map_err(|e| KeychainError::MalformedEnvelope(format!("invalid state: {}", e)))?;

    if state.salt[..] != *salt {
        return Err(KeychainError::MalformedEnvelope(
            "salt mismatch between header and state".to_string(),
        ));
    }

    Ok((state, master_key))
}

/// Encodes bytes as lowercase hex.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}

/// Serde adapter encoding byte vectors as base64 strings.
pub(crate) mod b64 {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for the fixed-size derivation salt.
pub(crate) mod b64_salt {
    use serde::{Deserializer, Serializer};

    use lockbox_crypto::kdf::SALT_SIZE;

    pub fn serialize<S: Serializer>(
        salt: &[u8; SALT_SIZE],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        super::b64::serialize(salt, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; SALT_SIZE], D::Error> {
        let bytes = super::b64::deserialize(deserializer)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("salt must be {} bytes", SALT_SIZE)))
    }
}
