//! # Lockbox Keychain
//!
//! Password-protected encrypted key-value store mapping domain names to
//! secret strings.
//!
//! A single password unlocks the store. All persisted state is
//! confidentiality- and integrity-protected under a 256-bit key derived
//! from that password with PBKDF2-HMAC-SHA256:
//!
//! - each entry value is sealed individually with AES-256-GCM under a
//!   fresh nonce,
//! - the whole store exports to a portable [`Envelope`] that survives an
//!   untrusted channel (disk, network, clipboard) and detects tampering
//!   or substitution on the way back in.
//!
//! Persistence and transport of the exported envelope are the caller's
//! responsibility; this crate holds no locks, performs no I/O, and keeps
//! the master key only in memory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use lockbox_crypto::{aead, kdf, random, MasterKey};

pub use envelope::Envelope;
pub use error::KeychainError;

/// The encrypted form of one entry value.
///
/// Layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`, produced
/// with a fresh random nonce on every write. Serialized as base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord(#[serde(with = "envelope::b64")] pub(crate) Vec<u8>);

impl EntryRecord {
    /// Raw record bytes, nonce prefix included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The serializable keychain state: the derivation salt plus the map of
/// encrypted entries. This is exactly what an exported envelope protects.
///
/// `BTreeMap` keeps the serialized form canonical (sorted keys), so the
/// digest computed over it is deterministic for a given state.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct KeychainState {
    #[serde(with = "envelope::b64_salt")]
    pub(crate) salt: [u8; kdf::SALT_SIZE],
    pub(crate) entries: BTreeMap<String, EntryRecord>,
}

/// A password-protected keychain, unlocked and held in memory.
///
/// An instance only exists in the active state: [`Keychain::create`] and
/// [`Keychain::unlock`] are the constructors, and dropping the instance
/// discards the master key. One instance is intended for exclusive use by
/// one logical session at a time; concurrent callers must serialize.
pub struct Keychain {
    state: KeychainState,
    master_key: MasterKey,
}

impl Keychain {
    /// Creates a new, empty keychain protected by `password`.
    ///
    /// Generates the derivation salt - exactly once per keychain lifetime;
    /// it never changes afterwards and travels in the clear with every
    /// exported envelope.
    pub fn create(password: &str) -> Result<Self, KeychainError> {
        let salt = random::generate_salt();
        let master_key = kdf::derive_master_key(password, &salt)?;

        debug!("keychain created");

        Ok(Self {
            state: KeychainState {
                salt,
                entries: BTreeMap::new(),
            },
            master_key,
        })
    }

    /// Unlocks a keychain from its `[opaque, digest]` transport pair.
    ///
    /// `trusted_digest` is an optional out-of-band digest; when supplied
    /// it must match the digest embedded in the representation, defending
    /// against whole-envelope substitution.
    ///
    /// On any error no keychain is produced and nothing is recovered.
    pub fn unlock(
        password: &str,
        repr: &str,
        trusted_digest: Option<&str>,
    ) -> Result<Self, KeychainError> {
        let parsed = Envelope::from_repr(repr)?;
        Self::unlock_envelope(password, &parsed, trusted_digest)
    }

    /// Unlocks a keychain from an already-parsed [`Envelope`].
    pub fn unlock_envelope(
        password: &str,
        envelope: &Envelope,
        trusted_digest: Option<&str>,
    ) -> Result<Self, KeychainError> {
        let (state, master_key) = envelope::unpack(envelope, password, trusted_digest)?;

        debug!(entries = state.entries.len(), "keychain unlocked");

        Ok(Self { state, master_key })
    }

    /// Looks up the secret stored under `name`.
    ///
    /// Absence is `Ok(None)`, not an error. An authentication failure here
    /// means a record held in memory no longer decrypts under the master
    /// key - internal corruption, fatal for the store.
    pub fn get(&self, name: &str) -> Result<Option<String>, KeychainError> {
        let Some(record) = self.state.entries.get(name) else {
            return Ok(None);
        };

        let plaintext = aead::decrypt(self.master_key.as_bytes(), record.as_bytes())?;
        let value = String::from_utf8(plaintext.to_vec())
            .map_err(|_| KeychainError::Crypto("entry value is not valid UTF-8".to_string()))?;

        Ok(Some(value))
    }

    /// Stores `value` under `name`, inserting or overwriting.
    ///
    /// Upsert semantics: idempotent in effect, though the record bytes
    /// differ on every call because each encryption draws a fresh nonce.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), KeychainError> {
        let blob = aead::encrypt(self.master_key.as_bytes(), value.as_bytes())?;
        self.state
            .entries
            .insert(name.to_string(), EntryRecord(blob));

        debug!(name = name, "entry stored");
        Ok(())
    }

    /// Deletes the entry under `name`, reporting whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let existed = self.state.entries.remove(name).is_some();

        if existed {
            debug!(name = name, "entry removed");
        }

        existed
    }

    /// Exports the keychain as a portable envelope.
    ///
    /// The envelope carries everything needed to later [`Keychain::unlock`]
    /// given the password: the clear salt, a fresh nonce, the sealed state,
    /// and the clear digest of the plaintext state.
    pub fn export(&self) -> Result<Envelope, KeychainError> {
        envelope::pack(&self.state, &self.master_key)
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    /// Returns true if the keychain holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }
}
