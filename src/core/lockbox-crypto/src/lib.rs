//! # Lockbox Crypto
//!
//! Core cryptographic primitives for Lockbox.
//!
//! This crate provides the low-level operations the keychain is built on:
//! - Password-based key derivation (PBKDF2-HMAC-SHA256)
//! - Symmetric authenticated encryption (AES-256-GCM)
//! - Secure random generation for salts and nonces

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod random;

pub use error::CryptoError;
pub use keys::MasterKey;
