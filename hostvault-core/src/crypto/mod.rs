//! Cryptographic primitives for the vault container.
//!
//! This module provides:
//! - Argon2id key derivation with downgrade protection
//! - AES-256-GCM payload sealing with the container header as AAD
//! - Zeroized key material

pub mod cipher;
pub mod kdf;

pub use cipher::{
    decrypt_payload, encrypt_payload, generate_nonce, VaultKey, KEY_LEN, NONCE_LEN, TAG_LEN,
};
pub use kdf::{derive_key, KdfParams, SALT_LEN};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("KDF parameter {field} below minimum: {actual} < {minimum}")]
    WeakKdfParams {
        field: &'static str,
        minimum: u32,
        actual: u32,
    },

    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Authentication failed - wrong password or corrupted vault")]
    AuthenticationFailed,
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
