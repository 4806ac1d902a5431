//! Encrypted vault container: binary format, payload model, and the store
//! that orchestrates create/open/save with atomic durable writes.

pub mod credentials;
pub mod format;
pub mod model;
pub mod store;
#[cfg(test)]
mod tests;

pub use credentials::CredentialCache;
pub use format::{DecodedContainer, VaultHeader, FORMAT_VERSION, MAGIC};
pub use model::{
    MetaValue, RevisionId, TmuxSettings, VaultData, VaultHost, VaultIdentity, VaultMeta,
    VaultModel, VaultSettings, VaultSnippet,
};
pub use store::VaultStore;

use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors from decoding the binary container framing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Not a vault file (bad magic)")]
    UnknownMagic,

    #[error("Truncated container header")]
    TruncatedHeader,

    #[error("Ciphertext length mismatch: header declares {declared}, found {actual}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("Unknown KDF algorithm id {0}")]
    UnknownKdf(u8),

    #[error("Unknown cipher algorithm id {0}")]
    UnknownCipher(u8),

    #[error("Invalid header field: {0}")]
    InvalidField(&'static str),
}

/// Errors from vault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Container format error: {0}")]
    Format(#[from] FormatError),

    #[error("Unsupported container version {found}")]
    UnsupportedVersion { found: u16 },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Vault already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Vault payload invalid: {0}")]
    Payload(String),

    #[error("No {kind} with id {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;
