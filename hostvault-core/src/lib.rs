//! HostVault core library.
//!
//! Encrypted vault storage for SSH connection credentials, plus the
//! multi-device sync protocol over it: an Argon2id / AES-256-GCM container
//! format, a typed payload model with per-mutation revisions, atomic
//! persistence, and revision-based reconciliation where conflicts are
//! surfaced instead of merged.

pub mod crypto;
pub mod device;
pub mod paths;
pub mod sync;
pub mod vault;

pub use crypto::{CryptoError, KdfParams};
pub use device::DeviceIdentity;
pub use paths::{config_dir, data_dir, default_vault_path, ensure_config_dir, ensure_data_dir};
pub use sync::{
    AuthState, ConflictInfo, SessionToken, SyncClient, SyncEngine, SyncError, SyncOutcome,
    SyncPoint, VaultTransport,
};
pub use vault::{
    CredentialCache, MetaValue, RevisionId, VaultData, VaultError, VaultHost, VaultIdentity,
    VaultMeta, VaultModel, VaultSettings, VaultSnippet, VaultStore,
};
