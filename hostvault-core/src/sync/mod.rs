//! Multi-device vault synchronization.
//!
//! - Explicit authentication state machine over the account service
//! - Metadata-first reconciliation on `(revision, device_id)` pairs
//! - Detected conflicts are never auto-merged; resolution is an explicit
//!   forced upload or download
//! - The persisted sync point survives restarts, so divergence is still
//!   recognized after a crash

pub mod client;
pub mod engine;
pub mod models;
pub mod state;
pub mod transport;

pub use client::{AuthState, SessionToken, SyncClient};
pub use engine::{classify, ConflictInfo, SyncDisposition, SyncEngine, SyncOutcome};
pub use models::{AuthResponse, AuthStatus, RemoteVaultMeta, VaultTransfer};
pub use state::SyncPoint;
pub use transport::{InMemoryRemote, VaultTransport};

use thiserror::Error;

use crate::vault::VaultError;

/// Errors from the sync layer.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Operation {op} is invalid in state {state}")]
    InvalidTransition {
        op: &'static str,
        state: &'static str,
    },

    #[error("No server configured")]
    NotConfigured,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session token expired")]
    TokenExpired,

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Sync already in progress for this vault")]
    SyncInProgress,

    #[error("Unresolved conflict: force an upload or download first")]
    ConflictPending,

    #[error("No conflict to resolve")]
    NoConflict,

    #[error("Server returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Malformed server response: {0}")]
    Protocol(String),

    #[error("Sync state: {0}")]
    State(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
