//! Sync engine: classifies local against remote and runs the outcome.
//!
//! Classification is a pure function over three `(revision, device_id)`
//! pairs: the local vault, the remote vault, and the persisted sync point
//! they last agreed on. Diverged states are never merged; the engine
//! reports a conflict and waits for an explicit forced upload or download.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::sync::models::{RemoteVaultMeta, VaultTransfer};
use crate::sync::transport::VaultTransport;
use crate::sync::{state, Result, SyncError};
use crate::vault::model::RevisionId;
use crate::vault::VaultStore;

/// What a sync cycle should do, decided before any payload moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDisposition {
    /// Local and remote hold the same revision.
    InSync,
    /// Only the remote moved since the sync point.
    DownloadRemote,
    /// Only the local vault moved, or nothing was ever uploaded.
    UploadLocal,
    /// Both sides moved, or they diverged with no recorded sync point.
    Conflict,
}

/// Decide the disposition for one vault.
///
/// `remote` is `None` when the account has never stored a vault, and
/// `sync_point` is `None` when this device never completed a sync. The
/// device id is part of every comparison: revision 5 from two different
/// devices is divergence, not agreement.
pub fn classify(
    local: RevisionId,
    remote: Option<RevisionId>,
    sync_point: Option<RevisionId>,
) -> SyncDisposition {
    let remote = match remote {
        Some(remote) => remote,
        None => return SyncDisposition::UploadLocal,
    };
    if local == remote {
        return SyncDisposition::InSync;
    }
    let base = match sync_point {
        Some(base) => base,
        // Differing revisions with no common base cannot be ordered.
        None => return SyncDisposition::Conflict,
    };
    match (local != base, remote != base) {
        (false, false) => SyncDisposition::InSync,
        (false, true) => SyncDisposition::DownloadRemote,
        (true, false) => SyncDisposition::UploadLocal,
        (true, true) => SyncDisposition::Conflict,
    }
}

/// Snapshot of a detected divergence, for display and resolution prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub local: RevisionId,
    pub remote: RevisionId,
    pub sync_point: Option<RevisionId>,
    pub local_updated_at: DateTime<Utc>,
    pub remote_updated_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    InSync,
    Uploaded(RemoteVaultMeta),
    Downloaded(RemoteVaultMeta),
    /// Nothing was transferred; resolve with [`SyncEngine::force_upload`]
    /// or [`SyncEngine::force_download`].
    Conflict(ConflictInfo),
}

enum ConflictTrack {
    None,
    Pending(ConflictInfo),
    Resolved,
}

/// Orchestrates sync cycles for one open vault over one transport.
pub struct SyncEngine<T> {
    store: Arc<VaultStore>,
    transport: Arc<T>,
    conflict: Mutex<ConflictTrack>,
    /// Held for the duration of a cycle; a second cycle on the same vault
    /// is refused rather than queued.
    flight: Mutex<()>,
}

impl<T: VaultTransport> SyncEngine<T> {
    pub fn new(store: Arc<VaultStore>, transport: Arc<T>) -> Self {
        Self {
            store,
            transport,
            conflict: Mutex::new(ConflictTrack::None),
            flight: Mutex::new(()),
        }
    }

    /// Run one sync cycle: classify, then transfer in whichever direction
    /// the classification allows. A conflict is reported, never resolved
    /// implicitly; rerunning while one is pending just re-detects it
    /// against the current remote state.
    pub async fn sync_vault(&self) -> Result<SyncOutcome> {
        let _flight = self
            .flight
            .try_lock()
            .map_err(|_| SyncError::SyncInProgress)?;

        let local = self.store.local_meta().await;
        let sync_point = state::load(self.store.path())?;
        let remote = self.transport.fetch_metadata().await?;

        let disposition = classify(
            local.revision_id(),
            remote.map(|meta| meta.revision_id()),
            sync_point.map(|point| point.revision_id()),
        );
        debug!(local = %local.revision_id(), ?disposition, "classified vault against remote");

        match disposition {
            SyncDisposition::InSync => {
                // Heal a missing or stale sync point so the next divergence
                // classifies against the right base.
                if sync_point.map(|point| point.revision_id()) != Some(local.revision_id()) {
                    state::record(self.store.path(), local.revision_id())?;
                }
                *self.conflict.lock().await = ConflictTrack::None;
                Ok(SyncOutcome::InSync)
            }
            SyncDisposition::UploadLocal => {
                let meta = self.push_local().await?;
                *self.conflict.lock().await = ConflictTrack::None;
                Ok(SyncOutcome::Uploaded(meta))
            }
            SyncDisposition::DownloadRemote => {
                let meta = self.pull_remote().await?;
                *self.conflict.lock().await = ConflictTrack::None;
                Ok(SyncOutcome::Downloaded(meta))
            }
            SyncDisposition::Conflict => {
                // An absent remote classifies as upload, so it exists here.
                let remote = remote
                    .ok_or_else(|| SyncError::State("conflict without remote metadata".into()))?;
                let info = ConflictInfo {
                    local: local.revision_id(),
                    remote: remote.revision_id(),
                    sync_point: sync_point.map(|point| point.revision_id()),
                    local_updated_at: local.updated_at,
                    remote_updated_at: remote.updated_at,
                    detected_at: Utc::now(),
                };
                warn!(
                    local = %info.local,
                    remote = %info.remote,
                    "vault diverged from remote, resolution required"
                );
                *self.conflict.lock().await = ConflictTrack::Pending(info.clone());
                Ok(SyncOutcome::Conflict(info))
            }
        }
    }

    /// Resolve the pending conflict by overwriting the remote vault.
    ///
    /// The local revision is first promoted past both diverged states, so
    /// every other device classifies the overwrite as a plain download
    /// instead of a new conflict. The remote metadata is re-fetched; the
    /// promotion clears what the server holds now, not what it held when
    /// the conflict was detected.
    pub async fn force_upload(&self) -> Result<RemoteVaultMeta> {
        let _flight = self
            .flight
            .try_lock()
            .map_err(|_| SyncError::SyncInProgress)?;
        self.require_pending().await?;

        let remote = self.transport.fetch_metadata().await?;
        let local = self.store.local_meta().await;
        let floor = remote.map(|meta| meta.revision).unwrap_or(0);
        let promoted = local.revision.max(floor) + 1;
        self.store.promote_revision(promoted).await;

        let meta = self.push_local().await?;
        *self.conflict.lock().await = ConflictTrack::Resolved;
        info!(revision = %meta.revision_id(), "conflict resolved by forced upload");
        Ok(meta)
    }

    /// Resolve the pending conflict by adopting the remote vault. Local
    /// changes since the sync point are discarded.
    pub async fn force_download(&self) -> Result<RemoteVaultMeta> {
        let _flight = self
            .flight
            .try_lock()
            .map_err(|_| SyncError::SyncInProgress)?;
        self.require_pending().await?;

        let meta = self.pull_remote().await?;
        *self.conflict.lock().await = ConflictTrack::Resolved;
        info!(revision = %meta.revision_id(), "conflict resolved by forced download");
        Ok(meta)
    }

    /// Acknowledge a resolved conflict. Fails while the conflict is still
    /// pending, and when there is nothing to acknowledge.
    pub async fn clear_conflict(&self) -> Result<()> {
        let mut conflict = self.conflict.lock().await;
        match *conflict {
            ConflictTrack::Resolved => {
                *conflict = ConflictTrack::None;
                Ok(())
            }
            ConflictTrack::Pending(_) => Err(SyncError::ConflictPending),
            ConflictTrack::None => Err(SyncError::NoConflict),
        }
    }

    /// The conflict awaiting resolution, if any.
    pub async fn pending_conflict(&self) -> Option<ConflictInfo> {
        match &*self.conflict.lock().await {
            ConflictTrack::Pending(info) => Some(info.clone()),
            _ => None,
        }
    }

    async fn require_pending(&self) -> Result<()> {
        match &*self.conflict.lock().await {
            ConflictTrack::Pending(_) => Ok(()),
            _ => Err(SyncError::NoConflict),
        }
    }

    /// Save with fresh randomness and upload the exact bytes written. The
    /// sync point records the local state; a well-behaved server reports
    /// the same metadata back.
    async fn push_local(&self) -> Result<RemoteVaultMeta> {
        let (meta, bytes) = self.store.save_for_upload().await?;
        let transfer = VaultTransfer {
            revision: meta.revision,
            device_id: meta.device_id,
            updated_at: meta.updated_at,
            ciphertext: bytes,
        };
        let reported = self.transport.upload(transfer).await?;
        state::record(self.store.path(), meta.revision_id())?;
        info!(revision = %meta.revision_id(), "uploaded vault");
        Ok(reported)
    }

    /// Download, authenticate, and adopt the remote container. The adopted
    /// payload is authoritative for the recorded sync point; server
    /// metadata that disagrees with it is logged and ignored.
    async fn pull_remote(&self) -> Result<RemoteVaultMeta> {
        let transfer = self.transport.download().await?;
        let declared = transfer.metadata();
        let adopted = self.store.adopt_remote(transfer.ciphertext).await?;
        if adopted.revision_id() != declared.revision_id() {
            warn!(
                declared = %declared.revision_id(),
                decoded = %adopted.revision_id(),
                "server metadata disagrees with the downloaded container"
            );
        }
        state::record(self.store.path(), adopted.revision_id())?;
        info!(revision = %adopted.revision_id(), "downloaded vault");
        Ok(RemoteVaultMeta {
            revision: adopted.revision,
            device_id: adopted.device_id,
            updated_at: adopted.updated_at,
        })
    }
}
