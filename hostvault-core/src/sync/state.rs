//! Persisted sync point: the last state both sides agreed on.
//!
//! Stored as a JSON sidecar next to the vault file and written with the
//! same atomic routine as the vault itself. Losing it does not lose data,
//! only the merge base; a missing sidecar reads as never-synced.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::{Result, SyncError};
use crate::vault::model::RevisionId;
use crate::vault::store::atomic_write;

/// Last-synced vault state, the merge base for conflict classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPoint {
    pub revision: u64,
    pub device_id: uuid::Uuid,
    pub synced_at: DateTime<Utc>,
}

impl SyncPoint {
    pub fn revision_id(&self) -> RevisionId {
        RevisionId {
            revision: self.revision,
            device_id: self.device_id,
        }
    }
}

/// Sidecar location for a given vault file: `<vault>.sync`.
pub fn sidecar_path(vault_path: &Path) -> PathBuf {
    let mut name = vault_path.as_os_str().to_os_string();
    name.push(".sync");
    PathBuf::from(name)
}

/// Load the recorded sync point.
///
/// A missing sidecar means the vault was never synced. A corrupt sidecar
/// is an explicit error; silently treating it as never-synced would turn
/// real divergence into a spurious conflict or, worse, a forced choice
/// made on bad information.
pub fn load(vault_path: &Path) -> Result<Option<SyncPoint>> {
    let path = sidecar_path(vault_path);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(SyncError::State(format!(
                "read {}: {}",
                path.display(),
                err
            )))
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| SyncError::State(format!("parse {}: {}", path.display(), err)))
}

/// Record a new sync point atomically.
pub fn record(vault_path: &Path, id: RevisionId) -> Result<SyncPoint> {
    let point = SyncPoint {
        revision: id.revision,
        device_id: id.device_id,
        synced_at: Utc::now(),
    };
    let bytes = serde_json::to_vec_pretty(&point)
        .map_err(|err| SyncError::State(err.to_string()))?;
    atomic_write(&sidecar_path(vault_path), &bytes)
        .map_err(|err| SyncError::State(format!("write sync point: {}", err)))?;
    Ok(point)
}

/// Forget the sync point (used when detaching a vault from an account).
pub fn clear(vault_path: &Path) -> Result<()> {
    match std::fs::remove_file(sidecar_path(vault_path)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SyncError::State(format!("remove sync point: {}", err))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn missing_sidecar_reads_as_never_synced() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("vault.hv");
        assert_eq!(load(&vault).unwrap(), None);
    }

    #[test]
    fn record_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("vault.hv");
        let id = RevisionId {
            revision: 7,
            device_id: Uuid::new_v4(),
        };

        let recorded = record(&vault, id).unwrap();
        let loaded = load(&vault).unwrap().unwrap();
        assert_eq!(loaded, recorded);
        assert_eq!(loaded.revision_id(), id);
        assert!(sidecar_path(&vault).ends_with("vault.hv.sync"));
    }

    #[test]
    fn corrupt_sidecar_is_an_error_not_never_synced() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("vault.hv");
        std::fs::write(sidecar_path(&vault), b"{not json").unwrap();

        assert!(matches!(load(&vault), Err(SyncError::State(_))));
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("vault.hv");
        record(
            &vault,
            RevisionId {
                revision: 1,
                device_id: Uuid::new_v4(),
            },
        )
        .unwrap();

        clear(&vault).unwrap();
        clear(&vault).unwrap();
        assert_eq!(load(&vault).unwrap(), None);
    }
}
