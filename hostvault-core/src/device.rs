//! Per-installation device identity.
//!
//! Every revision a vault takes through this installation is stamped with
//! the device id, so the id must survive restarts. It lives unencrypted in
//! `device.json` next to the vaults; it identifies an installation, it
//! does not authenticate one.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::vault::store::atomic_write;
use crate::vault::{Result, VaultError};

pub const DEVICE_FILE: &str = "device.json";

/// A named installation of this application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: Uuid,
    pub name: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
}

impl DeviceIdentity {
    /// Mint a fresh identity for this installation.
    pub fn generate(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            platform: Self::current_platform().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Platform tag recorded at generation time, for device listings.
    pub fn current_platform() -> &'static str {
        if cfg!(target_os = "windows") {
            "windows"
        } else if cfg!(target_os = "macos") {
            "macos"
        } else if cfg!(target_os = "linux") {
            "linux"
        } else {
            "unknown"
        }
    }

    /// Load the identity stored in `dir`, generating and persisting one on
    /// first run. The stored id is reused on every later call so revisions
    /// from this installation stay attributable.
    pub fn load_or_generate(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(DEVICE_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| VaultError::Payload(format!("device identity: {}", e))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let identity = Self::generate(name);
                std::fs::create_dir_all(dir)?;
                let bytes = serde_json::to_vec_pretty(&identity)
                    .map_err(|e| VaultError::Payload(e.to_string()))?;
                atomic_write(&path, &bytes)?;
                info!(device_id = %identity.id, "generated new device identity");
                Ok(identity)
            }
            Err(err) => Err(err.into()),
        }
    }
}
