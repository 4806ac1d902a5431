//! Transport abstraction over the remote vault slot.
//!
//! The sync engine only ever needs three operations against the server:
//! peek at the stored revision, replace the stored container, and fetch
//! it. [`SyncClient`](crate::sync::SyncClient) implements this trait over
//! HTTP; [`InMemoryRemote`] implements it in-process for tests.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::sync::models::{RemoteVaultMeta, VaultTransfer};
use crate::sync::{Result, SyncError};

/// Remote side of the sync protocol. One encrypted container per account.
#[async_trait]
pub trait VaultTransport: Send + Sync {
    /// Revision currently stored on the server, `None` if the account has
    /// never uploaded a vault.
    async fn fetch_metadata(&self) -> Result<Option<RemoteVaultMeta>>;

    /// Replace the stored container. Returns the metadata the server now
    /// reports for it.
    async fn upload(&self, transfer: VaultTransfer) -> Result<RemoteVaultMeta>;

    /// Fetch the stored container.
    async fn download(&self) -> Result<VaultTransfer>;
}

/// In-process remote used by the sync tests. Behaves like the HTTP
/// transport, including the 404 on downloading from an empty account.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    stored: Mutex<Option<VaultTransfer>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the remote slot directly, bypassing the upload path.
    pub async fn put(&self, transfer: VaultTransfer) {
        *self.stored.lock().await = Some(transfer);
    }
}

#[async_trait]
impl VaultTransport for InMemoryRemote {
    async fn fetch_metadata(&self) -> Result<Option<RemoteVaultMeta>> {
        Ok(self.stored.lock().await.as_ref().map(VaultTransfer::metadata))
    }

    async fn upload(&self, transfer: VaultTransfer) -> Result<RemoteVaultMeta> {
        let meta = transfer.metadata();
        *self.stored.lock().await = Some(transfer);
        Ok(meta)
    }

    async fn download(&self) -> Result<VaultTransfer> {
        self.stored
            .lock()
            .await
            .clone()
            .ok_or_else(|| SyncError::Remote {
                status: 404,
                message: "No vault stored for this account".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn transfer(revision: u64) -> VaultTransfer {
        VaultTransfer {
            revision,
            device_id: Uuid::new_v4(),
            updated_at: Utc::now(),
            ciphertext: vec![0x48, 0x56, 0x4C, 0x54],
        }
    }

    #[tokio::test]
    async fn empty_remote_has_no_metadata_and_refuses_download() {
        let remote = InMemoryRemote::new();
        assert!(remote.fetch_metadata().await.unwrap().is_none());
        assert!(matches!(
            remote.download().await,
            Err(SyncError::Remote { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn upload_then_download_returns_the_same_container() {
        let remote = InMemoryRemote::new();
        let sent = transfer(3);
        let meta = remote.upload(sent.clone()).await.unwrap();
        assert_eq!(meta.revision, 3);

        let fetched = remote.download().await.unwrap();
        assert_eq!(fetched.ciphertext, sent.ciphertext);
        assert_eq!(remote.fetch_metadata().await.unwrap().unwrap().revision, 3);
    }
}
