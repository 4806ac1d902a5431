//! Vault persistence: create/open/save orchestration.
//!
//! The store owns the decrypted payload of exactly one vault file. All
//! cryptographic work runs on the blocking thread pool, so the async
//! surface never stalls a runtime worker; blocking tasks run to completion
//! even if the caller's future is dropped, so a started save cannot be
//! cancelled into a half-written file.
//!
//! Disk writes are atomic: the container is written to a temp file in the
//! same directory, fsynced, then renamed over the destination. A crash at
//! any point leaves either the old vault or the new one, never a mix.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task;
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{self, KdfParams, SALT_LEN, TAG_LEN};
use crate::vault::format;
use crate::vault::model::{VaultData, VaultMeta, VaultModel};
use crate::vault::{CredentialCache, Result, VaultError};

/// An open vault. Dropping the store closes it and zeroizes the cached
/// credentials.
#[derive(Debug)]
pub struct VaultStore {
    path: PathBuf,
    credentials: CredentialCache,
    kdf: KdfParams,
    model: RwLock<VaultModel>,
    /// Serializes encode-and-write cycles on a shared handle.
    save_lock: Mutex<()>,
}

impl VaultStore {
    /// Create a new vault file at `path` containing `payload`, with default
    /// KDF parameters. Fails with `AlreadyExists` if the target is present.
    pub async fn create(
        path: impl Into<PathBuf>,
        credentials: CredentialCache,
        payload: VaultData,
    ) -> Result<Self> {
        Self::create_with_params(path, credentials, payload, KdfParams::default()).await
    }

    /// Create a new vault with explicit KDF parameters. The parameters
    /// must still meet the enforced floor.
    pub async fn create_with_params(
        path: impl Into<PathBuf>,
        credentials: CredentialCache,
        payload: VaultData,
        kdf: KdfParams,
    ) -> Result<Self> {
        let path = path.into();
        if tokio::fs::try_exists(&path).await? {
            return Err(VaultError::AlreadyExists(path));
        }
        payload.validate()?;
        kdf.validate()?;

        let device_id = payload.device_id;
        let secret = credentials.secret();
        let data = payload.clone();
        let target = path.clone();
        let (meta, _) =
            task::spawn_blocking(move || seal_to_disk(&target, &secret, &kdf, &data))
                .await
                .map_err(join_error)??;

        info!(path = %path.display(), revision = meta.revision, "created vault");
        Ok(Self {
            path,
            credentials,
            kdf,
            model: RwLock::new(VaultModel::new(payload, device_id)),
            save_lock: Mutex::new(()),
        })
    }

    /// Open an existing vault. `device_id` identifies this installation and
    /// is stamped onto every mutation made through the returned store.
    ///
    /// Format, version, KDF-floor, and authentication failures surface as
    /// distinct errors; a wrong password is indistinguishable from a
    /// tampered container.
    pub async fn open(
        path: impl Into<PathBuf>,
        credentials: CredentialCache,
        device_id: Uuid,
    ) -> Result<Self> {
        let path = path.into();
        let bytes = tokio::fs::read(&path).await?;
        let secret = credentials.secret();
        let (data, kdf) = task::spawn_blocking(move || unseal(&bytes, &secret))
            .await
            .map_err(join_error)??;

        info!(path = %path.display(), revision = data.revision, "opened vault");
        Ok(Self {
            path,
            credentials,
            kdf,
            model: RwLock::new(VaultModel::new(data, device_id)),
            save_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read access to the payload model.
    pub async fn model(&self) -> RwLockReadGuard<'_, VaultModel> {
        self.model.read().await
    }

    /// Write access for mutations. Follow with `save()` to persist; the
    /// revision already advanced in memory when the mutator returned.
    pub async fn model_mut(&self) -> RwLockWriteGuard<'_, VaultModel> {
        self.model.write().await
    }

    /// Sync-relevant summary of the current in-memory state.
    pub async fn local_meta(&self) -> VaultMeta {
        VaultMeta::of(self.model.read().await.data())
    }

    /// Re-encrypt the current payload with a fresh salt and nonce and
    /// replace the vault file atomically. Concurrent saves on a shared
    /// handle are serialized.
    pub async fn save(&self) -> Result<VaultMeta> {
        let (meta, _) = self.save_inner().await?;
        Ok(meta)
    }

    /// Save and additionally return the exact bytes written, for upload.
    pub async fn save_for_upload(&self) -> Result<(VaultMeta, Vec<u8>)> {
        self.save_inner().await
    }

    async fn save_inner(&self) -> Result<(VaultMeta, Vec<u8>)> {
        let _guard = self.save_lock.lock().await;

        let data = {
            let mut model = self.model.write().await;
            model.touch();
            model.data().clone()
        };
        let secret = self.credentials.secret();
        let kdf = self.kdf;
        let target = self.path.clone();

        let (meta, bytes) =
            task::spawn_blocking(move || seal_to_disk(&target, &secret, &kdf, &data))
                .await
                .map_err(join_error)??;
        info!(revision = meta.revision, bytes = bytes.len(), "saved vault");
        Ok((meta, bytes))
    }

    /// Replace this vault with a container received from sync.
    ///
    /// The remote bytes are authenticated with the cached credentials
    /// before anything local is replaced, then written to disk verbatim so
    /// the file matches the remote byte for byte.
    pub async fn adopt_remote(&self, bytes: Vec<u8>) -> Result<VaultMeta> {
        let _guard = self.save_lock.lock().await;

        let secret = self.credentials.secret();
        let target = self.path.clone();
        let data = task::spawn_blocking(move || -> Result<VaultData> {
            let (data, _) = unseal(&bytes, &secret)?;
            atomic_write(&target, &bytes)?;
            Ok(data)
        })
        .await
        .map_err(join_error)??;

        let meta = VaultMeta::of(&data);
        self.model.write().await.replace_data(data);
        info!(revision = meta.revision, "adopted remote vault");
        Ok(meta)
    }

    /// Jump the in-memory revision forward, stamping the local device.
    pub(crate) async fn promote_revision(&self, revision: u64) {
        self.model.write().await.promote_revision(revision);
    }
}

/// Serialize, encrypt with fresh randomness, and atomically persist.
fn seal_to_disk(
    path: &Path,
    secret: &[u8],
    kdf: &KdfParams,
    data: &VaultData,
) -> Result<(VaultMeta, Vec<u8>)> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(data).map_err(|e| VaultError::Payload(e.to_string()))?,
    );

    let salt: [u8; SALT_LEN] = rand::random();
    let nonce = crypto::generate_nonce();
    let key = crypto::derive_key(secret, &salt, kdf)?;

    let header = format::encode_header(kdf, &salt, &nonce, plaintext.len() + TAG_LEN)?;
    let ciphertext = crypto::encrypt_payload(&key, &nonce, &plaintext, &header)?;

    let mut bytes = header;
    bytes.extend_from_slice(&ciphertext);
    atomic_write(path, &bytes)?;

    Ok((VaultMeta::of(data), bytes))
}

/// Decode, floor-check, derive, decrypt, and validate a container.
fn unseal(bytes: &[u8], secret: &[u8]) -> Result<(VaultData, KdfParams)> {
    let decoded = format::decode(bytes)?;
    decoded.header.kdf.validate()?;

    let key = crypto::derive_key(secret, &decoded.header.salt, &decoded.header.kdf)?;
    let plaintext = Zeroizing::new(crypto::decrypt_payload(
        &key,
        &decoded.header.nonce,
        decoded.ciphertext,
        decoded.aad,
    )?);

    let data: VaultData =
        serde_json::from_slice(&plaintext).map_err(|e| VaultError::Payload(e.to_string()))?;
    data.validate()?;
    Ok((data, decoded.header.kdf))
}

/// Write `bytes` to `path` atomically: temp file in the same directory,
/// flush to stable storage, rename over the destination, then fsync the
/// directory. On any failure the previous file is untouched and the temp
/// file is removed.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
    })?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let written = (|| {
        let mut file = options.open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    // Persist the rename itself; ignore filesystems that refuse to fsync a
    // directory handle.
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(handle) = fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    Ok(())
}

fn join_error(err: task::JoinError) -> VaultError {
    VaultError::Io(std::io::Error::other(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.hv");

        atomic_write(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // No temp file left behind.
        assert!(!dir.path().join("vault.hv.tmp").exists());
    }

    #[test]
    fn failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // Renaming a file over an existing directory fails after the temp
        // file was written.
        let target = dir.path().join("occupied");
        fs::create_dir(&target).unwrap();

        let err = atomic_write(&target, b"data");
        assert!(err.is_err());
        assert!(target.is_dir());
        assert!(!dir.path().join("occupied.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn vault_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.hv");
        atomic_write(&path, b"secret").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
