//! Master-password cache with an explicit lifetime.

use std::fmt;

use zeroize::Zeroizing;

/// Holds the master password for an open vault so that every `save()` can
/// re-derive the encryption key without prompting again.
///
/// The cache is injected into the store at create/open time and dropped
/// (and zeroized) with it. It is never global and never written to disk.
pub struct CredentialCache {
    secret: Zeroizing<Vec<u8>>,
}

impl CredentialCache {
    pub fn new(password: &str) -> Self {
        Self {
            secret: Zeroizing::new(password.as_bytes().to_vec()),
        }
    }

    /// Snapshot of the password bytes for a blocking crypto task. The
    /// snapshot zeroizes itself when the task finishes.
    pub(crate) fn secret(&self) -> Zeroizing<Vec<u8>> {
        self.secret.clone()
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_the_password() {
        let cache = CredentialCache::new("hunter2");
        let printed = format!("{:?}", cache);
        assert!(!printed.contains("hunter2"));
    }
}
