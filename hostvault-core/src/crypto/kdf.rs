//! Argon2id key derivation for the vault master password.
//!
//! Default parameters:
//! - Memory cost: 64 MiB (65,536 KiB)
//! - Time cost: 3 iterations
//! - Parallelism: 2 lanes
//! - Output length: 32 bytes (256 bits)
//! - Salt length: 16 bytes
//!
//! The parameters of an existing container are honored when re-deriving,
//! but never below the enforced floor: a container presenting weakened
//! parameters is refused rather than opened.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoError, Result, VaultKey, KEY_LEN};

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Minimum acceptable memory cost in KiB (19 MiB).
pub const MIN_MEMORY_KIB: u32 = 19_456;
/// Minimum acceptable iteration count.
pub const MIN_ITERATIONS: u32 = 2;
/// Minimum acceptable parallelism.
pub const MIN_PARALLELISM: u32 = 1;

/// Parameters for Argon2id key derivation.
///
/// Stored in cleartext in the container header so that any device holding
/// the password can re-derive the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,

    /// Time cost (number of iterations)
    pub iterations: u32,

    /// Parallelism (number of lanes)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65_536, // 64 MiB
            iterations: 3,
            parallelism: 2,
        }
    }
}

impl KdfParams {
    /// The weakest parameters still accepted. Used by tests and
    /// resource-constrained callers.
    pub fn minimum() -> Self {
        Self {
            memory_kib: MIN_MEMORY_KIB,
            iterations: MIN_ITERATIONS,
            parallelism: MIN_PARALLELISM,
        }
    }

    /// Verify that parameters meet the enforced floor.
    ///
    /// Containers carry their KDF parameters in the clear; without this
    /// check an attacker could rewrite the header to near-zero cost and
    /// brute-force the password offline at full speed.
    pub fn validate(&self) -> Result<()> {
        if self.memory_kib < MIN_MEMORY_KIB {
            return Err(CryptoError::WeakKdfParams {
                field: "memory_kib",
                minimum: MIN_MEMORY_KIB,
                actual: self.memory_kib,
            });
        }
        if self.iterations < MIN_ITERATIONS {
            return Err(CryptoError::WeakKdfParams {
                field: "iterations",
                minimum: MIN_ITERATIONS,
                actual: self.iterations,
            });
        }
        if self.parallelism < MIN_PARALLELISM {
            return Err(CryptoError::WeakKdfParams {
                field: "parallelism",
                minimum: MIN_PARALLELISM,
                actual: self.parallelism,
            });
        }
        Ok(())
    }
}

/// Derive the vault key from a master password using Argon2id.
///
/// Deterministic: the same password, salt, and parameters always produce
/// the same key. A wrong password produces a wrong key, which is only
/// detected when AEAD decryption fails.
pub fn derive_key(password: &[u8], salt: &[u8; SALT_LEN], params: &KdfParams) -> Result<VaultKey> {
    params.validate()?;

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::KdfFailed(format!("Invalid parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut output = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KdfFailed(format!("Derivation failed: {}", e)))?;

    Ok(VaultKey::from_bytes(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_pass_validation() {
        let params = KdfParams::default();
        assert_eq!(params.memory_kib, 65_536);
        assert_eq!(params.iterations, 3);
        assert_eq!(params.parallelism, 2);
        assert!(params.validate().is_ok());
        assert!(KdfParams::minimum().validate().is_ok());
    }

    #[test]
    fn weakened_params_rejected() {
        let weak_memory = KdfParams {
            memory_kib: 1_024,
            ..KdfParams::minimum()
        };
        assert!(matches!(
            weak_memory.validate(),
            Err(CryptoError::WeakKdfParams {
                field: "memory_kib",
                ..
            })
        ));

        let weak_iterations = KdfParams {
            iterations: 1,
            ..KdfParams::minimum()
        };
        assert!(matches!(
            weak_iterations.validate(),
            Err(CryptoError::WeakKdfParams {
                field: "iterations",
                ..
            })
        ));

        let weak_parallelism = KdfParams {
            parallelism: 0,
            ..KdfParams::minimum()
        };
        assert!(weak_parallelism.validate().is_err());
    }

    #[test]
    fn derivation_is_deterministic() {
        let params = KdfParams::minimum();
        let salt = [7u8; SALT_LEN];

        let key1 = derive_key(b"correct horse", &salt, &params).unwrap();
        let key2 = derive_key(b"correct horse", &salt, &params).unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());

        let key3 = derive_key(b"wrong horse", &salt, &params).unwrap();
        assert_ne!(key1.as_bytes(), key3.as_bytes());
    }

    #[test]
    fn different_salt_different_key() {
        let params = KdfParams::minimum();
        let key1 = derive_key(b"password", &[1u8; SALT_LEN], &params).unwrap();
        let key2 = derive_key(b"password", &[2u8; SALT_LEN], &params).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn weak_params_refused_before_deriving() {
        let weak = KdfParams {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        };
        assert!(derive_key(b"password", &[0u8; SALT_LEN], &weak).is_err());
    }
}
