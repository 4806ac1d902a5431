//! AES-256-GCM sealing of the vault payload.
//!
//! Uses AES-256-GCM with:
//! - 256-bit key derived from the master password
//! - 96-bit (12 byte) nonce, fresh for every encryption
//! - 128-bit authentication tag
//! - The container header bound as associated data

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroize;

use crate::crypto::{CryptoError, Result};

/// Key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;
/// Nonce length in bytes (96-bit GCM nonce).
pub const NONCE_LEN: usize = 12;
/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// The symmetric key protecting a vault, derived from the master password.
///
/// Zeroized on drop; lives only as long as a derivation or an open store
/// needs it.
pub struct VaultKey {
    key: [u8; KEY_LEN],
}

impl VaultKey {
    pub fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Generate a fresh random nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    Aes256Gcm::generate_nonce(&mut OsRng).into()
}

/// Encrypt the serialized payload.
///
/// `aad` is the encoded container header; binding it into the tag means any
/// header tampering (version, KDF parameters, salt, nonce, lengths) fails
/// authentication even though the header itself is cleartext. Returns
/// `ciphertext || tag`.
pub fn encrypt_payload(
    key: &VaultKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .encrypt(
            &Nonce::from(*nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))
}

/// Decrypt `ciphertext || tag` and verify the header.
///
/// Every failure collapses to `AuthenticationFailed`: a wrong password and
/// a tampered container are deliberately indistinguishable to the caller.
pub fn decrypt_payload(
    key: &VaultKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(
            &Nonce::from(*nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> VaultKey {
        VaultKey::from_bytes(rand::random())
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();
        let nonce = generate_nonce();
        let plaintext = b"host inventory goes here";
        let aad = b"header bytes";

        let ciphertext = encrypt_payload(&key, &nonce, plaintext, aad).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);

        let decrypted = decrypt_payload(&key, &nonce, &ciphertext, aad).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn fresh_nonces_differ() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let nonce = generate_nonce();
        let ciphertext = encrypt_payload(&test_key(), &nonce, b"secret", b"aad").unwrap();
        let result = decrypt_payload(&test_key(), &nonce, &ciphertext, b"aad");
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn tampered_ciphertext_detected() {
        let key = test_key();
        let nonce = generate_nonce();
        let mut ciphertext = encrypt_payload(&key, &nonce, b"secret", b"aad").unwrap();
        ciphertext[0] ^= 0xFF;
        assert!(matches!(
            decrypt_payload(&key, &nonce, &ciphertext, b"aad"),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_aad_detected() {
        let key = test_key();
        let nonce = generate_nonce();
        let ciphertext = encrypt_payload(&key, &nonce, b"secret", b"header v1").unwrap();
        assert!(matches!(
            decrypt_payload(&key, &nonce, &ciphertext, b"header v2"),
            Err(CryptoError::AuthenticationFailed)
        ));
    }
}
