//! Binary container format for the vault file.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! [magic  b"HVLT" : 4 ]
//! [version        : u16]  currently 1
//! [kdf_id         : u8 ]  1 = Argon2id
//! [memory_kib     : u32]
//! [iterations     : u32]
//! [parallelism    : u32]
//! [salt_len       : u16]  currently 16
//! [salt           : salt_len]
//! [cipher_id      : u8 ]  1 = AES-256-GCM
//! [nonce_len      : u16]  currently 12
//! [nonce          : nonce_len]
//! [ciphertext_len : u32]  length of ciphertext || tag
//! [ciphertext||tag: ciphertext_len]
//! ```
//!
//! Everything before the ciphertext is authenticated as AAD, so header
//! tampering is caught by the AEAD tag even though the header is cleartext.

use crate::crypto::{KdfParams, NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::vault::{FormatError, Result, VaultError};

/// File magic.
pub const MAGIC: [u8; 4] = *b"HVLT";
/// Current container format version.
pub const FORMAT_VERSION: u16 = 1;
/// KDF algorithm id for Argon2id.
pub const KDF_ID_ARGON2ID: u8 = 1;
/// Cipher algorithm id for AES-256-GCM.
pub const CIPHER_ID_AES256_GCM: u8 = 1;

/// Header length for format version 1.
pub const HEADER_LEN: usize = 4 + 2 + 1 + 12 + 2 + SALT_LEN + 1 + 2 + NONCE_LEN + 4;

/// Decoded container header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultHeader {
    pub version: u16,
    pub kdf: KdfParams,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext_len: u32,
}

/// Borrowed view of a decoded container: parsed header, the exact header
/// bytes (the AAD), and the ciphertext.
#[derive(Debug)]
pub struct DecodedContainer<'a> {
    pub header: VaultHeader,
    pub aad: &'a [u8],
    pub ciphertext: &'a [u8],
}

/// Encode the container header for a payload of `ciphertext_len` bytes
/// (tag included). The returned bytes are the AAD for the encryption that
/// follows; appending the ciphertext yields the complete file.
pub fn encode_header(
    params: &KdfParams,
    salt: &[u8; SALT_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext_len: usize,
) -> Result<Vec<u8>> {
    let declared = u32::try_from(ciphertext_len)
        .map_err(|_| FormatError::InvalidField("ciphertext_len"))?;

    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(&MAGIC);
    push_u16(&mut out, FORMAT_VERSION);
    out.push(KDF_ID_ARGON2ID);
    push_u32(&mut out, params.memory_kib);
    push_u32(&mut out, params.iterations);
    push_u32(&mut out, params.parallelism);
    push_u16(&mut out, SALT_LEN as u16);
    out.extend_from_slice(salt);
    out.push(CIPHER_ID_AES256_GCM);
    push_u16(&mut out, NONCE_LEN as u16);
    out.extend_from_slice(nonce);
    push_u32(&mut out, declared);
    debug_assert_eq!(out.len(), HEADER_LEN);
    Ok(out)
}

/// Decode a container, validating the framing. Does not touch the
/// ciphertext; authentication happens at decryption.
pub fn decode(bytes: &[u8]) -> Result<DecodedContainer<'_>> {
    let mut reader = Reader::new(bytes);

    let magic = reader.read_array::<4>()?;
    if magic != MAGIC {
        return Err(FormatError::UnknownMagic.into());
    }

    let version = reader.read_u16()?;
    if version != FORMAT_VERSION {
        return Err(VaultError::UnsupportedVersion { found: version });
    }

    let kdf_id = reader.read_u8()?;
    if kdf_id != KDF_ID_ARGON2ID {
        return Err(FormatError::UnknownKdf(kdf_id).into());
    }
    let kdf = KdfParams {
        memory_kib: reader.read_u32()?,
        iterations: reader.read_u32()?,
        parallelism: reader.read_u32()?,
    };

    let salt_len = reader.read_u16()?;
    if salt_len as usize != SALT_LEN {
        return Err(FormatError::InvalidField("salt_len").into());
    }
    let salt = reader.read_array::<SALT_LEN>()?;

    let cipher_id = reader.read_u8()?;
    if cipher_id != CIPHER_ID_AES256_GCM {
        return Err(FormatError::UnknownCipher(cipher_id).into());
    }

    let nonce_len = reader.read_u16()?;
    if nonce_len as usize != NONCE_LEN {
        return Err(FormatError::InvalidField("nonce_len").into());
    }
    let nonce = reader.read_array::<NONCE_LEN>()?;

    let ciphertext_len = reader.read_u32()?;
    if (ciphertext_len as usize) < TAG_LEN {
        return Err(FormatError::InvalidField("ciphertext_len").into());
    }

    let header_end = reader.position();
    let actual = bytes.len() - header_end;
    if actual != ciphertext_len as usize {
        return Err(FormatError::LengthMismatch {
            declared: u64::from(ciphertext_len),
            actual: actual as u64,
        }
        .into());
    }

    Ok(DecodedContainer {
        header: VaultHeader {
            version,
            kdf,
            salt,
            nonce,
            ciphertext_len,
        },
        aad: &bytes[..header_end],
        ciphertext: &bytes[header_end..],
    })
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn take(&mut self, len: usize) -> std::result::Result<&'a [u8], FormatError> {
        if self.bytes.len() - self.position < len {
            return Err(FormatError::TruncatedHeader);
        }
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> std::result::Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> std::result::Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.read_array::<2>()?))
    }

    fn read_u32(&mut self) -> std::result::Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_array<const N: usize>(&mut self) -> std::result::Result<[u8; N], FormatError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Byte offsets within the version-1 header, for targeted tampering.
    const VERSION_OFFSET: usize = 4;
    const KDF_ID_OFFSET: usize = 6;
    const SALT_LEN_OFFSET: usize = 19;
    const CIPHER_ID_OFFSET: usize = 21 + SALT_LEN;

    fn sample_container() -> Vec<u8> {
        let params = KdfParams::default();
        let salt = [3u8; SALT_LEN];
        let nonce = [9u8; NONCE_LEN];
        let ciphertext = vec![0xAB; 40];
        let mut bytes = encode_header(&params, &salt, &nonce, ciphertext.len()).unwrap();
        bytes.extend_from_slice(&ciphertext);
        bytes
    }

    #[test]
    fn encode_decode_roundtrip() {
        let bytes = sample_container();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.header.version, FORMAT_VERSION);
        assert_eq!(decoded.header.kdf, KdfParams::default());
        assert_eq!(decoded.header.salt, [3u8; SALT_LEN]);
        assert_eq!(decoded.header.nonce, [9u8; NONCE_LEN]);
        assert_eq!(decoded.header.ciphertext_len, 40);
        assert_eq!(decoded.aad.len(), HEADER_LEN);
        assert_eq!(decoded.aad, &bytes[..HEADER_LEN]);
        assert_eq!(decoded.ciphertext, &[0xAB; 40][..]);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = sample_container();
        bytes[0] = b'X';
        assert!(matches!(
            decode(&bytes),
            Err(VaultError::Format(FormatError::UnknownMagic))
        ));
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut bytes = sample_container();
        bytes[VERSION_OFFSET] = 0x63;
        match decode(&bytes) {
            Err(VaultError::UnsupportedVersion { found }) => assert_eq!(found, 0x63),
            other => panic!("expected UnsupportedVersion, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unknown_kdf_rejected() {
        let mut bytes = sample_container();
        bytes[KDF_ID_OFFSET] = 7;
        assert!(matches!(
            decode(&bytes),
            Err(VaultError::Format(FormatError::UnknownKdf(7)))
        ));
    }

    #[test]
    fn unknown_cipher_rejected() {
        let mut bytes = sample_container();
        bytes[CIPHER_ID_OFFSET] = 9;
        assert!(matches!(
            decode(&bytes),
            Err(VaultError::Format(FormatError::UnknownCipher(9)))
        ));
    }

    #[test]
    fn bad_salt_len_rejected() {
        let mut bytes = sample_container();
        bytes[SALT_LEN_OFFSET] = 8;
        assert!(matches!(
            decode(&bytes),
            Err(VaultError::Format(FormatError::InvalidField("salt_len")))
        ));
    }

    #[test]
    fn truncation_rejected_at_every_header_length() {
        let bytes = sample_container();
        for len in 0..HEADER_LEN {
            let err = decode(&bytes[..len]).unwrap_err();
            assert!(
                matches!(err, VaultError::Format(FormatError::TruncatedHeader)),
                "prefix of {} bytes: {:?}",
                len,
                err
            );
        }
    }

    #[test]
    fn short_ciphertext_is_length_mismatch() {
        let bytes = sample_container();
        let truncated = &bytes[..bytes.len() - 5];
        assert!(matches!(
            decode(truncated),
            Err(VaultError::Format(FormatError::LengthMismatch {
                declared: 40,
                actual: 35,
            }))
        ));
    }

    #[test]
    fn trailing_bytes_are_length_mismatch() {
        let mut bytes = sample_container();
        bytes.extend_from_slice(&[0u8; 3]);
        assert!(matches!(
            decode(&bytes),
            Err(VaultError::Format(FormatError::LengthMismatch {
                declared: 40,
                actual: 43,
            }))
        ));
    }

    #[test]
    fn declared_length_below_tag_rejected() {
        let params = KdfParams::default();
        let mut bytes =
            encode_header(&params, &[0u8; SALT_LEN], &[0u8; NONCE_LEN], TAG_LEN - 1).unwrap();
        bytes.extend_from_slice(&[0u8; TAG_LEN - 1]);
        assert!(matches!(
            decode(&bytes),
            Err(VaultError::Format(FormatError::InvalidField(
                "ciphertext_len"
            )))
        ));
    }
}
