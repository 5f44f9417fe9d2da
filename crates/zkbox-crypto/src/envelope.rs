//! Envelope encryption: seal a file under a fresh DEK, wrap the DEK under
//! the master key, encrypt the name under the master key.
//!
//! `seal` and `open` are pure: they touch neither the network nor a session.
//! The transfer engine pulls the key from a [`KeySource`](crate::KeySource)
//! and drives the backend around them.

use zkbox_core::types::WireMetadata;
use zkbox_core::{AuthFailure, ZkError, ZkResult};

use crate::cipher::{decrypt, encrypt, generate_iv};
use crate::encoding::{decode_base64, decode_base64_fixed, encode_base64};
use crate::kdf::MasterKey;
use crate::keys::{generate_data_key, unwrap_data_key, wrap_data_key, WrappedKey};
use crate::names::{decrypt_name, encrypt_name, EncryptedName};
use crate::{EDEK_SIZE, IV_SIZE, TAG_SIZE};

/// Everything the backend stores next to the ciphertext. None of it is
/// secret without the master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeMetadata {
    pub cipher_iv: [u8; IV_SIZE],
    pub edek: [u8; EDEK_SIZE],
    pub edek_iv: [u8; IV_SIZE],
    pub encrypted_name: Vec<u8>,
    pub name_iv: [u8; IV_SIZE],
}

impl EnvelopeMetadata {
    pub fn wrapped_key(&self) -> WrappedKey {
        WrappedKey {
            edek: self.edek,
            iv: self.edek_iv,
        }
    }

    pub fn encrypted_name(&self) -> EncryptedName {
        EncryptedName {
            ciphertext: self.encrypted_name.clone(),
            iv: self.name_iv,
        }
    }

    /// Base64 wire form, as sent in presign/complete bodies.
    pub fn to_wire(&self) -> WireMetadata {
        WireMetadata {
            cipher_iv: encode_base64(&self.cipher_iv),
            edek: encode_base64(&self.edek),
            edek_iv: encode_base64(&self.edek_iv),
            meta_name_enc: encode_base64(&self.encrypted_name),
            meta_name_iv: encode_base64(&self.name_iv),
        }
    }

    /// Parse and size-check the wire form. Every IV must decode to 12 bytes,
    /// the EDEK to 48, and the encrypted name must at least hold a tag.
    pub fn from_wire(wire: &WireMetadata) -> ZkResult<Self> {
        let cipher_iv = decode_base64_fixed::<IV_SIZE>("cipherIv", &wire.cipher_iv)?;
        let edek = decode_base64_fixed::<EDEK_SIZE>("edek", &wire.edek)?;
        let edek_iv = decode_base64_fixed::<IV_SIZE>("edekIv", &wire.edek_iv)?;
        let encrypted_name = decode_base64("metaNameEnc", &wire.meta_name_enc)?;
        let name_iv = decode_base64_fixed::<IV_SIZE>("metaNameIv", &wire.meta_name_iv)?;

        if encrypted_name.len() < TAG_SIZE {
            return Err(ZkError::protocol(format!(
                "metaNameEnc: {} bytes is shorter than the {TAG_SIZE}-byte tag",
                encrypted_name.len()
            )));
        }

        Ok(Self {
            cipher_iv,
            edek,
            edek_iv,
            encrypted_name,
            name_iv,
        })
    }

    /// Validate download response headers (case-insensitive) into metadata.
    /// A missing header fails here, before any decryption is attempted.
    pub fn from_headers(headers: &std::collections::HashMap<String, String>) -> ZkResult<Self> {
        Self::from_wire(&WireMetadata::from_headers(headers)?)
    }
}

/// Output of [`seal`]: what gets uploaded.
#[derive(Debug, Clone)]
pub struct SealedFile {
    pub ciphertext: Vec<u8>,
    pub metadata: EnvelopeMetadata,
}

/// Output of [`open`] and of share-link decryption.
#[derive(Clone, PartialEq, Eq)]
pub struct OpenedFile {
    pub filename: String,
    pub plaintext: Vec<u8>,
}

impl std::fmt::Debug for OpenedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedFile")
            .field("filename", &"[REDACTED]")
            .field("len", &self.plaintext.len())
            .finish()
    }
}

/// Encrypt a file for upload.
///
/// A fresh DEK and three fresh IVs are drawn on every call, so sealing the
/// same bytes twice yields unrelated artifacts. The DEK is dropped (and
/// zeroed) before returning; only its wrapped form leaves this function.
pub fn seal(master: &MasterKey, file_bytes: &[u8], filename: &str) -> ZkResult<SealedFile> {
    let dek = generate_data_key()?;

    let cipher_iv = generate_iv()?;
    let ciphertext = encrypt(dek.as_bytes(), &cipher_iv, file_bytes)?;

    let wrapped = wrap_data_key(master, &dek)?;
    let name = encrypt_name(master.as_bytes(), filename)?;

    tracing::debug!(
        plaintext_len = file_bytes.len(),
        ciphertext_len = ciphertext.len(),
        "file sealed"
    );

    Ok(SealedFile {
        ciphertext,
        metadata: EnvelopeMetadata {
            cipher_iv,
            edek: wrapped.edek,
            edek_iv: wrapped.iv,
            encrypted_name: name.ciphertext,
            name_iv: name.iv,
        },
    })
}

/// Decrypt a downloaded file.
///
/// - EDEK does not unwrap: `Authentication(WrongKey)` (other account,
///   other password, or sealed elsewhere).
/// - Content or name fails its tag after a good unwrap:
///   `Authentication(CorruptedData)`.
/// - Name decrypts but is not UTF-8: `ProtocolViolation`.
pub fn open(
    master: &MasterKey,
    ciphertext: &[u8],
    metadata: &EnvelopeMetadata,
) -> ZkResult<OpenedFile> {
    let dek = unwrap_data_key(master, &metadata.wrapped_key())?;

    let plaintext = decrypt(dek.as_bytes(), &metadata.cipher_iv, ciphertext)
        .map_err(corrupted_on_auth_failure)?;

    let filename =
        decrypt_name(master.as_bytes(), &metadata.encrypted_name()).map_err(corrupted_on_auth_failure)?;

    tracing::debug!(plaintext_len = plaintext.len(), "file opened");
    Ok(OpenedFile {
        filename,
        plaintext,
    })
}

/// Past the EDEK unwrap the key is known good, so any tag failure means the
/// stored bytes were altered.
pub(crate) fn corrupted_on_auth_failure(err: ZkError) -> ZkError {
    match err {
        ZkError::Authentication(_) => ZkError::Authentication(AuthFailure::CorruptedData),
        other => other,
    }
}
