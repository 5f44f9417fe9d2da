//! Backend wire format for the encrypted file API (`/files/v3`).
//!
//! Every binary field travels as standard base64. These structs carry the
//! strings untouched; length and alphabet validation happens when
//! `zkbox-crypto` converts them into `EnvelopeMetadata`, before any field is
//! used as key, IV, or ciphertext.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{ZkError, ZkResult};

/// Object name sent to storage in place of the real filename.
pub const PLACEHOLDER_FILENAME: &str = "encrypted.bin";

/// MIME type for every ciphertext body.
pub const CIPHERTEXT_MIME_TYPE: &str = "application/octet-stream";

pub const HEADER_CIPHER_IV: &str = "X-Cipher-Iv";
pub const HEADER_EDEK: &str = "X-Edek";
pub const HEADER_EDEK_IV: &str = "X-Edek-Iv";
pub const HEADER_META_NAME_ENC: &str = "X-Meta-Name-Enc";
pub const HEADER_META_NAME_IV: &str = "X-Meta-Name-Iv";

/// The envelope metadata the backend stores verbatim and never decrypts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMetadata {
    pub cipher_iv: String,
    pub edek: String,
    pub edek_iv: String,
    pub meta_name_enc: String,
    pub meta_name_iv: String,
}

impl WireMetadata {
    /// Rebuild metadata from download response headers.
    ///
    /// Header names are matched case-insensitively. A response missing any
    /// header is rejected as a whole.
    pub fn from_headers(headers: &HashMap<String, String>) -> ZkResult<Self> {
        let lookup = |name: &str| -> ZkResult<String> {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.trim().to_string())
                .ok_or_else(|| ZkError::protocol(format!("download response missing {name} header")))
        };

        Ok(Self {
            cipher_iv: lookup(HEADER_CIPHER_IV)?,
            edek: lookup(HEADER_EDEK)?,
            edek_iv: lookup(HEADER_EDEK_IV)?,
            meta_name_enc: lookup(HEADER_META_NAME_ENC)?,
            meta_name_iv: lookup(HEADER_META_NAME_IV)?,
        })
    }

    pub fn to_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            (HEADER_CIPHER_IV.to_string(), self.cipher_iv.clone()),
            (HEADER_EDEK.to_string(), self.edek.clone()),
            (HEADER_EDEK_IV.to_string(), self.edek_iv.clone()),
            (HEADER_META_NAME_ENC.to_string(), self.meta_name_enc.clone()),
            (HEADER_META_NAME_IV.to_string(), self.meta_name_iv.clone()),
        ])
    }
}

/// `POST /files/v3/presign-upload`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignUploadRequest {
    pub filename: String,
    pub mime_type: String,
    pub cipher_size_bytes: u64,
    pub folder_id: Option<String>,
    pub is_encrypted: bool,
    pub is_hidden: bool,
    #[serde(flatten)]
    pub metadata: WireMetadata,
    /// File id this upload supersedes as a new version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
}

impl PresignUploadRequest {
    pub fn new(
        cipher_size_bytes: u64,
        folder_id: Option<String>,
        is_hidden: bool,
        metadata: WireMetadata,
    ) -> Self {
        Self {
            filename: PLACEHOLDER_FILENAME.to_string(),
            mime_type: CIPHERTEXT_MIME_TYPE.to_string(),
            cipher_size_bytes,
            folder_id,
            is_encrypted: true,
            is_hidden,
            metadata,
            replaces: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignUploadResponse {
    pub file_id: String,
    pub upload_url: String,
}

/// `POST /files/v3/{fileId}/complete`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub success: bool,
    #[serde(flatten)]
    pub metadata: WireMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new_version: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
}

/// `GET /files/v3/{fileId}/download`: raw body plus response headers,
/// before any validation.
#[derive(Debug, Clone, Default)]
pub struct RawDownload {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}
