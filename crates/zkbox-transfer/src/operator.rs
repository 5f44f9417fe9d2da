//! OpenDAL-backed reference backend
//!
//! Stores objects under `{prefix}/`:
//!
//! ```text
//! pending/{file_id}.json   presign record, removed on complete
//! blobs/{file_id}          ciphertext as PUT by the client
//! files/{file_id}.json     committed file record (the commit point)
//! ```
//!
//! Only ids with a `files/` record are visible. A presign or PUT that is never
//! completed leaves a pending record and blob behind that never surface.

use anyhow::{Context, Result};
use async_trait::async_trait;
use opendal::Operator;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zkbox_core::config::StorageConfig;
use zkbox_core::types::{
    CompleteUploadRequest, CompleteUploadResponse, PresignUploadRequest, PresignUploadResponse,
    RawDownload, WireMetadata, CIPHERTEXT_MIME_TYPE, PLACEHOLDER_FILENAME,
};
use zkbox_core::{ZkError, ZkResult};
use zkbox_crypto::EnvelopeMetadata;

use crate::backend::FileBackend;

const UPLOAD_URL_PREFIX: &str = "opendal://upload/";

/// Build an OpenDAL Operator for the configured backend ("memory" or "fs").
pub fn build_operator(cfg: &StorageConfig) -> Result<Operator> {
    let op = match cfg.backend.as_str() {
        "memory" => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),
        "fs" => {
            let root = cfg
                .root
                .to_str()
                .context("storage.root is not valid UTF-8")?;
            Operator::new(opendal::services::Fs::default().root(root))
                .with_context(|| format!("creating OpenDAL fs operator at {root}"))?
                .layer(opendal::layers::LoggingLayer::default())
                .finish()
        }
        other => anyhow::bail!("unknown storage backend: {other}"),
    };
    Ok(op)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingUpload {
    file_id: String,
    cipher_size_bytes: u64,
    folder_id: Option<String>,
    is_hidden: bool,
    metadata: WireMetadata,
    replaces: Option<String>,
    created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    file_id: String,
    filename: String,
    mime_type: String,
    cipher_size_bytes: u64,
    folder_id: Option<String>,
    is_hidden: bool,
    metadata: WireMetadata,
    previous_version: Option<String>,
    committed_at: u64,
}

/// Reference [`FileBackend`] over an OpenDAL [`Operator`].
#[derive(Clone)]
pub struct OperatorBackend {
    op: Operator,
    prefix: String,
}

impl OperatorBackend {
    pub fn new(op: Operator, prefix: impl Into<String>) -> Self {
        Self {
            op,
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// In-memory backend for tests.
    pub fn memory() -> Result<Self> {
        let op = Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish();
        Ok(Self::new(op, "zkbox"))
    }

    fn pending_key(&self, file_id: &str) -> String {
        format!("{}/pending/{file_id}.json", self.prefix)
    }

    fn blob_key(&self, file_id: &str) -> String {
        format!("{}/blobs/{file_id}", self.prefix)
    }

    fn file_key(&self, file_id: &str) -> String {
        format!("{}/files/{file_id}.json", self.prefix)
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> ZkResult<Option<T>> {
        match self.op.read(key).await {
            Ok(buf) => serde_json::from_slice(&buf.to_vec())
                .map(Some)
                .map_err(|e| ZkError::transport(format!("corrupt record {key}: {e}"))),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("reading", key, e)),
        }
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> ZkResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ZkError::Other(anyhow::anyhow!("serializing {key}: {e}")))?;
        self.op
            .write(key, bytes)
            .await
            .map_err(|e| storage_error("writing", key, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> ZkResult<bool> {
        self.op
            .exists(key)
            .await
            .map_err(|e| storage_error("stat", key, e))
    }

    async fn remove(&self, key: &str) -> ZkResult<()> {
        self.op
            .delete(key)
            .await
            .map_err(|e| storage_error("deleting", key, e))
    }
}

fn storage_error(op: &str, key: &str, e: opendal::Error) -> ZkError {
    ZkError::transport(format!("{op} {key}: {e}"))
}

fn rejected(msg: impl std::fmt::Display) -> ZkError {
    ZkError::transport(format!("backend rejected request: {msg}"))
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[async_trait]
impl FileBackend for OperatorBackend {
    async fn presign_upload(&self, req: &PresignUploadRequest) -> ZkResult<PresignUploadResponse> {
        if !req.is_encrypted {
            return Err(rejected("only encrypted uploads are accepted"));
        }
        if req.filename != PLACEHOLDER_FILENAME || req.mime_type != CIPHERTEXT_MIME_TYPE {
            return Err(rejected("encrypted uploads must use the placeholder name and type"));
        }
        EnvelopeMetadata::from_wire(&req.metadata).map_err(rejected)?;

        if let Some(prev) = &req.replaces {
            if !self.exists(&self.file_key(prev)).await? {
                return Err(rejected(format!("cannot replace unknown file {prev}")));
            }
        }

        let file_id = uuid::Uuid::new_v4().to_string();
        let pending = PendingUpload {
            file_id: file_id.clone(),
            cipher_size_bytes: req.cipher_size_bytes,
            folder_id: req.folder_id.clone(),
            is_hidden: req.is_hidden,
            metadata: req.metadata.clone(),
            replaces: req.replaces.clone(),
            created_at: unix_now(),
        };
        self.write_json(&self.pending_key(&file_id), &pending).await?;

        debug!(file_id = %file_id, size = req.cipher_size_bytes, "upload presigned");
        Ok(PresignUploadResponse {
            upload_url: format!("{UPLOAD_URL_PREFIX}{file_id}"),
            file_id,
        })
    }

    async fn upload(&self, upload_url: &str, ciphertext: Vec<u8>) -> ZkResult<()> {
        let file_id = upload_url
            .strip_prefix(UPLOAD_URL_PREFIX)
            .ok_or_else(|| rejected(format!("unknown upload URL {upload_url}")))?;
        let pending: PendingUpload = self
            .read_json(&self.pending_key(file_id))
            .await?
            .ok_or_else(|| rejected(format!("no pending upload for {file_id}")))?;

        if ciphertext.len() as u64 != pending.cipher_size_bytes {
            return Err(rejected(format!(
                "body is {} bytes, presigned for {}",
                ciphertext.len(),
                pending.cipher_size_bytes
            )));
        }

        let key = self.blob_key(file_id);
        self.op
            .write(&key, ciphertext)
            .await
            .map_err(|e| storage_error("writing", &key, e))?;
        Ok(())
    }

    async fn complete(
        &self,
        file_id: &str,
        req: &CompleteUploadRequest,
    ) -> ZkResult<CompleteUploadResponse> {
        let pending_key = self.pending_key(file_id);
        let pending: PendingUpload = self
            .read_json(&pending_key)
            .await?
            .ok_or_else(|| rejected(format!("no pending upload for {file_id}")))?;

        if !req.success {
            return Err(rejected("client reported a failed upload"));
        }
        if req.metadata != pending.metadata {
            return Err(rejected("completion metadata differs from presign"));
        }
        if !self.exists(&self.blob_key(file_id)).await? {
            return Err(rejected(format!("no ciphertext uploaded for {file_id}")));
        }

        let record = FileRecord {
            file_id: file_id.to_string(),
            filename: PLACEHOLDER_FILENAME.to_string(),
            mime_type: CIPHERTEXT_MIME_TYPE.to_string(),
            cipher_size_bytes: pending.cipher_size_bytes,
            folder_id: pending.folder_id,
            is_hidden: pending.is_hidden,
            metadata: pending.metadata,
            previous_version: pending.replaces.clone(),
            committed_at: unix_now(),
        };
        // Commit point: the file is visible once this record exists.
        self.write_json(&self.file_key(file_id), &record).await?;
        self.remove(&pending_key).await?;

        if let Some(prev) = &pending.replaces {
            if let Err(e) = self.remove(&self.file_key(prev)).await {
                warn!(file_id = %prev, "failed to retire previous version: {e}");
            } else if let Err(e) = self.remove(&self.blob_key(prev)).await {
                warn!(file_id = %prev, "orphaned blob of previous version: {e}");
            }
        }

        info!(file_id = %file_id, size = record.cipher_size_bytes, "upload committed");
        Ok(CompleteUploadResponse {
            is_new_version: Some(pending.replaces.is_some()),
            message: None,
            previous_version: pending.replaces,
        })
    }

    async fn download(&self, file_id: &str) -> ZkResult<RawDownload> {
        let record: FileRecord = self
            .read_json(&self.file_key(file_id))
            .await?
            .ok_or_else(|| ZkError::transport(format!("file {file_id} not found")))?;

        let key = self.blob_key(file_id);
        let body = self
            .op
            .read(&key)
            .await
            .map_err(|e| storage_error("reading", &key, e))?
            .to_vec();

        Ok(RawDownload {
            body,
            headers: record.metadata.to_headers(),
        })
    }

    async fn delete(&self, file_id: &str) -> ZkResult<()> {
        let file_key = self.file_key(file_id);
        if !self.exists(&file_key).await? {
            return Err(ZkError::transport(format!("file {file_id} not found")));
        }
        self.remove(&file_key).await?;
        self.remove(&self.blob_key(file_id)).await?;
        info!(file_id = %file_id, "file deleted");
        Ok(())
    }
}
