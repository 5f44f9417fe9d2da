//! Transfer engine: seal → presign → PUT → complete, and the reverse
//!
//! Each function pulls the master key through a [`KeySource`] once, which
//! also counts as session activity. Backend failures surface unchanged as
//! `Transport` and are not retried here; crypto failures are never retried.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zkbox_core::types::{CompleteUploadRequest, PresignUploadRequest};
use zkbox_core::{ZkError, ZkResult};
use zkbox_crypto::{
    create_share, open, open_shared, seal, EnvelopeMetadata, KeySource, OpenedFile, ShareFragment,
};

use crate::backend::FileBackend;

/// Progress callback type (steps_done, steps_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

const UPLOAD_STEPS: u64 = 4;

/// Placement options for a new upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub folder_id: Option<String>,
    pub is_hidden: bool,
    /// Upload as a new version of this file id (fresh DEK, fresh IVs).
    pub replaces: Option<String>,
}

/// Result of a committed upload
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub file_id: String,
    /// Plaintext size
    pub bytes: u64,
    /// Size on the backend (plaintext + 16-byte tag)
    pub cipher_bytes: u64,
    pub is_new_version: bool,
    pub previous_version: Option<String>,
}

fn report(progress: Option<&ProgressFn>, step: u64, msg: &str) {
    if let Some(cb) = progress {
        cb(step, UPLOAD_STEPS, msg);
    }
}

/// Encrypt `bytes` and upload them as `filename`.
///
/// The backend only ever sees the placeholder name, the ciphertext and the
/// base64 envelope metadata. Dropping the returned future before completion
/// leaves no committed file.
pub async fn upload_file<B, K>(
    backend: &B,
    keys: &K,
    bytes: &[u8],
    filename: &str,
    opts: &UploadOptions,
    progress: Option<&ProgressFn>,
) -> ZkResult<UploadResult>
where
    B: FileBackend + ?Sized,
    K: KeySource + ?Sized,
{
    let master = keys.master_key()?;

    report(progress, 0, "encrypting");
    let sealed = seal(&master, bytes, filename)?;
    drop(master);

    let wire = sealed.metadata.to_wire();
    let cipher_bytes = sealed.ciphertext.len() as u64;

    report(progress, 1, "requesting upload slot");
    let mut req = PresignUploadRequest::new(
        cipher_bytes,
        opts.folder_id.clone(),
        opts.is_hidden,
        wire.clone(),
    );
    req.replaces = opts.replaces.clone();
    let presigned = backend.presign_upload(&req).await?;
    debug!(file_id = %presigned.file_id, "presigned");

    report(progress, 2, "uploading ciphertext");
    backend
        .upload(&presigned.upload_url, sealed.ciphertext)
        .await?;

    report(progress, 3, "completing");
    let resp = backend
        .complete(
            &presigned.file_id,
            &CompleteUploadRequest {
                success: true,
                metadata: wire,
            },
        )
        .await?;
    report(progress, UPLOAD_STEPS, "done");

    info!(
        file_id = %presigned.file_id,
        bytes = bytes.len(),
        cipher_bytes,
        new_version = resp.is_new_version.unwrap_or(false),
        "uploaded"
    );

    Ok(UploadResult {
        file_id: presigned.file_id,
        bytes: bytes.len() as u64,
        cipher_bytes,
        is_new_version: resp.is_new_version.unwrap_or(false),
        previous_version: resp.previous_version,
    })
}

/// Download and decrypt a file.
///
/// Response headers are validated into [`EnvelopeMetadata`] before any
/// decryption; a missing or mis-sized header is a `ProtocolViolation`.
pub async fn download_file<B, K>(backend: &B, keys: &K, file_id: &str) -> ZkResult<OpenedFile>
where
    B: FileBackend + ?Sized,
    K: KeySource + ?Sized,
{
    let master = keys.master_key()?;

    let raw = backend.download(file_id).await?;
    let metadata = EnvelopeMetadata::from_headers(&raw.headers)?;
    let opened = open(&master, &raw.body, &metadata)?;

    info!(file_id = %file_id, bytes = opened.plaintext.len(), "downloaded");
    Ok(opened)
}

/// Build a share fragment for a file owned by the session's account.
pub async fn share_file<B, K>(backend: &B, keys: &K, file_id: &str) -> ZkResult<ShareFragment>
where
    B: FileBackend + ?Sized,
    K: KeySource + ?Sized,
{
    let master = keys.master_key()?;

    let raw = backend.download(file_id).await?;
    let metadata = EnvelopeMetadata::from_headers(&raw.headers)?;
    let fragment = create_share(&master, &metadata)?;

    info!(file_id = %file_id, "share link created");
    Ok(fragment)
}

/// Download and decrypt a shared file with nothing but the fragment.
pub async fn open_shared_file<B>(
    backend: &B,
    file_id: &str,
    fragment: &ShareFragment,
) -> ZkResult<OpenedFile>
where
    B: FileBackend + ?Sized,
{
    let raw = backend.download(file_id).await?;
    let opened = open_shared(fragment, &raw.body)?;

    info!(file_id = %file_id, bytes = opened.plaintext.len(), "shared file opened");
    Ok(opened)
}

/// Delete a committed file. Needs no key.
pub async fn delete_file<B>(backend: &B, file_id: &str) -> ZkResult<()>
where
    B: FileBackend + ?Sized,
{
    backend.delete(file_id).await
}

/// Write decrypted bytes to `path` atomically (tmp file + rename).
///
/// The caller chooses the location and owns the result, including cleanup.
pub async fn write_output(path: &Path, bytes: &[u8]) -> ZkResult<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("zkbox_tmp");
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ZkError::Io(e));
    }

    debug!(path = %path.display(), bytes = bytes.len(), "output written");
    Ok(path.to_path_buf())
}
