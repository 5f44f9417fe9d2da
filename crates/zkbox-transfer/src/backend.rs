//! The storage backend seam.
//!
//! The production client speaks HTTP to the file service; tests and the
//! CLI's local mode use [`OperatorBackend`](crate::OperatorBackend). Both
//! see only ciphertext and base64 metadata.

use async_trait::async_trait;
use zkbox_core::types::{
    CompleteUploadRequest, CompleteUploadResponse, PresignUploadRequest, PresignUploadResponse,
    RawDownload,
};
use zkbox_core::ZkResult;

#[async_trait]
pub trait FileBackend: Send + Sync {
    /// `POST /files/v3/presign-upload`: reserve a file id and upload URL.
    async fn presign_upload(&self, req: &PresignUploadRequest) -> ZkResult<PresignUploadResponse>;

    /// `PUT {upload_url}` with the ciphertext body.
    async fn upload(&self, upload_url: &str, ciphertext: Vec<u8>) -> ZkResult<()>;

    /// `POST /files/v3/{file_id}/complete`: the commit point.
    async fn complete(
        &self,
        file_id: &str,
        req: &CompleteUploadRequest,
    ) -> ZkResult<CompleteUploadResponse>;

    /// `GET /files/v3/{file_id}/download`: ciphertext plus metadata headers.
    async fn download(&self, file_id: &str) -> ZkResult<RawDownload>;

    /// Remove a committed file.
    async fn delete(&self, file_id: &str) -> ZkResult<()>;
}
