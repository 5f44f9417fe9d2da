//! zkbox-transfer: drives the envelope protocol against a storage backend
//!
//! Upload is a two-phase commit: presign (metadata recorded, nothing
//! visible), PUT ciphertext, complete (the file becomes visible). A caller
//! that stops between steps leaves no committed file.

pub mod backend;
pub mod engine;
pub mod operator;

pub use backend::FileBackend;
pub use engine::{
    delete_file, download_file, open_shared_file, share_file, upload_file, write_output,
    ProgressFn, UploadOptions, UploadResult,
};
pub use operator::{build_operator, OperatorBackend};
