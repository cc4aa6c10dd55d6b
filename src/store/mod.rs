//! Remote object store boundary
//!
//! This module is organized into submodules:
//! - `r2`: AWS SDK transport (simple PUT, concurrent multipart)
//! - `presigned`: SigV4 presigned PUT streamed through reqwest

mod presigned;
mod r2;

use crate::intake::FileContent;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

pub use presigned::{presign_put_url, PresignedStore};
pub use r2::{create_r2_client, R2Config, R2Store};

/// Progress callback: `(bytes_transferred, total_bytes)`
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}")]
    Client(String),
    #[error("{0}")]
    Request(String),
    #[error("Upload failed: {status} - {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    Multipart(String),
    #[error("Failed to read upload body: {0}")]
    Body(String),
}

/// Write-only view of the object store used by the upload queue
pub trait ObjectStore: Send + Sync + 'static {
    /// Upload `body` under `key`, reporting progress as the transfer advances.
    /// Resolves once the store has accepted the object or the transfer failed.
    /// Disk-backed bodies are read as they are sent.
    fn put_resumable(
        &self,
        key: &str,
        body: FileContent,
        content_type: &str,
        progress: ProgressCallback,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
