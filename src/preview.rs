//! Local preview resources for queued files
//!
//! Every queued entry owns exactly one preview. The resource is acquired at
//! intake and handed back through [`PreviewLease`], which releases it when
//! dropped, so removal, completion, clearing and queue teardown all go
//! through the same path.

use crate::intake::{FileCandidate, FileContent};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::{Builder, NamedTempFile, TempDir};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreviewUrl(pub String);

impl std::fmt::Display for PreviewUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Failed to create preview: {0}")]
    Io(#[from] std::io::Error),
}

pub trait PreviewProvider: Send + Sync {
    fn acquire(&self, file: &FileCandidate) -> Result<PreviewUrl, PreviewError>;

    fn release(&self, url: &PreviewUrl);
}

/// Scoped ownership of one preview; releases it exactly once on drop
pub struct PreviewLease {
    url: PreviewUrl,
    provider: Arc<dyn PreviewProvider>,
}

impl PreviewLease {
    pub fn acquire(
        provider: Arc<dyn PreviewProvider>,
        file: &FileCandidate,
    ) -> Result<Self, PreviewError> {
        let url = provider.acquire(file)?;
        Ok(Self { url, provider })
    }

    pub fn url(&self) -> &PreviewUrl {
        &self.url
    }
}

impl Drop for PreviewLease {
    fn drop(&mut self) {
        debug!("preview_release: {}", self.url);
        self.provider.release(&self.url);
    }
}

impl std::fmt::Debug for PreviewLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewLease").field("url", &self.url).finish()
    }
}

/// Previews materialised as temporary files, deleted on release
pub struct TempFilePreviews {
    dir: TempDir,
    files: Mutex<HashMap<PreviewUrl, NamedTempFile>>,
}

impl TempFilePreviews {
    pub fn new() -> Result<Self, PreviewError> {
        let dir = Builder::new().prefix("gallery-previews").tempdir()?;
        Ok(Self {
            dir,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Number of previews currently held on disk
    pub fn live_count(&self) -> usize {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl PreviewProvider for TempFilePreviews {
    fn acquire(&self, file: &FileCandidate) -> Result<PreviewUrl, PreviewError> {
        use std::io::Write;

        let extension = std::path::Path::new(&file.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let mut temp = Builder::new()
            .prefix("preview-")
            .suffix(&extension)
            .tempfile_in(self.dir.path())?;
        match &file.content {
            FileContent::Memory(bytes) => temp.write_all(bytes)?,
            FileContent::Disk { path, .. } => {
                std::io::copy(&mut std::fs::File::open(path)?, &mut temp)?;
            }
        }
        temp.flush()?;

        let url = PreviewUrl(format!("file://{}", temp.path().display()));
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone(), temp);
        Ok(url)
    }

    fn release(&self, url: &PreviewUrl) {
        let removed = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
        match removed {
            Some(temp) => {
                if let Err(e) = temp.close() {
                    warn!("preview_release: failed to delete {}: {}", url, e);
                }
            }
            None => warn!("preview_release: unknown preview {}", url),
        }
    }
}
