//! Queue entry types and the per-entry state machine

use crate::intake::{FileCandidate, MediaKind};
use crate::preview::PreviewUrl;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Highest progress an entry can show before the store confirms the upload
pub const MAX_IN_FLIGHT_PERCENT: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        EntryId(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UploadStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error,
}

impl UploadStatus {
    /// Entries picked up by the next batch
    pub fn is_eligible(&self) -> bool {
        matches!(self, UploadStatus::Queued | UploadStatus::Error)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Queued => write!(f, "queued"),
            UploadStatus::Uploading => write!(f, "uploading"),
            UploadStatus::Done => write!(f, "done"),
            UploadStatus::Error => write!(f, "error"),
        }
    }
}

/// One file queued for upload
#[derive(Debug, Clone, Serialize)]
pub struct PendingUpload {
    pub id: EntryId,
    pub dedupe_key: String,
    pub kind: MediaKind,
    pub preview: PreviewUrl,
    pub progress_percent: u8,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub file: FileCandidate,
}

impl PendingUpload {
    pub(crate) fn queued(file: FileCandidate, kind: MediaKind, preview: PreviewUrl) -> Self {
        Self {
            id: EntryId::new(),
            dedupe_key: file.dedupe_key(),
            kind,
            preview,
            progress_percent: 0,
            status: UploadStatus::Queued,
            error: None,
            file,
        }
    }

    /// Queued or Error -> Uploading, progress reset, previous error cleared
    pub(crate) fn start_upload(self) -> Self {
        if !self.status.is_eligible() {
            return self;
        }
        Self {
            status: UploadStatus::Uploading,
            progress_percent: 0,
            error: None,
            ..self
        }
    }

    /// Fold a progress callback into the entry; ignored unless uploading
    pub(crate) fn with_progress(self, transferred: u64, total: u64) -> Self {
        if self.status != UploadStatus::Uploading {
            return self;
        }
        let percent = percent_of(transferred, total).min(MAX_IN_FLIGHT_PERCENT);
        Self {
            progress_percent: self.progress_percent.max(percent),
            ..self
        }
    }

    pub(crate) fn fail(self, message: String) -> Self {
        if self.status != UploadStatus::Uploading {
            return self;
        }
        Self {
            status: UploadStatus::Error,
            error: Some(message),
            ..self
        }
    }

    pub(crate) fn complete(self) -> Self {
        if self.status != UploadStatus::Uploading {
            return self;
        }
        Self {
            status: UploadStatus::Done,
            progress_percent: 100,
            error: None,
            ..self
        }
    }
}

/// `round(transferred / total * 100)`, clamped to 0..=100; an empty total counts as 0
pub fn percent_of(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = ((transferred as f64 / total as f64) * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Outcome of one `upload_all` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub succeeded: usize,
    pub total: usize,
}
