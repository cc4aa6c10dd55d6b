//! File intake: candidate files, media classification and dedupe keys

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Fallback MIME type for files whose extension is unknown (rejected at intake)
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
/// Files at or above 100MB stay on disk and are read part by part
pub const IN_MEMORY_LIMIT: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MediaKind {
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "video")]
    Video,
}

impl MediaKind {
    /// Classify a MIME type. Anything that is not `image/*` or `video/*` is unsupported.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        if content_type.starts_with("video/") {
            Some(MediaKind::Video)
        } else if content_type.starts_with("image/") {
            Some(MediaKind::Image)
        } else {
            None
        }
    }

    /// Object store folder for this kind of media
    pub fn folder(&self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            MediaKind::Video => "videos",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Bytes of a candidate file, either held in memory or left on disk
#[derive(Debug, Clone)]
pub enum FileContent {
    Memory(Bytes),
    Disk { path: PathBuf, len: u64 },
}

impl FileContent {
    pub fn len(&self) -> u64 {
        match self {
            FileContent::Memory(bytes) => bytes.len() as u64,
            FileContent::Disk { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `range` of the content; disk content is read with one seek
    pub async fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        match self {
            FileContent::Memory(bytes) => Ok(bytes.slice(range.start as usize..range.end as usize)),
            FileContent::Disk { path, .. } => {
                let mut file = File::open(path).await?;
                file.seek(SeekFrom::Start(range.start)).await?;

                let mut buffer = vec![0u8; (range.end - range.start) as usize];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }

    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        self.read_range(0..self.len()).await
    }
}

impl From<Bytes> for FileContent {
    fn from(bytes: Bytes) -> Self {
        FileContent::Memory(bytes)
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        FileContent::Memory(Bytes::from(bytes))
    }
}

/// A file offered to the queue (drag-and-drop or file picker)
#[derive(Debug, Clone, Serialize)]
pub struct FileCandidate {
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub last_modified_ms: i64,
    #[serde(skip)]
    pub content: FileContent,
}

impl FileCandidate {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        last_modified_ms: i64,
        content: impl Into<FileContent>,
    ) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            content_type: content_type.into(),
            size: content.len(),
            last_modified_ms,
            content,
        }
    }

    /// Open a file from disk, taking its modification time from metadata and
    /// guessing the MIME type from the extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        Self::from_path_with_limit(path, IN_MEMORY_LIMIT).await
    }

    /// Like [`Self::from_path`]; files of `in_memory_limit` bytes or more are
    /// not loaded and stay on disk until uploaded.
    pub async fn from_path_with_limit(path: &Path, in_memory_limit: u64) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let last_modified_ms = metadata
            .modified()
            .map(|t| {
                t.duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as i64
            })
            .unwrap_or(0);

        let content = if metadata.len() < in_memory_limit {
            FileContent::Memory(Bytes::from(tokio::fs::read(path).await?))
        } else {
            FileContent::Disk {
                path: path.to_path_buf(),
                len: metadata.len(),
            }
        };

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let content_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(FALLBACK_CONTENT_TYPE);

        Ok(Self::new(name, content_type, last_modified_ms, content))
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_content_type(&self.content_type)
    }

    /// Identifies the same underlying file selected more than once
    pub fn dedupe_key(&self) -> String {
        format!("{}-{}-{}", self.name, self.size, self.last_modified_ms)
    }
}
