//! Guest photo and video uploads for the wedding gallery.
//!
//! Files are queued through [`queue::UploadQueue`], which keeps one entry per
//! file, owns each entry's local preview and uploads every pending entry to
//! the object store concurrently when a batch is started.

pub mod config;
pub mod intake;
pub mod preview;
pub mod queue;
pub mod store;

pub use config::{QueueConfig, Transport, UploaderConfig};
pub use intake::{FileCandidate, FileContent, MediaKind};
pub use preview::{PreviewError, PreviewLease, PreviewProvider, PreviewUrl, TempFilePreviews};
pub use queue::{BatchResult, EntryId, PendingUpload, QueueEvent, UploadQueue, UploadStatus};
pub use store::{ObjectStore, PresignedStore, ProgressCallback, R2Config, R2Store, StoreError};
