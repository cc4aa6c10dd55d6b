//! Batch upload worker: runs every eligible entry's transfer concurrently and
//! folds transfer callbacks back into queue state

use super::events::{upload_notice, QueueEvent};
use super::types::{BatchResult, EntryId, PendingUpload, UploadStatus};
use super::{Inner, UploadQueue};
use crate::intake::MediaKind;
use crate::store::{ObjectStore, ProgressCallback};
use futures_util::future::join_all;
use log::{info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

/// Destination key `"{images|videos}/{token}-{file name}"`, fresh token per call
pub fn object_key(kind: MediaKind, file_name: &str) -> String {
    format!("{}/{}-{}", kind.folder(), Uuid::new_v4(), file_name)
}

/// Marks a batch as in flight until dropped
struct BatchGuard<'a>(&'a Inner);

impl<'a> BatchGuard<'a> {
    fn enter(inner: &'a Inner) -> Self {
        inner.batches_in_flight.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.batches_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-transfer callbacks, applied to the latest queue state by entry id
#[derive(Clone)]
struct TransferObserver {
    inner: Weak<Inner>,
    id: EntryId,
}

impl TransferObserver {
    fn update<F>(&self, f: F) -> Option<(Arc<Inner>, PendingUpload)>
    where
        F: FnOnce(PendingUpload) -> PendingUpload,
    {
        let inner = self.inner.upgrade()?;
        let entry = inner.apply(self.id, f)?;
        Some((inner, entry))
    }

    fn emit_status(inner: &Inner, entry: &PendingUpload) {
        inner.emit(QueueEvent::StatusChanged {
            entry_id: entry.id,
            status: entry.status,
            error: entry.error.clone(),
        });
    }

    fn on_progress(&self, transferred: u64, total: u64) {
        if let Some((inner, entry)) = self.update(|e| e.with_progress(transferred, total)) {
            if entry.status == UploadStatus::Uploading {
                inner.emit(QueueEvent::Progress {
                    entry_id: entry.id,
                    percent: entry.progress_percent,
                    transferred_bytes: transferred,
                    total_bytes: total,
                });
            }
        }
    }

    fn on_error(&self, message: String) {
        warn!("upload_status: {} -> error error={}", self.id, message);
        if let Some((inner, entry)) = self.update(|e| e.fail(message)) {
            Self::emit_status(&inner, &entry);
        }
    }

    /// Mark done, then remove the entry once the display delay has passed
    fn on_complete(&self, display_delay: Duration) {
        info!("upload_status: {} -> done", self.id);
        if let Some((inner, entry)) = self.update(PendingUpload::complete) {
            Self::emit_status(&inner, &entry);
        }

        let weak = self.inner.clone();
        let id = self.id;
        tokio::spawn(async move {
            tokio::time::sleep(display_delay).await;
            // A dropped queue has already released its previews
            if let Some(inner) = weak.upgrade() {
                inner.remove(id);
            }
        });
    }
}

impl<S: ObjectStore> UploadQueue<S> {
    /// Upload every Queued or Error entry concurrently and wait for all of
    /// them. Failures stay on their entry; the batch itself never fails.
    pub async fn upload_all(&self) -> BatchResult {
        let guard = BatchGuard::enter(&self.inner);
        let started = self.inner.lock().start_eligible();

        if started.is_empty() {
            return BatchResult::default();
        }

        let total = started.len();
        info!("batch_start: {} entries", total);
        for entry in &started {
            TransferObserver::emit_status(&self.inner, entry);
        }

        let outcomes = join_all(started.into_iter().map(|entry| self.upload_entry(entry))).await;
        drop(guard);

        let succeeded = outcomes.into_iter().filter(|ok| *ok).count();
        info!("batch_done: {}/{} succeeded", succeeded, total);

        if succeeded > 0 {
            self.inner.emit(QueueEvent::Notice {
                message: upload_notice(succeeded),
                dismiss_after_ms: self.config.notice_duration_ms,
            });
        }
        self.inner
            .emit(QueueEvent::BatchFinished { succeeded, total });

        BatchResult { succeeded, total }
    }

    async fn upload_entry(&self, entry: PendingUpload) -> bool {
        let observer = TransferObserver {
            inner: Arc::downgrade(&self.inner),
            id: entry.id,
        };

        let key = object_key(entry.kind, &entry.file.name);
        info!("upload_start: {} key={} size={}", entry.id, key, entry.file.size);

        let progress: ProgressCallback = {
            let observer = observer.clone();
            Arc::new(move |transferred: u64, total: u64| {
                observer.on_progress(transferred, total)
            })
        };

        match self
            .store
            .put_resumable(&key, entry.file.content.clone(), &entry.file.content_type, progress)
            .await
        {
            Ok(()) => {
                observer.on_complete(self.config.completion_display_delay());
                true
            }
            Err(e) => {
                observer.on_error(e.to_string());
                false
            }
        }
    }
}
