//! Upload queue: intake, removal, clearing and batch uploads
//!
//! The queue is an explicit state container. The view layer never mutates
//! entries; it reads [`UploadQueue::snapshot`] and listens to the
//! [`QueueEvent`] stream, while every transition goes through the queue's
//! own operations.

mod events;
mod state;
mod types;
mod worker;

use crate::config::QueueConfig;
use crate::intake::FileCandidate;
use crate::preview::{PreviewLease, PreviewProvider};
use crate::store::ObjectStore;
use log::{debug, info, warn};
use state::QueueState;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

pub use events::{follow_batch, upload_notice, QueueEvent};
pub use types::{
    percent_of, BatchResult, EntryId, PendingUpload, UploadStatus, MAX_IN_FLIGHT_PERCENT,
};
pub use worker::object_key;

/// State shared with transfer callbacks and removal timers
pub(crate) struct Inner {
    state: Mutex<QueueState>,
    events: broadcast::Sender<QueueEvent>,
    batches_in_flight: AtomicUsize,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Apply a transition to the latest value of entry `id`
    fn apply<F>(&self, id: EntryId, f: F) -> Option<PendingUpload>
    where
        F: FnOnce(PendingUpload) -> PendingUpload,
    {
        self.lock().update(id, f)
    }

    fn remove(&self, id: EntryId) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some((entry, lease)) => {
                // Dropping the lease releases the preview
                drop(lease);
                debug!("entry_removed: {} {}", id, entry.file.name);
                self.emit(QueueEvent::EntryRemoved { entry_id: id });
                true
            }
            None => false,
        }
    }
}

pub struct UploadQueue<S: ObjectStore> {
    inner: Arc<Inner>,
    store: S,
    previews: Arc<dyn PreviewProvider>,
    config: QueueConfig,
}

impl<S: ObjectStore> UploadQueue<S> {
    pub fn new(store: S, previews: Arc<dyn PreviewProvider>, config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                events,
                batches_in_flight: AtomicUsize::new(0),
            }),
            store,
            previews,
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Queue image and video files. Unsupported types and files already in
    /// the queue are skipped silently. Returns how many entries were added.
    ///
    /// Previews are acquired without holding the state lock, so a slow
    /// provider never stalls transfer callbacks.
    pub fn add_files<I>(&self, candidates: I) -> usize
    where
        I: IntoIterator<Item = FileCandidate>,
    {
        let mut accepted = Vec::new();
        {
            let state = self.inner.lock();
            let mut seen = HashSet::new();
            for file in candidates {
                let Some(kind) = file.kind() else {
                    debug!("intake_skip: {} unsupported type {}", file.name, file.content_type);
                    continue;
                };

                let dedupe_key = file.dedupe_key();
                if state.contains_dedupe_key(&dedupe_key) || !seen.insert(dedupe_key) {
                    debug!("intake_skip: {} already queued", file.name);
                    continue;
                }
                accepted.push((file, kind));
            }
        }

        let mut leased = Vec::with_capacity(accepted.len());
        for (file, kind) in accepted {
            match PreviewLease::acquire(self.previews.clone(), &file) {
                Ok(lease) => leased.push((file, kind, lease)),
                Err(e) => warn!("intake_skip: {} {}", file.name, e),
            }
        }

        let mut added = Vec::new();
        let mut raced = Vec::new();
        {
            let mut state = self.inner.lock();
            for (file, kind, lease) in leased {
                // Another intake may have queued the same file meanwhile
                if state.contains_dedupe_key(&file.dedupe_key()) {
                    debug!("intake_skip: {} already queued", file.name);
                    raced.push(lease);
                    continue;
                }
                let entry = PendingUpload::queued(file, kind, lease.url().clone());
                added.push(entry.id);
                state.push(entry, lease);
            }
        }
        drop(raced);

        for id in &added {
            self.inner.emit(QueueEvent::EntryAdded { entry_id: *id });
        }
        if !added.is_empty() {
            info!("intake: {} entries added", added.len());
        }
        added.len()
    }

    /// Remove one entry and release its preview; unknown ids are ignored
    pub fn remove(&self, id: EntryId) {
        self.inner.remove(id);
    }

    /// Remove every entry and release all previews. The view should not
    /// offer this while [`Self::is_uploading`] is true; the queue honours it
    /// regardless.
    pub fn clear_all(&self) {
        let leases = self.inner.lock().clear();
        let released = leases.len();
        drop(leases);
        if self.is_uploading() {
            warn!("queue_cleared: {} entries while a batch is in flight", released);
        } else {
            info!("queue_cleared: {} entries", released);
        }
        self.inner.emit(QueueEvent::QueueCleared);
    }

    /// Current entries in intake order
    pub fn snapshot(&self) -> Arc<Vec<PendingUpload>> {
        self.inner.lock().snapshot()
    }

    pub fn get(&self, id: EntryId) -> Option<PendingUpload> {
        self.snapshot().iter().find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// True while an `upload_all` batch is running
    pub fn is_uploading(&self) -> bool {
        self.inner.batches_in_flight.load(Ordering::SeqCst) > 0
    }
}
