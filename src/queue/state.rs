//! Copy-on-write queue state

use super::types::{EntryId, PendingUpload};
use crate::preview::PreviewLease;
use std::collections::HashMap;
use std::sync::Arc;

/// Entries in intake order plus the preview each one owns.
///
/// `entries` is shared with snapshot readers; every mutation goes through
/// `Arc::make_mut`, so a snapshot taken earlier never changes underneath its
/// holder and each update is applied to the latest vector.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    entries: Arc<Vec<PendingUpload>>,
    leases: HashMap<EntryId, PreviewLease>,
}

impl QueueState {
    pub fn snapshot(&self) -> Arc<Vec<PendingUpload>> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_dedupe_key(&self, dedupe_key: &str) -> bool {
        self.entries.iter().any(|e| e.dedupe_key == dedupe_key)
    }

    pub fn push(&mut self, entry: PendingUpload, lease: PreviewLease) {
        self.leases.insert(entry.id, lease);
        Arc::make_mut(&mut self.entries).push(entry);
    }

    /// Replace the entry with `id` by `f(entry)`; returns the new value
    pub fn update<F>(&mut self, id: EntryId, f: F) -> Option<PendingUpload>
    where
        F: FnOnce(PendingUpload) -> PendingUpload,
    {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        let entries = Arc::make_mut(&mut self.entries);
        let updated = f(entries[pos].clone());
        entries[pos] = updated.clone();
        Some(updated)
    }

    /// Move every Queued or Error entry to Uploading and return them.
    /// Selection and transition happen together, so concurrent batches never
    /// claim the same entry.
    pub fn start_eligible(&mut self) -> Vec<PendingUpload> {
        if !self.entries.iter().any(|e| e.status.is_eligible()) {
            return Vec::new();
        }
        Arc::make_mut(&mut self.entries)
            .iter_mut()
            .filter(|e| e.status.is_eligible())
            .map(|e| {
                *e = e.clone().start_upload();
                e.clone()
            })
            .collect()
    }

    /// Take the entry out together with its preview lease. The caller drops
    /// the lease, which releases the preview.
    pub fn remove(&mut self, id: EntryId) -> Option<(PendingUpload, Option<PreviewLease>)> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        let entry = Arc::make_mut(&mut self.entries).remove(pos);
        let lease = self.leases.remove(&id);
        Some((entry, lease))
    }

    pub fn clear(&mut self) -> Vec<PreviewLease> {
        self.entries = Arc::new(Vec::new());
        self.leases.drain().map(|(_, lease)| lease).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::QueueState;
    use crate::intake::{FileCandidate, MediaKind};
    use crate::preview::{PreviewError, PreviewLease, PreviewProvider, PreviewUrl};
    use crate::queue::types::{PendingUpload, UploadStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counting {
        released: AtomicUsize,
    }

    impl PreviewProvider for Counting {
        fn acquire(&self, file: &FileCandidate) -> Result<PreviewUrl, PreviewError> {
            Ok(PreviewUrl(format!("mem://{}", file.name)))
        }

        fn release(&self, _url: &PreviewUrl) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn push(state: &mut QueueState, provider: &Arc<Counting>, name: &str) -> PendingUpload {
        let file = FileCandidate::new(name, "image/png", 1, vec![0u8; 4]);
        let lease = PreviewLease::acquire(provider.clone(), &file).unwrap();
        let entry = PendingUpload::queued(file, MediaKind::Image, lease.url().clone());
        state.push(entry.clone(), lease);
        entry
    }

    #[test]
    fn snapshots_are_not_affected_by_later_updates() {
        let provider = Arc::new(Counting::default());
        let mut state = QueueState::default();
        let entry = push(&mut state, &provider, "a.png");

        let before = state.snapshot();
        state.update(entry.id, PendingUpload::start_upload);

        assert_eq!(before[0].status, UploadStatus::Queued);
        assert_eq!(state.snapshot()[0].status, UploadStatus::Uploading);
    }

    #[test]
    fn start_eligible_claims_queued_and_failed_entries_once() {
        let provider = Arc::new(Counting::default());
        let mut state = QueueState::default();
        let queued = push(&mut state, &provider, "a.png");
        let failed = push(&mut state, &provider, "b.png");
        let done = push(&mut state, &provider, "c.png");
        state.update(failed.id, |e| e.start_upload().fail("timeout".to_string()));
        state.update(done.id, |e| e.start_upload().complete());

        let before = state.snapshot();
        let started = state.start_eligible();
        let ids: Vec<_> = started.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![queued.id, failed.id]);
        assert!(started.iter().all(|e| e.status == UploadStatus::Uploading));
        assert_eq!(started[1].error, None);
        assert_eq!(before[0].status, UploadStatus::Queued);
        assert_eq!(state.snapshot()[2].status, UploadStatus::Done);

        assert!(state.start_eligible().is_empty());
    }

    #[test]
    fn update_unknown_id_is_none() {
        let mut state = QueueState::default();
        assert!(state
            .update(crate::queue::types::EntryId::new(), |e| e)
            .is_none());
    }

    #[test]
    fn remove_and_clear_hand_back_leases() {
        let provider = Arc::new(Counting::default());
        let mut state = QueueState::default();
        let first = push(&mut state, &provider, "a.png");
        push(&mut state, &provider, "b.png");
        push(&mut state, &provider, "c.png");
        assert!(state.contains_dedupe_key(&first.dedupe_key));

        let (removed, lease) = state.remove(first.id).unwrap();
        assert_eq!(removed.id, first.id);
        assert_eq!(provider.released.load(Ordering::SeqCst), 0);
        drop(lease);
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);
        assert!(state.remove(first.id).is_none());

        let leases = state.clear();
        assert_eq!(leases.len(), 2);
        assert_eq!(state.len(), 0);
        drop(leases);
        assert_eq!(provider.released.load(Ordering::SeqCst), 3);
    }
}
