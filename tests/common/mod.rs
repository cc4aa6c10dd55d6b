#![allow(dead_code)]

use gallery_uploader::preview::{PreviewError, PreviewProvider, PreviewUrl};
use gallery_uploader::store::{ObjectStore, ProgressCallback, StoreError};
use gallery_uploader::intake::FileContent;
use gallery_uploader::FileCandidate;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use tokio::sync::Semaphore;

pub fn image(name: &str, size: usize) -> FileCandidate {
    FileCandidate::new(name, "image/jpeg", 1_717_000_000_000, vec![7u8; size])
}

pub fn video(name: &str, size: usize) -> FileCandidate {
    FileCandidate::new(name, "video/mp4", 1_717_000_000_000, vec![9u8; size])
}

/// Object store whose outcome per file name is scripted by the test
#[derive(Default)]
pub struct ScriptedStore {
    failing: Mutex<HashSet<String>>,
    keys: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfers wait for `open_gate` before finishing
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn succeed(&self, name: &str) {
        self.failing.lock().unwrap().remove(name);
    }

    pub fn open_gate(&self) {
        // One permit, handed back on drop, lets every waiting transfer through
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    pub fn keys_for(&self, name: &str) -> Vec<String> {
        let suffix = format!("-{}", name);
        self.keys()
            .into_iter()
            .filter(|k| k.ends_with(&suffix))
            .collect()
    }
}

impl ObjectStore for ScriptedStore {
    async fn put_resumable(
        &self,
        key: &str,
        body: FileContent,
        _content_type: &str,
        progress: ProgressCallback,
    ) -> Result<(), StoreError> {
        self.keys.lock().unwrap().push(key.to_string());
        let total = body.len();

        progress(total / 2, total);
        tokio::task::yield_now().await;
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }

        let fails = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|name| key.ends_with(&format!("-{}", name)));
        if fails {
            return Err(StoreError::Request(
                "Upload request failed: connection reset".to_string(),
            ));
        }

        // Every byte sent before the store confirms
        progress(total, total);
        tokio::task::yield_now().await;
        Ok(())
    }
}

/// Preview provider that records every acquire and release
#[derive(Default)]
pub struct CountingPreviews {
    next: AtomicUsize,
    acquired: Mutex<Vec<PreviewUrl>>,
    released: Mutex<HashMap<PreviewUrl, usize>>,
}

impl CountingPreviews {
    pub fn acquired(&self) -> usize {
        self.acquired.lock().unwrap().len()
    }

    pub fn released(&self) -> usize {
        self.released.lock().unwrap().values().sum()
    }

    pub fn is_released(&self, url: &PreviewUrl) -> bool {
        self.released.lock().unwrap().contains_key(url)
    }

    /// Every acquired preview released exactly once
    pub fn assert_balanced(&self) {
        let acquired = self.acquired.lock().unwrap();
        let released = self.released.lock().unwrap();
        for url in acquired.iter() {
            assert_eq!(released.get(url), Some(&1), "preview {} not released exactly once", url);
        }
        assert_eq!(released.len(), acquired.len());
    }
}

impl PreviewProvider for CountingPreviews {
    fn acquire(&self, file: &FileCandidate) -> Result<PreviewUrl, PreviewError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let url = PreviewUrl(format!("blob:preview/{}/{}", n, file.name));
        self.acquired.lock().unwrap().push(url.clone());
        Ok(url)
    }

    fn release(&self, url: &PreviewUrl) {
        *self.released.lock().unwrap().entry(url.clone()).or_insert(0) += 1;
    }
}

/// Counting provider whose first acquire blocks until `unblock` is called
#[derive(Default)]
pub struct BlockingPreviews {
    pub counts: CountingPreviews,
    first_taken: AtomicBool,
    // (blocked, unblocked)
    state: Mutex<(bool, bool)>,
    changed: Condvar,
}

impl BlockingPreviews {
    pub fn wait_until_blocked(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.0 {
            state = self.changed.wait(state).unwrap();
        }
    }

    pub fn unblock(&self) {
        self.state.lock().unwrap().1 = true;
        self.changed.notify_all();
    }
}

impl PreviewProvider for BlockingPreviews {
    fn acquire(&self, file: &FileCandidate) -> Result<PreviewUrl, PreviewError> {
        if !self.first_taken.swap(true, Ordering::SeqCst) {
            let mut state = self.state.lock().unwrap();
            state.0 = true;
            self.changed.notify_all();
            while !state.1 {
                state = self.changed.wait(state).unwrap();
            }
        }
        self.counts.acquire(file)
    }

    fn release(&self, url: &PreviewUrl) {
        self.counts.release(url);
    }
}
