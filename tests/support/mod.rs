//! Shared fixtures: a scripted object store wrapping the in-memory backend.

#![allow(dead_code)]

use async_trait::async_trait;
use bucket_mirror_lib::core::{ProgressEvent, ProgressReader, SyncHandle, SyncReport};
use bucket_mirror_lib::error::{StorageError, UploadError};
use bucket_mirror_lib::storage::{
    NoProgress, ObjectMeta, ObjectStore, OperatorStore, RemoteObject, UploadProgress,
};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const MB: usize = 1024 * 1024;
pub const BUCKET: &str = "media";

/// In-memory store that can fail or hold uploads of chosen keys.
pub struct ScriptedStore {
    inner: OperatorStore,
    failing: HashSet<String>,
    failing_midway: HashSet<String>,
    stalled_listing: bool,
    held: HashSet<String>,
    release: Semaphore,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: OperatorStore::memory("scripted"),
            failing: HashSet::new(),
            failing_midway: HashSet::new(),
            stalled_listing: false,
            held: HashSet::new(),
            release: Semaphore::new(0),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Uploads of `key` fail as if retries were exhausted.
    pub fn failing(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }

    /// Uploads of `key` report half the file as written, then fail.
    pub fn failing_midway(mut self, key: &str) -> Self {
        self.failing_midway.insert(key.to_string());
        self
    }

    /// Listing never yields and never ends.
    pub fn stalled_listing(mut self) -> Self {
        self.stalled_listing = true;
        self
    }

    /// Uploads of `key` wait until [`ScriptedStore::release`] is called.
    pub fn holding(mut self, key: &str) -> Self {
        self.held.insert(key.to_string());
        self
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub async fn wait_for_attempt(&self, key: &str) {
        for _ in 0..1000 {
            if self.attempts().iter().any(|k| k == key) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("upload of {key} was never attempted");
    }

    /// Put an object directly, bypassing the script.
    pub async fn seed(&self, key: &str, size: usize) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed");
        std::fs::write(&path, vec![0xAB; size]).unwrap();
        self.inner
            .upload_object(BUCKET, key, &path, &NoProgress)
            .await
            .unwrap();
    }

    pub async fn objects(&self) -> HashMap<String, u64> {
        let objects: Vec<RemoteObject> = self
            .inner
            .list_objects(BUCKET, "")
            .try_collect()
            .await
            .unwrap();
        objects.into_iter().map(|o| (o.key, o.size)).collect()
    }
}

#[async_trait]
impl ObjectStore for ScriptedStore {
    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, Result<RemoteObject, StorageError>> {
        if self.stalled_listing {
            return futures::stream::pending().boxed();
        }
        self.inner.list_objects(bucket, prefix)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        self.inner.head_object(bucket, key).await
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        progress: &dyn UploadProgress,
    ) -> Result<(), UploadError> {
        self.attempts.lock().unwrap().push(key.to_string());

        if self.held.contains(key) {
            self.release.acquire().await.unwrap().forget();
        }
        if self.failing_midway.contains(key) {
            let size = std::fs::metadata(local_path).unwrap().len();
            progress.on_bytes(size / 2);
            return Err(UploadError::transfer(
                key,
                StorageError::Connection("connection reset mid-upload".to_string()),
            ));
        }
        if self.failing.contains(key) {
            return Err(UploadError::transfer(
                key,
                StorageError::Connection("simulated outage".to_string()),
            ));
        }
        self.inner.upload_object(bucket, key, local_path, progress).await
    }

    async fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
        content_type: Option<&str>,
    ) -> Option<String> {
        self.inner.presign_url(bucket, key, expiry, content_type).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.inner.delete_object(bucket, key).await
    }

    async fn validate_bucket_access(&self, bucket: &str) -> bool {
        self.inner.validate_bucket_access(bucket).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

pub fn write_file(root: &Path, relative: &str, size: usize) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, vec![0x5A; size]).unwrap();
}

/// Subscribe immediately and drive the run to its end.
pub async fn run_to_end(handle: SyncHandle) -> (Vec<ProgressEvent>, SyncReport) {
    let reader = handle.subscribe();
    finish(handle, reader).await
}

/// Collect every event until the channel closes, then the report.
///
/// Asserts the run produced exactly one terminal event and that it came last.
pub async fn finish(
    handle: SyncHandle,
    mut reader: ProgressReader,
) -> (Vec<ProgressEvent>, SyncReport) {
    let mut events = Vec::new();
    while let Some(event) = reader.recv().await {
        events.push(event);
    }
    let report = handle.wait().await.unwrap();

    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "expected exactly one terminal event: {events:?}");
    assert!(events.last().map(|e| e.is_terminal()).unwrap_or(false));
    (events, report)
}

pub fn statuses(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Status(message) => Some(message.clone()),
            _ => None,
        })
        .collect()
}
