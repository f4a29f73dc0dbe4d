//! Object store backends.
//!
//! [`FsObjectStore`] maps `bucket/key` onto a directory tree and publishes
//! objects with write-to-temp-then-rename. [`MemoryObjectStore`] keeps
//! everything in a map and is used by headless/test runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use posterpress_shared::{PosterPressError, Result};

use crate::gateway::ObjectStore;

// ---------------------------------------------------------------------------
// Filesystem backend
// ---------------------------------------------------------------------------

/// Object store rooted at a local directory: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `bucket/key` to a path that cannot leave the store root.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_segment(bucket, "bucket")?;
        let mut path = self.root.join(bucket);
        if key.is_empty() {
            return Err(PosterPressError::validation("object key must not be empty"));
        }
        for segment in key.split('/') {
            validate_segment(segment, "key segment")?;
            path.push(segment);
        }
        Ok(path)
    }
}

fn validate_segment(segment: &str, what: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(PosterPressError::validation(format!(
            "invalid {what} '{segment}'"
        )));
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PosterPressError::not_found(bucket, key))
            }
            Err(e) => Err(PosterPressError::io(&path, e)),
        }
    }

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let target = self.object_path(bucket, key)?;
        let parent = target
            .parent()
            .ok_or_else(|| PosterPressError::validation(format!("invalid object key '{key}'")))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PosterPressError::io(parent, e))?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{file_name}.{}.tmp", Uuid::now_v7()));

        // Write to temp file first
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| PosterPressError::io(&temp, e))?;

        // Atomic rename
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PosterPressError::io(&target, e));
        }

        debug!(bucket, key, content_type, size = bytes.len(), "stored object");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// An object held by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Map-backed object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    reject_puts: Mutex<bool>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly.
    pub fn insert(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>, content_type: &str) {
        self.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes: bytes.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// All keys in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Make every subsequent `put` fail, simulating an unavailable backend.
    pub fn reject_puts(&self, reject: bool) {
        *self
            .reject_puts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = reject;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), StoredObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.object(bucket, key)
            .map(|o| o.bytes)
            .ok_or_else(|| PosterPressError::not_found(bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let rejected = *self
            .reject_puts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if rejected {
            return Err(PosterPressError::ObjectStore(format!(
                "put rejected: {bucket}/{key}"
            )));
        }
        self.insert(bucket, key, bytes, content_type);
        Ok(())
    }
}
