use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};

use crate::storage::error::{invalid_argument, object_not_found, StorageError, StorageResult};

use super::{ObjectMetadata, ObjectStore};

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
}

/// In-process bucket. Download URLs have the form `memory://{bucket}/{path}`.
#[derive(Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    pending_failure: Mutex<Option<StorageError>>,
    without_urls: Mutex<bool>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            inner: Arc::new(MemoryInner::default()),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn contains(&self, path: &str) -> bool {
        lock(&self.inner.objects).contains_key(path)
    }

    pub fn object(&self, path: &str) -> Option<Bytes> {
        lock(&self.inner.objects).get(path).map(|object| object.data.clone())
    }

    pub fn metadata(&self, path: &str) -> Option<ObjectMetadata> {
        lock(&self.inner.objects)
            .get(path)
            .map(|object| object.metadata.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        lock(&self.inner.objects).keys().cloned().collect()
    }

    /// Makes the next `put` fail with `error`.
    pub fn fail_next_put(&self, error: StorageError) {
        *lock(&self.inner.pending_failure) = Some(error);
    }

    /// Simulates a bucket whose objects expose no download URL.
    pub fn disable_download_urls(&self) {
        *lock(&self.inner.without_urls) = true;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, data: Bytes, content_type: Option<&str>) -> StorageResult<ObjectMetadata> {
        if let Some(error) = lock(&self.inner.pending_failure).take() {
            return Err(error);
        }
        if path.is_empty() {
            return Err(invalid_argument("Object path must not be empty"));
        }
        let metadata = ObjectMetadata {
            bucket: Some(self.bucket.clone()),
            name: Some(path.to_string()),
            size: Some(data.len().to_string()),
            content_type: content_type.map(str::to_string),
            time_created: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            download_tokens: None,
        };
        lock(&self.inner.objects).insert(
            path.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    async fn download_url(&self, path: &str) -> StorageResult<Option<String>> {
        if !self.contains(path) {
            return Err(object_not_found(path));
        }
        if *lock(&self.inner.without_urls) {
            return Ok(None);
        }
        Ok(Some(format!("memory://{}/{}", self.bucket, path)))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        lock(&self.inner.objects)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| object_not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_url_delete() {
        let store = MemoryObjectStore::new("demo-bucket");
        let metadata = store
            .put("images/a.png", Bytes::from_static(b"png"), Some("image/png"))
            .await
            .unwrap();
        assert_eq!(metadata.size_bytes(), Some(3));
        assert_eq!(
            store.download_url("images/a.png").await.unwrap().as_deref(),
            Some("memory://demo-bucket/images/a.png")
        );
        store.delete("images/a.png").await.unwrap();
        let err = store.delete("images/a.png").await.unwrap_err();
        assert_eq!(err.code_str(), "storage/object-not-found");
    }
}
