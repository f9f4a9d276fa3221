use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::storage::error::StorageResult;

pub mod http;
pub mod memory;

pub use http::HttpObjectStore;
pub use memory::MemoryObjectStore;

/// Object description returned by the storage backend after an upload.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Byte length; the REST API encodes it as a string.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub time_created: Option<String>,
    /// Comma separated list of download tokens.
    #[serde(default)]
    pub download_tokens: Option<String>,
}

impl ObjectMetadata {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|size| size.parse().ok())
    }

    pub fn first_download_token(&self) -> Option<&str> {
        self.download_tokens
            .as_deref()?
            .split(',')
            .map(str::trim)
            .find(|token| !token.is_empty())
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put(&self, path: &str, data: Bytes, content_type: Option<&str>) -> StorageResult<ObjectMetadata>;

    /// Public URL for `path`, `None` when the object exists but exposes none.
    async fn download_url(&self, path: &str) -> StorageResult<Option<String>>;

    async fn delete(&self, path: &str) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_non_empty_token() {
        let metadata = ObjectMetadata {
            download_tokens: Some(",abc,def".into()),
            size: Some("42".into()),
            ..Default::default()
        };
        assert_eq!(metadata.first_download_token(), Some("abc"));
        assert_eq!(metadata.size_bytes(), Some(42));
    }
}
