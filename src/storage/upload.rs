use std::sync::Arc;

use bytes::Bytes;

use crate::config::GatewaySettings;
use crate::logger::Logger;
use crate::storage::category::UploadCategory;
use crate::storage::error::{invalid_file, no_download_url, StorageError, StorageResult};
use crate::storage::store::ObjectStore;
use crate::storage::string::{data_url_content_type, decode_string, StringFormat};
use crate::util::{now_millis, random_alphanumeric, size_metric};

const LOGGER_NAME: &str = "@firebase-gateway/storage";
const FILE_NAME_LENGTH: usize = 30;

/// Content handed to [`StorageUpload`].
#[derive(Clone, Debug, PartialEq)]
pub enum UploadFile {
    Binary {
        bytes: Bytes,
        content_type: String,
    },
    /// Pre-encoded content, a `data:` URL or base64 text.
    Encoded {
        data: String,
        /// Size the caller attached to the payload, checked against the ceiling when set.
        size: Option<u64>,
        format: StringFormat,
    },
}

impl UploadFile {
    pub fn binary(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        UploadFile::Binary {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    pub fn encoded(data: impl Into<String>) -> Self {
        UploadFile::Encoded {
            data: data.into(),
            size: None,
            format: StringFormat::Detect,
        }
    }

    /// Attaches a declared size to an encoded payload. No effect on binary files.
    pub fn with_size(mut self, declared: u64) -> Self {
        if let UploadFile::Encoded { size, .. } = &mut self {
            *size = Some(declared);
        }
        self
    }

    pub fn with_format(mut self, chosen: StringFormat) -> Self {
        if let UploadFile::Encoded { format, .. } = &mut self {
            *format = chosen;
        }
        self
    }

    fn content_type(&self) -> Option<String> {
        match self {
            UploadFile::Binary { content_type, .. } => Some(content_type.clone()),
            UploadFile::Encoded { data, .. } => data_url_content_type(data),
        }
    }
}

/// A validated upload of one file into a category folder.
///
/// Validation runs in [`StorageUpload::new`]. A rejected file keeps its message in
/// [`StorageUpload::error`] and never gets a path; a valid one is assigned
/// `{category}/[{sub_path}/]{random}_{millis}.{ext}`.
pub struct StorageUpload {
    store: Arc<dyn ObjectStore>,
    file: UploadFile,
    category: UploadCategory,
    max_size: u64,
    error: Option<String>,
    full_path: Option<String>,
    logger: Logger,
}

impl StorageUpload {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        file: UploadFile,
        category: UploadCategory,
        sub_path: Option<&str>,
        max_size: Option<u64>,
    ) -> Self {
        Self::new_with_settings(store, file, category, sub_path, max_size, &GatewaySettings::default())
    }

    /// Like [`StorageUpload::new`], with the size ceiling defaulting to
    /// `settings.default_max_upload_size` instead of the built-in one.
    pub fn new_with_settings(
        store: Arc<dyn ObjectStore>,
        file: UploadFile,
        category: UploadCategory,
        sub_path: Option<&str>,
        max_size: Option<u64>,
        settings: &GatewaySettings,
    ) -> Self {
        let max_size = max_size.unwrap_or(settings.default_max_upload_size);
        let mut upload = Self {
            store,
            file,
            category,
            max_size,
            error: None,
            full_path: None,
            logger: Logger::new(LOGGER_NAME),
        };
        match upload.validate() {
            Ok(()) => match upload.build_path(sub_path) {
                Ok(path) => upload.full_path = Some(path),
                Err(message) => upload.error = Some(message),
            },
            Err(message) => upload.error = Some(message),
        }
        upload
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Validation message of a rejected file.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn full_path(&self) -> Option<&str> {
        self.full_path.as_deref()
    }

    pub fn category(&self) -> UploadCategory {
        self.category
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn validate(&self) -> Result<(), String> {
        let (good_size, good_type) = match &self.file {
            UploadFile::Binary {
                bytes,
                content_type,
            } => {
                let size = bytes.len() as u64;
                (
                    size > 0 && size <= self.max_size,
                    self.category.accepts(content_type),
                )
            }
            UploadFile::Encoded { size, .. } => {
                (size.map_or(true, |size| size <= self.max_size), true)
            }
        };

        if !good_size {
            return Err(format!(
                "File size must not be larger than {}",
                size_metric(self.max_size)
            ));
        }
        if !good_type {
            return Err(format!("File is not a valid {}", self.category.label()));
        }
        Ok(())
    }

    fn build_path(&self, sub_path: Option<&str>) -> Result<String, String> {
        let name = random_alphanumeric(FILE_NAME_LENGTH).map_err(|err| err.to_string())?;
        let extension = self
            .category
            .extension_for(self.file.content_type().as_deref());
        let file_name = format!("{name}_{}.{extension}", now_millis());

        let sub_path = sub_path.map(|path| path.trim_matches('/')).unwrap_or_default();
        Ok(if sub_path.is_empty() {
            format!("{}/{file_name}", self.category)
        } else {
            format!("{}/{sub_path}/{file_name}", self.category)
        })
    }

    /// Uploads the file and returns its download URL.
    pub async fn do_upload(&self) -> StorageResult<String> {
        let path = match (&self.error, &self.full_path) {
            (None, Some(path)) => path.as_str(),
            (error, _) => {
                let message = error.as_deref().unwrap_or("File has no upload path");
                return Err(self.fail("do_upload", invalid_file(message)));
            }
        };

        let (data, content_type) = match &self.file {
            UploadFile::Binary {
                bytes,
                content_type,
            } => (bytes.clone(), Some(content_type.clone())),
            UploadFile::Encoded { data, format, .. } => {
                let decoded =
                    decode_string(data, *format).map_err(|err| self.fail("do_upload", err))?;
                (Bytes::from(decoded.bytes), decoded.content_type)
            }
        };

        self.store
            .put(path, data, content_type.as_deref())
            .await
            .map_err(|err| self.fail("do_upload", err))?;
        self.logger.debug(format!("Uploaded {path}"));

        match self.store.download_url(path).await {
            Ok(Some(url)) => Ok(url),
            Ok(None) => Err(self.fail("do_upload", no_download_url(path))),
            Err(err) => Err(self.fail("do_upload", err)),
        }
    }

    /// Removes the object stored at `path`.
    pub async fn delete_file(store: &dyn ObjectStore, path: &str) -> StorageResult<()> {
        store.delete(path).await.map_err(|err| {
            Logger::new(LOGGER_NAME).error_with(["delete_file", err.to_string().as_str()]);
            err
        })
    }

    fn fail(&self, operation: &str, err: StorageError) -> StorageError {
        self.logger
            .error_with([operation, err.to_string().as_str()]);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::MemoryObjectStore;

    fn store() -> Arc<dyn ObjectStore> {
        Arc::new(MemoryObjectStore::new("bucket"))
    }

    #[test]
    fn oversize_message_wins_over_type_message() {
        let upload = StorageUpload::new(
            store(),
            UploadFile::binary(vec![0u8; 2_000], "image/gif"),
            UploadCategory::Images,
            None,
            Some(1_000),
        );
        assert_eq!(upload.error(), Some("File size must not be larger than 1 Kb"));
        assert!(upload.full_path().is_none());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let upload = StorageUpload::new(
            store(),
            UploadFile::binary(vec![1u8; 10], "image/png"),
            UploadCategory::Videos,
            None,
            None,
        );
        assert_eq!(upload.error(), Some("File is not a valid video"));
    }

    #[test]
    fn encoded_files_skip_type_checks() {
        let upload = StorageUpload::new(
            store(),
            UploadFile::encoded("data:application/zip;base64,UEs="),
            UploadCategory::Audios,
            Some("/voice/"),
            None,
        );
        assert!(upload.error().is_none());
        let path = upload.full_path().unwrap();
        assert!(path.starts_with("audios/voice/"));
        assert!(path.ends_with(".mp3"));
    }

    #[test]
    fn encoded_size_is_checked_when_declared() {
        let upload = StorageUpload::new(
            store(),
            UploadFile::encoded("aGVsbG8=").with_size(5_000_000),
            UploadCategory::Documents,
            None,
            None,
        );
        assert_eq!(upload.error(), Some("File size must not be larger than 1000 Kb"));
    }

    #[test]
    fn file_name_has_random_part_and_timestamp() {
        let upload = StorageUpload::new(
            store(),
            UploadFile::binary(vec![1u8; 10], "image/jpg"),
            UploadCategory::Images,
            None,
            None,
        );
        let path = upload.full_path().unwrap();
        let file_name = path.strip_prefix("images/").unwrap();
        let (random, rest) = file_name.split_once('_').unwrap();
        assert_eq!(random.len(), 30);
        let (millis, extension) = rest.split_once('.').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(extension, "jpg");
    }
}
