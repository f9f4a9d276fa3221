use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageErrorCode {
    InvalidFile,
    InvalidFormat,
    InvalidArgument,
    ObjectNotFound,
    Unauthorized,
    Unauthenticated,
    RetryLimitExceeded,
    NoDownloadUrl,
    InternalError,
}

impl StorageErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageErrorCode::InvalidFile => "storage/invalid-file",
            StorageErrorCode::InvalidFormat => "storage/invalid-format",
            StorageErrorCode::InvalidArgument => "storage/invalid-argument",
            StorageErrorCode::ObjectNotFound => "storage/object-not-found",
            StorageErrorCode::Unauthorized => "storage/unauthorized",
            StorageErrorCode::Unauthenticated => "storage/unauthenticated",
            StorageErrorCode::RetryLimitExceeded => "storage/retry-limit-exceeded",
            StorageErrorCode::NoDownloadUrl => "storage/no-download-url",
            StorageErrorCode::InternalError => "storage/internal-error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageError {
    pub code: StorageErrorCode,
    message: String,
    pub status: Option<u16>,
    pub server_response: Option<String>,
}

impl StorageError {
    pub fn new(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            server_response: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_server_response(mut self, response: impl Into<String>) -> Self {
        self.server_response = Some(response.into());
        self
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(server) = &self.server_response {
            write!(f, "{} ({}): {}", self.message, self.code_str(), server)
        } else {
            write!(f, "{} ({})", self.message, self.code_str())
        }
    }
}

impl Error for StorageError {}

pub type StorageResult<T> = Result<T, StorageError>;

pub fn invalid_file(message: impl Into<String>) -> StorageError {
    StorageError::new(StorageErrorCode::InvalidFile, message)
}

pub fn invalid_format(message: impl Into<String>) -> StorageError {
    StorageError::new(StorageErrorCode::InvalidFormat, message)
}

pub fn invalid_argument(message: impl Into<String>) -> StorageError {
    StorageError::new(StorageErrorCode::InvalidArgument, message)
}

pub fn no_default_bucket() -> StorageError {
    invalid_argument("Firebase options must include a storage_bucket")
}

pub fn object_not_found(path: &str) -> StorageError {
    StorageError::new(
        StorageErrorCode::ObjectNotFound,
        format!("Object '{path}' does not exist."),
    )
}

pub fn unauthorized(path: &str) -> StorageError {
    StorageError::new(
        StorageErrorCode::Unauthorized,
        format!("User does not have permission to access '{path}'."),
    )
}

pub fn unauthenticated() -> StorageError {
    StorageError::new(
        StorageErrorCode::Unauthenticated,
        "User is not authenticated, please authenticate and try again.",
    )
}

pub fn retry_limit_exceeded() -> StorageError {
    StorageError::new(
        StorageErrorCode::RetryLimitExceeded,
        "Max retry time for operation exceeded, please try again.",
    )
}

pub fn no_download_url(path: &str) -> StorageError {
    StorageError::new(
        StorageErrorCode::NoDownloadUrl,
        format!("The object '{path}' has no download URL."),
    )
}

pub fn internal_error(message: impl Into<String>) -> StorageError {
    StorageError::new(StorageErrorCode::InternalError, message)
}
