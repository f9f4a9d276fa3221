//! Validated file uploads to Cloud Storage for Firebase.
//!
//! A [`StorageUpload`] checks a file against its [`UploadCategory`], assigns it a randomized
//! object path and hands the bytes to an [`ObjectStore`].

mod category;
mod error;
pub mod store;
mod string;
mod upload;

#[doc(inline)]
pub use category::UploadCategory;

#[doc(inline)]
pub use error::{
    internal_error, invalid_argument, invalid_file, invalid_format, no_default_bucket,
    no_download_url, object_not_found, retry_limit_exceeded, unauthenticated, unauthorized,
    StorageError, StorageErrorCode, StorageResult,
};

#[doc(inline)]
pub use store::{HttpObjectStore, MemoryObjectStore, ObjectMetadata, ObjectStore};

#[doc(inline)]
pub use string::{data_url_content_type, decode_string, DecodedString, StringFormat};

#[doc(inline)]
pub use upload::{StorageUpload, UploadFile};
