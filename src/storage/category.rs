use std::fmt;
use std::str::FromStr;

use crate::storage::error::{invalid_argument, StorageError};

/// Upload policy: where a file goes and which content types it accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UploadCategory {
    Images,
    Documents,
    Videos,
    Audios,
}

impl UploadCategory {
    /// First segment of every object path in this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadCategory::Images => "images",
            UploadCategory::Documents => "documents",
            UploadCategory::Videos => "videos",
            UploadCategory::Audios => "audios",
        }
    }

    /// Singular noun used in validation messages.
    pub fn label(&self) -> &'static str {
        match self {
            UploadCategory::Images => "image",
            UploadCategory::Documents => "document",
            UploadCategory::Videos => "video",
            UploadCategory::Audios => "audio",
        }
    }

    pub fn allowed_types(&self) -> &'static [&'static str] {
        match self {
            UploadCategory::Images => &["image/png", "image/jpg", "image/jpeg"],
            UploadCategory::Documents => &[
                "application/pdf",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "text/csv",
            ],
            UploadCategory::Videos => &["video/mp4", "video/x-m4v"],
            UploadCategory::Audios => &["audio/mp3", "audio/mpeg"],
        }
    }

    pub fn accepts(&self, content_type: &str) -> bool {
        let content_type = essence(content_type);
        self.allowed_types()
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type))
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            UploadCategory::Images => "png",
            UploadCategory::Documents => "pdf",
            UploadCategory::Videos => "mp4",
            UploadCategory::Audios => "mp3",
        }
    }

    /// File extension for an object of `content_type` stored in this category.
    ///
    /// Images and documents derive it from the content type; videos and audios use the
    /// category default.
    pub fn extension_for(&self, content_type: Option<&str>) -> &'static str {
        let Some(content_type) = content_type.map(essence) else {
            return self.default_extension();
        };
        let derived = match self {
            UploadCategory::Images => match content_type {
                "image/png" => Some("png"),
                "image/jpg" => Some("jpg"),
                "image/jpeg" => Some("jpeg"),
                _ => None,
            },
            UploadCategory::Documents => match content_type {
                "application/pdf" => Some("pdf"),
                "application/vnd.ms-excel" => Some("xls"),
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some("xlsx"),
                "text/csv" => Some("csv"),
                _ => None,
            },
            UploadCategory::Videos | UploadCategory::Audios => None,
        };
        derived.unwrap_or_else(|| self.default_extension())
    }
}

fn essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

impl fmt::Display for UploadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadCategory {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "images" => Ok(UploadCategory::Images),
            "documents" => Ok(UploadCategory::Documents),
            "videos" => Ok(UploadCategory::Videos),
            "audios" => Ok(UploadCategory::Audios),
            other => Err(invalid_argument(format!("Unknown upload category '{other}'"))),
        }
    }
}
