use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use percent_encoding::percent_decode_str;

use crate::storage::error::{invalid_format, StorageResult};

/// How an encoded upload string is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StringFormat {
    /// Pick [`StringFormat::DataUrl`] for `data:` strings, otherwise [`StringFormat::Base64`].
    #[default]
    Detect,
    Raw,
    Base64,
    Base64Url,
    /// `data:image/png;base64,...`
    DataUrl,
}

impl StringFormat {
    fn resolve(self, value: &str) -> StringFormat {
        match self {
            StringFormat::Detect if value.starts_with("data:") => StringFormat::DataUrl,
            StringFormat::Detect => StringFormat::Base64,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedString {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl DecodedString {
    fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self { bytes, content_type }
    }
}

pub fn decode_string(value: &str, format: StringFormat) -> StorageResult<DecodedString> {
    match format.resolve(value) {
        StringFormat::Raw => Ok(DecodedString::new(value.as_bytes().to_vec(), None)),
        StringFormat::Base64 => decode_base64(value),
        StringFormat::Base64Url => decode_base64_url(value),
        StringFormat::DataUrl | StringFormat::Detect => decode_data_url(value),
    }
}

/// MIME type declared in a `data:` URL header, if any.
pub fn data_url_content_type(value: &str) -> Option<String> {
    let header = value.strip_prefix("data:")?;
    let metadata = &header[..header.find(',')?];
    let content_type = metadata.strip_suffix(";base64").unwrap_or(metadata).trim();
    (!content_type.is_empty()).then(|| content_type.to_string())
}

fn decode_base64(value: &str) -> StorageResult<DecodedString> {
    STANDARD
        .decode(value.trim())
        .map(|bytes| DecodedString::new(bytes, None))
        .map_err(|err| invalid_format(format!("Invalid base64 data: {err}")))
}

fn decode_base64_url(value: &str) -> StorageResult<DecodedString> {
    URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .map(|bytes| DecodedString::new(bytes, None))
        .map_err(|err| invalid_format(format!("Invalid base64url data: {err}")))
}

fn decode_data_url(value: &str) -> StorageResult<DecodedString> {
    let header = value
        .strip_prefix("data:")
        .ok_or_else(|| invalid_format("Data URL must start with the 'data:' scheme."))?;
    let comma = header.find(',').ok_or_else(|| {
        invalid_format("Data URL must contain a comma separating metadata and data segments.")
    })?;

    let metadata = &header[..comma];
    let payload = &header[comma + 1..];
    let content_type = data_url_content_type(value);

    let bytes = if metadata.ends_with(";base64") {
        STANDARD
            .decode(payload)
            .map_err(|err| invalid_format(format!("Invalid base64 data URL: {err}")))?
    } else {
        percent_decode_str(payload)
            .decode_utf8()
            .map_err(|_| invalid_format("Data URL payload must be valid percent-encoded UTF-8."))?
            .into_owned()
            .into_bytes()
    };

    Ok(DecodedString::new(bytes, content_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_data_urls() {
        let decoded = decode_string("data:image/png;base64,aGVsbG8=", StringFormat::Detect).unwrap();
        assert_eq!(decoded.bytes, b"hello");
        assert_eq!(decoded.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn falls_back_to_plain_base64() {
        let decoded = decode_string("aGVsbG8=", StringFormat::Detect).unwrap();
        assert_eq!(decoded.bytes, b"hello");
        assert!(decoded.content_type.is_none());
    }

    #[test]
    fn base64_url_allows_paddingless_values() {
        let decoded = decode_string("aGVsbG8", StringFormat::Base64Url).unwrap();
        assert_eq!(decoded.bytes, b"hello");
    }

    #[test]
    fn percent_encoded_data_url() {
        let decoded = decode_string("data:,Hello%20World", StringFormat::DataUrl).unwrap();
        assert_eq!(decoded.bytes, b"Hello World");
        assert!(decoded.content_type.is_none());
    }

    #[test]
    fn rejects_garbage() {
        let err = decode_string("not base64 !!", StringFormat::Base64).unwrap_err();
        assert_eq!(err.code_str(), "storage/invalid-format");
    }
}
