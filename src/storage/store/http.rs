use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::json;

use crate::config::{Endpoints, FirebaseOptions, GatewaySettings};
use crate::storage::error::{
    internal_error, invalid_argument, no_default_bucket, object_not_found, retry_limit_exceeded,
    unauthenticated, unauthorized, StorageError, StorageResult,
};

use super::{ObjectMetadata, ObjectStore};

const STORAGE_API_VERSION: &str = "v0";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const MAX_ATTEMPTS: usize = 3;

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Cloud Storage for Firebase over the REST v0 API.
#[derive(Clone, Debug)]
pub struct HttpObjectStore {
    client: Client,
    host: String,
    bucket: String,
    auth_token: Option<String>,
    retry_delay: Duration,
    request_timeout: Duration,
}

impl HttpObjectStore {
    pub fn new(host: impl Into<String>, bucket: impl Into<String>) -> StorageResult<Self> {
        let bucket = bucket.into();
        if bucket.is_empty() {
            return Err(no_default_bucket());
        }
        let client = Client::builder()
            .build()
            .map_err(|err| internal_error(err.to_string()))?;
        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            bucket,
            auth_token: None,
            retry_delay: Duration::from_millis(250),
            request_timeout: GatewaySettings::default().request_timeout,
        })
    }

    /// Store for the bucket in `options`, honouring `FIREBASE_STORAGE_EMULATOR_HOST`.
    pub fn from_options(options: &FirebaseOptions) -> StorageResult<Self> {
        let bucket = options.storage_bucket.clone().ok_or_else(no_default_bucket)?;
        Self::new(Endpoints::from_env().storage, bucket)
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Sends `Authorization: Firebase {token}` with every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Takes the per-request timeout from `settings`.
    pub fn with_settings(mut self, settings: &GatewaySettings) -> Self {
        self.request_timeout = settings.request_timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn bucket_url(&self) -> String {
        format!(
            "{}/{STORAGE_API_VERSION}/b/{}/o",
            self.host,
            utf8_percent_encode(&self.bucket, PATH_SEGMENT)
        )
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{}", self.bucket_url(), utf8_percent_encode(path, PATH_SEGMENT))
    }

    async fn send<F>(&self, path: &str, build: F) -> StorageResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            let mut request = build(&self.client).timeout(self.request_timeout);
            if let Some(token) = &self.auth_token {
                request = request.header("Authorization", format!("Firebase {token}"));
            }
            let response = request
                .send()
                .await
                .map_err(|err| internal_error(format!("Storage request failed: {err}")))?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if is_retry_status_code(status) {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(retry_limit_exceeded().with_status(status.as_u16()));
                }
                tokio::time::sleep(self.retry_delay * attempt as u32).await;
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, path, body));
        }
    }

    async fn fetch_metadata(&self, path: &str) -> StorageResult<ObjectMetadata> {
        let url = self.object_url(path);
        let response = self
            .send(path, |client| client.request(Method::GET, &url))
            .await?;
        parse_metadata(response).await
    }
}

fn is_retry_status_code(status: StatusCode) -> bool {
    status.is_server_error() || matches!(status.as_u16(), 408 | 429)
}

fn map_status(status: StatusCode, path: &str, body: String) -> StorageError {
    let error = match status {
        StatusCode::NOT_FOUND => object_not_found(path),
        StatusCode::UNAUTHORIZED => unauthenticated(),
        StatusCode::FORBIDDEN => unauthorized(path),
        StatusCode::BAD_REQUEST => invalid_argument(format!("Storage rejected the request for '{path}'")),
        _ => internal_error(format!("Storage request failed with status {status}")),
    };
    let error = error.with_status(status.as_u16());
    if body.is_empty() {
        error
    } else {
        error.with_server_response(body)
    }
}

async fn parse_metadata(response: Response) -> StorageResult<ObjectMetadata> {
    response
        .json::<ObjectMetadata>()
        .await
        .map_err(|err| internal_error(format!("failed to parse object metadata: {err}")))
}

fn generate_boundary() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}

fn push_multipart_segment(body: &mut Vec<u8>, boundary: &str, header: &str, data: &[u8]) {
    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(header.as_bytes());
    body.extend_from_slice(b"\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
}

fn multipart_body(path: &str, data: &[u8], content_type: &str, boundary: &str) -> Vec<u8> {
    let resource = json!({
        "name": path,
        "fullPath": path,
        "size": data.len().to_string(),
        "contentType": content_type,
    })
    .to_string();

    let mut body = Vec::with_capacity(resource.len() + data.len() + boundary.len() * 3 + 128);
    push_multipart_segment(
        &mut body,
        boundary,
        "Content-Type: application/json; charset=utf-8",
        resource.as_bytes(),
    );
    push_multipart_segment(&mut body, boundary, &format!("Content-Type: {content_type}"), data);
    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"--");
    body
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, path: &str, data: Bytes, content_type: Option<&str>) -> StorageResult<ObjectMetadata> {
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
        let boundary = generate_boundary();
        let body = Bytes::from(multipart_body(path, &data, content_type, &boundary));
        let url = self.bucket_url();
        let response = self
            .send(path, |client| {
                client
                    .request(Method::POST, &url)
                    .query(&[("uploadType", "multipart"), ("name", path)])
                    .header("X-Goog-Upload-Protocol", "multipart")
                    .header(
                        "Content-Type",
                        format!("multipart/related; boundary={boundary}"),
                    )
                    .body(body.clone())
            })
            .await?;
        parse_metadata(response).await
    }

    async fn download_url(&self, path: &str) -> StorageResult<Option<String>> {
        let metadata = self.fetch_metadata(path).await?;
        Ok(metadata.first_download_token().map(|token| {
            let token: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
            format!("{}?alt=media&token={token}", self.object_url(path))
        }))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let url = self.object_url(path);
        self.send(path, |client| client.request(Method::DELETE, &url))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::start_mock_server;
    use httpmock::prelude::*;

    #[test]
    fn object_urls_escape_slashes() {
        let store = HttpObjectStore::new("http://localhost:9199/", "demo.appspot.com").unwrap();
        assert_eq!(
            store.object_url("images/a b.png"),
            "http://localhost:9199/v0/b/demo.appspot.com/o/images%2Fa%20b.png"
        );
    }

    #[test]
    fn multipart_body_has_metadata_and_content_parts() {
        let body = multipart_body("docs/a.pdf", b"%PDF", "application/pdf", "BOUNDARY");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--BOUNDARY\r\nContent-Type: application/json; charset=utf-8\r\n\r\n"));
        assert!(text.contains("\"name\":\"docs/a.pdf\""));
        assert!(text.contains("--BOUNDARY\r\nContent-Type: application/pdf\r\n\r\n%PDF\r\n"));
        assert!(text.ends_with("--BOUNDARY--"));
    }

    #[test]
    fn empty_bucket_is_rejected() {
        let err = HttpObjectStore::new("http://localhost", "").unwrap_err();
        assert_eq!(err.code_str(), "storage/invalid-argument");
    }

    #[tokio::test]
    async fn missing_object_maps_to_not_found() {
        let server = start_mock_server().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v0/b/demo/o/ghost");
                then.status(404).body("{\"error\":{\"code\":404}}");
            })
            .await;

        let store = HttpObjectStore::new(server.base_url(), "demo").unwrap();
        let err = store.download_url("ghost").await.unwrap_err();
        assert_eq!(err.code_str(), "storage/object-not-found");
        assert_eq!(err.status, Some(404));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn gives_up_after_repeated_server_errors() {
        let server = start_mock_server().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/v0/b/demo/o/flaky");
                then.status(503);
            })
            .await;

        let store = HttpObjectStore::new(server.base_url(), "demo")
            .unwrap()
            .with_retry_delay(Duration::from_millis(1));
        let err = store.delete("flaky").await.unwrap_err();
        assert_eq!(err.code_str(), "storage/retry-limit-exceeded");
        mock.assert_hits_async(MAX_ATTEMPTS).await;
    }
}
