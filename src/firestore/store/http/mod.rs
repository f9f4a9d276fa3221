use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value as JsonValue};

use crate::config::{Endpoints, FirebaseOptions, GatewaySettings};
use crate::firestore::error::{
    internal_error, missing_project_id, FirestoreError, FirestoreErrorCode, FirestoreResult,
};
use crate::firestore::listener::ListenerRegistration;
use crate::firestore::query::StructuredQuery;
use crate::firestore::snapshot::DocumentSnapshot;
use crate::logger::Logger;

use super::{
    DocumentStore, ListenCallback, ListenEvent, ListenTarget, NoopTokenProvider, TokenProviderArc,
    WriteOperation,
};

mod rpc_error;
pub mod serializer;

pub use rpc_error::map_http_error;
pub use serializer::JsonProtoSerializer;

const FIRESTORE_API_VERSION: &str = "v1";

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Firestore REST API client.
///
/// Snapshot listeners are served by polling: the target is re-read every
/// `poll_interval` and the callback fires when the result differs from the last delivery.
#[derive(Clone)]
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    serializer: JsonProtoSerializer,
    auth_provider: TokenProviderArc,
    retry: RetrySettings,
    poll_interval: Duration,
    logger: Logger,
}

#[derive(Clone)]
pub struct HttpDocumentStoreBuilder {
    project_id: String,
    database: String,
    endpoint: String,
    client: Option<Client>,
    auth_provider: TokenProviderArc,
    retry: RetrySettings,
    poll_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 1.5,
            max_delay: Duration::from_secs(5),
            request_timeout: GatewaySettings::default().request_timeout,
        }
    }
}

impl RetrySettings {
    /// A single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn should_retry(&self, attempt: usize, error: &FirestoreError) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }
        matches!(
            error.code,
            FirestoreErrorCode::Internal
                | FirestoreErrorCode::Unavailable
                | FirestoreErrorCode::DeadlineExceeded
                | FirestoreErrorCode::ResourceExhausted
                | FirestoreErrorCode::Aborted
        )
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        let delay = self.initial_delay.mul_f64(self.multiplier.powi(attempt as i32));
        delay.min(self.max_delay)
    }
}

impl HttpDocumentStore {
    pub fn builder(project_id: impl Into<String>) -> HttpDocumentStoreBuilder {
        HttpDocumentStoreBuilder::new(project_id.into())
    }

    /// Builds a store for the project in `options`, honouring `FIRESTORE_EMULATOR_HOST`.
    pub fn from_options(options: &FirebaseOptions) -> FirestoreResult<Self> {
        let project_id = options.project_id.clone().ok_or_else(missing_project_id)?;
        Self::builder(project_id)
            .with_database(options.database_id())
            .with_endpoint(Endpoints::from_env().firestore)
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> FirestoreResult<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = FirestoreResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            let token = self.auth_provider.get_token().await?;
            match operation(token).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !self.retry.should_retry(attempt, &err) {
                        return Err(err);
                    }
                    tokio::time::sleep(self.retry.backoff_delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn invoke_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
        token: Option<String>,
    ) -> FirestoreResult<Option<JsonValue>> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self
            .client
            .request(method, url)
            .timeout(self.retry.request_timeout)
            .header("Content-Type", "application/json");
        if let Some(token) = token.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| internal_error(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| internal_error(err.to_string()))?;

        if status.is_success() {
            if text.is_empty() {
                Ok(Some(JsonValue::Null))
            } else {
                serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|err| internal_error(err.to_string()))
            }
        } else if status == StatusCode::NOT_FOUND && body.is_none() {
            Ok(None)
        } else {
            Err(map_http_error(status, &text))
        }
    }

    async fn request(
        &self,
        method: Method,
        path: String,
        body: Option<JsonValue>,
    ) -> FirestoreResult<Option<JsonValue>> {
        self.execute_with_retry(|token| {
            let method = method.clone();
            let path = path.clone();
            let body = body.clone();
            async move { self.invoke_json(method, &path, body.as_ref(), token).await }
        })
        .await
    }

    async fn fetch_event(&self, target: &ListenTarget) -> FirestoreResult<ListenEvent> {
        match target {
            ListenTarget::Document { collection, id } => Ok(ListenEvent::Document(
                self.get_document(collection, id).await?,
            )),
            ListenTarget::Query(query) => Ok(ListenEvent::Query(self.run_query(query).await?)),
        }
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get_document(&self, collection: &str, id: &str) -> FirestoreResult<DocumentSnapshot> {
        let path = document_path(collection, id);
        match self.request(Method::GET, path, None).await? {
            Some(document) if !document.is_null() => {
                let data = serializer::decode_fields(&document)?;
                Ok(DocumentSnapshot::new(collection, id, Some(data), Default::default()))
            }
            _ => Ok(DocumentSnapshot::missing(collection, id)),
        }
    }

    async fn run_query(&self, query: &StructuredQuery) -> FirestoreResult<Vec<DocumentSnapshot>> {
        let body = json!({ "structuredQuery": self.serializer.encode_structured_query(query) });
        let response = self
            .request(Method::POST, "documents:runQuery".to_string(), Some(body))
            .await?
            .unwrap_or(JsonValue::Null);

        let results = response
            .as_array()
            .ok_or_else(|| internal_error("Firestore runQuery response must be an array"))?;

        results
            .iter()
            .filter_map(|entry| entry.get("document"))
            .map(|document| self.serializer.decode_document(document))
            .collect()
    }

    async fn run_count(&self, query: &StructuredQuery) -> FirestoreResult<u64> {
        let body = self.serializer.encode_count_body(query);
        let response = self
            .request(Method::POST, "documents:runAggregationQuery".to_string(), Some(body))
            .await?
            .unwrap_or(JsonValue::Null);

        let entries = response.as_array().ok_or_else(|| {
            internal_error("Firestore runAggregationQuery response must be an array")
        })?;

        let count = entries
            .iter()
            .filter_map(|entry| entry.pointer("/result/aggregateFields/count"))
            .next()
            .ok_or_else(|| {
                internal_error("Firestore runAggregationQuery response contained no count")
            })?;

        match serializer::decode_value(count)? {
            JsonValue::Number(number) => number
                .as_u64()
                .ok_or_else(|| internal_error("Firestore count must be a non-negative integer")),
            other => Err(internal_error(format!("Unexpected count value {other}"))),
        }
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let body = self.serializer.encode_commit_body(&writes);
        self.request(Method::POST, "documents:commit".to_string(), Some(body))
            .await
            .map(|_| ())
    }

    async fn listen(
        &self,
        target: ListenTarget,
        callback: ListenCallback,
    ) -> FirestoreResult<ListenerRegistration> {
        let initial = self.fetch_event(&target).await?;
        callback(initial.clone());

        let store = self.clone();
        let poll_interval = self.poll_interval;
        let task = tokio::spawn(async move {
            let mut last = initial;
            let mut ticker = tokio::time::interval(poll_interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.fetch_event(&target).await {
                    Ok(event) if event != last => {
                        callback(event.clone());
                        last = event;
                    }
                    Ok(_) => {}
                    Err(err) => store.logger.warn(format!("listen: {err}")),
                }
            }
        });

        Ok(ListenerRegistration::new(move || task.abort()))
    }
}

impl HttpDocumentStoreBuilder {
    fn new(project_id: String) -> Self {
        let auth_provider: TokenProviderArc = Arc::new(NoopTokenProvider);
        Self {
            project_id,
            database: crate::config::DEFAULT_DATABASE_ID.to_string(),
            endpoint: crate::config::FIRESTORE_API_HOST.to_string(),
            client: None,
            auth_provider,
            retry: RetrySettings::default(),
            poll_interval: GatewaySettings::default().listen_poll_interval,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Scheme and host of the Firestore service, e.g. an emulator or mock server.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_auth_provider(mut self, provider: TokenProviderArc) -> Self {
        self.auth_provider = provider;
        self
    }

    pub fn with_retry_settings(mut self, settings: RetrySettings) -> Self {
        self.retry = settings;
        self
    }

    /// Takes the listen poll interval and the per-request timeout from `settings`.
    pub fn with_settings(mut self, settings: &GatewaySettings) -> Self {
        self.poll_interval = settings.listen_poll_interval;
        self.retry.request_timeout = settings.request_timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn build(self) -> FirestoreResult<HttpDocumentStore> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .build()
                .map_err(|err| internal_error(err.to_string()))?,
        };
        let base_url = format!(
            "{}/{FIRESTORE_API_VERSION}/projects/{}/databases/{}",
            self.endpoint.trim_end_matches('/'),
            self.project_id,
            self.database
        );
        Ok(HttpDocumentStore {
            client,
            base_url,
            serializer: JsonProtoSerializer::new(self.project_id, self.database),
            auth_provider: self.auth_provider,
            retry: self.retry,
            poll_interval: self.poll_interval,
            logger: Logger::new("@firebase-gateway/firestore"),
        })
    }
}

fn document_path(collection: &str, id: &str) -> String {
    format!(
        "documents/{}/{}",
        utf8_percent_encode(collection, PATH_SEGMENT),
        utf8_percent_encode(id, PATH_SEGMENT)
    )
}
