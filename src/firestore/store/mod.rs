use std::sync::Arc;

use async_trait::async_trait;

use crate::firestore::error::FirestoreResult;
use crate::firestore::listener::ListenerRegistration;
use crate::firestore::query::StructuredQuery;
use crate::firestore::snapshot::DocumentSnapshot;
use crate::firestore::value::{DocumentData, FieldTransform};

pub(crate) mod evaluator;
pub mod http;
pub mod memory;

#[derive(Clone, Debug, PartialEq)]
pub enum WriteOperation {
    /// Replaces the whole document, creating it when absent.
    Set {
        collection: String,
        id: String,
        data: DocumentData,
    },
    /// Merges top-level fields and applies transforms; the document must exist.
    Update {
        collection: String,
        id: String,
        data: DocumentData,
        transforms: Vec<FieldTransform>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl WriteOperation {
    pub fn collection(&self) -> &str {
        match self {
            WriteOperation::Set { collection, .. }
            | WriteOperation::Update { collection, .. }
            | WriteOperation::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOperation::Set { id, .. }
            | WriteOperation::Update { id, .. }
            | WriteOperation::Delete { id, .. } => id,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ListenTarget {
    Document { collection: String, id: String },
    Query(StructuredQuery),
}

impl ListenTarget {
    pub fn collection(&self) -> &str {
        match self {
            ListenTarget::Document { collection, .. } => collection,
            ListenTarget::Query(query) => query.collection_id(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ListenEvent {
    Document(DocumentSnapshot),
    Query(Vec<DocumentSnapshot>),
}

pub type ListenCallback = Arc<dyn Fn(ListenEvent) + Send + Sync + 'static>;

/// Backend seam of the record gateway.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get_document(&self, collection: &str, id: &str) -> FirestoreResult<DocumentSnapshot>;
    async fn run_query(&self, query: &StructuredQuery) -> FirestoreResult<Vec<DocumentSnapshot>>;
    async fn run_count(&self, query: &StructuredQuery) -> FirestoreResult<u64>;
    /// Applies every write or none of them.
    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()>;
    /// Delivers the current state to `callback` and again whenever it changes.
    async fn listen(
        &self,
        target: ListenTarget,
        callback: ListenCallback,
    ) -> FirestoreResult<ListenerRegistration>;
}

#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn get_token(&self) -> FirestoreResult<Option<String>>;
}

#[derive(Default, Clone)]
pub struct NoopTokenProvider;

#[async_trait]
impl TokenProvider for NoopTokenProvider {
    async fn get_token(&self) -> FirestoreResult<Option<String>> {
        Ok(None)
    }
}

/// A fixed bearer token, such as an ID token obtained from the user gateway.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> FirestoreResult<Option<String>> {
        Ok(Some(self.token.clone()))
    }
}

pub type TokenProviderArc = Arc<dyn TokenProvider>;

pub use http::HttpDocumentStore;
pub use memory::MemoryDocumentStore;
