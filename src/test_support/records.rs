use std::sync::Arc;

use crate::firestore::{MemoryDocumentStore, RecordGateway};

/// Record gateway over a fresh in-memory store, returned together with the store.
pub fn memory_records(table: &str) -> (RecordGateway, Arc<MemoryDocumentStore>) {
    let store = Arc::new(MemoryDocumentStore::new());
    (RecordGateway::new(table, store.clone()), store)
}
