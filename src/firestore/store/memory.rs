use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;

use crate::firestore::error::{invalid_argument, not_found, FirestoreError, FirestoreResult};
use crate::firestore::listener::ListenerRegistration;
use crate::firestore::query::StructuredQuery;
use crate::firestore::snapshot::{DocumentSnapshot, SnapshotMetadata};
use crate::firestore::value::DocumentData;

use super::evaluator;
use super::{DocumentStore, ListenCallback, ListenEvent, ListenTarget, WriteOperation};

type DocumentKey = (String, String);

/// Process-local document store with atomic commits and synchronous listeners.
///
/// Listeners receive the current state when they are registered and again after every
/// commit touching their document (or, for queries, their collection). Callbacks run after
/// the store locks are released, so they may call back into the store.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    documents: Mutex<BTreeMap<DocumentKey, DocumentData>>,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
    pending_failure: Mutex<Option<FirestoreError>>,
}

#[derive(Clone)]
struct ListenerEntry {
    id: u64,
    target: ListenTarget,
    callback: ListenCallback,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail with `error` without applying any write.
    pub fn fail_next_commit(&self, error: FirestoreError) {
        *lock(&self.inner.pending_failure) = Some(error);
    }

    /// Number of documents currently stored in `collection`.
    pub fn document_count(&self, collection: &str) -> usize {
        lock(&self.inner.documents)
            .keys()
            .filter(|(name, _)| name == collection)
            .count()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    fn collection_snapshots(&self, collection: &str) -> Vec<DocumentSnapshot> {
        let documents = lock(&self.inner.documents);
        documents
            .iter()
            .filter(|((name, _), _)| name == collection)
            .map(|((name, id), data)| {
                DocumentSnapshot::new(name.clone(), id.clone(), Some(data.clone()), metadata())
            })
            .collect()
    }

    fn document_snapshot(&self, collection: &str, id: &str) -> DocumentSnapshot {
        let documents = lock(&self.inner.documents);
        let data = documents
            .get(&(collection.to_string(), id.to_string()))
            .cloned();
        DocumentSnapshot::new(collection, id, data, metadata())
    }

    fn event_for(&self, target: &ListenTarget) -> ListenEvent {
        match target {
            ListenTarget::Document { collection, id } => {
                ListenEvent::Document(self.document_snapshot(collection, id))
            }
            ListenTarget::Query(query) => {
                let documents = self.collection_snapshots(query.collection_id());
                ListenEvent::Query(evaluator::evaluate(query, documents))
            }
        }
    }

    fn notify(&self, touched: &BTreeSet<DocumentKey>) {
        let listeners: Vec<ListenerEntry> = lock(&self.inner.listeners).clone();
        for entry in listeners {
            let affected = match &entry.target {
                ListenTarget::Document { collection, id } => {
                    touched.contains(&(collection.clone(), id.clone()))
                }
                ListenTarget::Query(query) => touched
                    .iter()
                    .any(|(collection, _)| collection == query.collection_id()),
            };
            if affected {
                let event = self.event_for(&entry.target);
                (entry.callback)(event);
            }
        }
    }
}

impl MemoryInner {
    fn remove_listener(&self, id: u64) {
        lock(&self.listeners).retain(|entry| entry.id != id);
    }
}

fn metadata() -> SnapshotMetadata {
    SnapshotMetadata::new(true)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn validate_path(collection: &str, id: &str) -> FirestoreResult<()> {
    if collection.is_empty() || collection.contains('/') {
        return Err(invalid_argument(format!(
            "Invalid collection name '{collection}'"
        )));
    }
    if id.is_empty() || id.contains('/') {
        return Err(invalid_argument(format!(
            "Invalid document id '{id}' in collection {collection}"
        )));
    }
    Ok(())
}

fn apply_write(
    staged: &mut BTreeMap<DocumentKey, DocumentData>,
    write: WriteOperation,
) -> FirestoreResult<()> {
    validate_path(write.collection(), write.id())?;
    match write {
        WriteOperation::Set {
            collection,
            id,
            data,
        } => {
            staged.insert((collection, id), data);
        }
        WriteOperation::Update {
            collection,
            id,
            data,
            transforms,
        } => {
            let key = (collection, id);
            let current = staged.get_mut(&key).ok_or_else(|| {
                not_found(format!("No document to update: {}/{}", key.0, key.1))
            })?;
            for (field, value) in data {
                current.insert(field, value);
            }
            for transform in transforms {
                let value = transform.apply(current.get(&transform.field));
                current.insert(transform.field.clone(), value);
            }
        }
        WriteOperation::Delete { collection, id } => {
            staged.remove(&(collection, id));
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(&self, collection: &str, id: &str) -> FirestoreResult<DocumentSnapshot> {
        validate_path(collection, id)?;
        Ok(self.document_snapshot(collection, id))
    }

    async fn run_query(&self, query: &StructuredQuery) -> FirestoreResult<Vec<DocumentSnapshot>> {
        let documents = self.collection_snapshots(query.collection_id());
        Ok(evaluator::evaluate(query, documents))
    }

    async fn run_count(&self, query: &StructuredQuery) -> FirestoreResult<u64> {
        let documents = self.collection_snapshots(query.collection_id());
        Ok(evaluator::count(query, &documents))
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        if let Some(error) = lock(&self.inner.pending_failure).take() {
            return Err(error);
        }
        if writes.is_empty() {
            return Ok(());
        }

        let touched: BTreeSet<DocumentKey> = writes
            .iter()
            .map(|write| (write.collection().to_string(), write.id().to_string()))
            .collect();

        {
            let mut documents = lock(&self.inner.documents);
            let mut staged = documents.clone();
            for write in writes {
                apply_write(&mut staged, write)?;
            }
            *documents = staged;
        }

        self.notify(&touched);
        Ok(())
    }

    async fn listen(
        &self,
        target: ListenTarget,
        callback: ListenCallback,
    ) -> FirestoreResult<ListenerRegistration> {
        if let ListenTarget::Document { collection, id } = &target {
            validate_path(collection, id)?;
        }

        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.listeners).push(ListenerEntry {
            id,
            target: target.clone(),
            callback: callback.clone(),
        });

        callback(self.event_for(&target));

        let inner: Weak<MemoryInner> = Arc::downgrade(&self.inner);
        Ok(ListenerRegistration::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove_listener(id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::error::aborted;
    use crate::firestore::value::FieldTransform;
    use serde_json::{json, Number};

    fn data(value: serde_json::Value) -> DocumentData {
        value.as_object().cloned().unwrap()
    }

    fn set(id: &str, value: serde_json::Value) -> WriteOperation {
        WriteOperation::Set {
            collection: "cities".into(),
            id: id.into(),
            data: data(value),
        }
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = MemoryDocumentStore::new();
        store.commit(vec![set("sf", json!({ "name": "SF" }))]).await.unwrap();
        let snapshot = store.get_document("cities", "sf").await.unwrap();
        assert!(snapshot.exists());
        assert_eq!(snapshot.get("name"), Some(&json!("SF")));
        assert!(!store.get_document("cities", "la").await.unwrap().exists());
    }

    #[tokio::test]
    async fn failed_write_rolls_back_the_whole_commit() {
        let store = MemoryDocumentStore::new();
        let result = store
            .commit(vec![
                set("sf", json!({ "name": "SF" })),
                WriteOperation::Update {
                    collection: "cities".into(),
                    id: "missing".into(),
                    data: data(json!({ "name": "?" })),
                    transforms: Vec::new(),
                },
            ])
            .await;
        assert_eq!(result.unwrap_err().code_str(), "firestore/not-found");
        assert_eq!(store.document_count("cities"), 0);
    }

    #[tokio::test]
    async fn update_merges_and_transforms() {
        let store = MemoryDocumentStore::new();
        store
            .commit(vec![set("sf", json!({ "name": "SF", "visits": 2 }))])
            .await
            .unwrap();
        store
            .commit(vec![WriteOperation::Update {
                collection: "cities".into(),
                id: "sf".into(),
                data: data(json!({ "state": "CA" })),
                transforms: vec![FieldTransform::increment("visits", Number::from(3))],
            }])
            .await
            .unwrap();
        let snapshot = store.get_document("cities", "sf").await.unwrap();
        assert_eq!(
            snapshot.data().cloned(),
            Some(data(json!({ "name": "SF", "state": "CA", "visits": 5 })))
        );
    }

    #[tokio::test]
    async fn injected_failure_applies_nothing() {
        let store = MemoryDocumentStore::new();
        store.fail_next_commit(aborted("contention"));
        assert!(store.commit(vec![set("sf", json!({}))]).await.is_err());
        assert_eq!(store.document_count("cities"), 0);
        store.commit(vec![set("sf", json!({}))]).await.unwrap();
        assert_eq!(store.document_count("cities"), 1);
    }

    #[tokio::test]
    async fn listeners_stop_after_detach() {
        let store = MemoryDocumentStore::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut registration = store
            .listen(
                ListenTarget::Document {
                    collection: "cities".into(),
                    id: "sf".into(),
                },
                Arc::new(move |event: ListenEvent| sink.lock().unwrap().push(event)),
            )
            .await
            .unwrap();

        store.commit(vec![set("sf", json!({ "name": "SF" }))]).await.unwrap();
        store.commit(vec![set("la", json!({ "name": "LA" }))]).await.unwrap();
        registration.detach();
        store.commit(vec![set("sf", json!({ "name": "San Francisco" }))]).await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ListenEvent::Document(s) if !s.exists()));
        assert!(matches!(&events[1], ListenEvent::Document(s) if s.exists()));
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn detach_after_store_dropped_is_noop() {
        let store = MemoryDocumentStore::new();
        let mut registration = store
            .listen(
                ListenTarget::Query(StructuredQuery::collection("cities")),
                Arc::new(|_: ListenEvent| {}),
            )
            .await
            .unwrap();
        drop(store);
        registration.detach();
        assert!(!registration.is_active());
    }
}
