use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Number, Value};

use crate::firestore::error::{aborted, invalid_argument, not_found, FirestoreError, FirestoreResult};
use crate::firestore::listener::ListenerRegistration;
use crate::firestore::query::{
    translate, translate_and_or, AndOrQueryOptions, Cursor, QueryOptions, StructuredQuery,
    WhereClause,
};
use crate::firestore::snapshot::DocumentSnapshot;
use crate::firestore::store::{DocumentStore, ListenEvent, ListenTarget, WriteOperation};
use crate::firestore::value::{into_write_payload, DocumentData, FieldTransform, Record};
use crate::logger::Logger;
use crate::util::auto_id;

const LOGGER_NAME: &str = "@firebase-gateway/records";
const AUTO_ID_ATTEMPTS: usize = 5;

/// What a stream callback receives on every change.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamData {
    /// The watched document, `None` while it does not exist.
    Document(Option<Record>),
    Collection(Vec<Record>),
}

/// Arguments of [`RecordGateway::increment_decrement`].
#[derive(Clone, Debug, PartialEq)]
pub struct IncrementDecrement {
    pub id: String,
    pub key: String,
    pub is_increment: bool,
    /// Magnitude of the change, 1 when absent.
    pub incremental_value: Option<Number>,
}

impl IncrementDecrement {
    pub fn increment(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            is_increment: true,
            incremental_value: None,
        }
    }

    pub fn decrement(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            is_increment: false,
            ..Self::increment(id, key)
        }
    }

    pub fn by(mut self, value: impl Into<Number>) -> Self {
        self.incremental_value = Some(value.into());
        self
    }

    fn operand(&self) -> Number {
        let magnitude = self
            .incremental_value
            .clone()
            .unwrap_or_else(|| Number::from(1));
        if self.is_increment {
            magnitude
        } else {
            negate(&magnitude)
        }
    }
}

fn negate(number: &Number) -> Number {
    if let Some(value) = number.as_i64().and_then(i64::checked_neg) {
        return Number::from(value);
    }
    Number::from_f64(-number.as_f64().unwrap_or(0.0)).unwrap_or_else(|| Number::from(0))
}

/// CRUD, batches, counters and subscriptions over one collection.
///
/// Every failure is returned as a [`FirestoreError`] whose message starts with the name of
/// the failing operation, and is logged at error level on the gateway logger.
///
/// Queries remember the last document they returned; [`Cursor::LastSeen`] resumes from it.
#[derive(Clone)]
pub struct RecordGateway {
    table: String,
    store: Arc<dyn DocumentStore>,
    logger: Logger,
    last_seen: Arc<Mutex<Option<DocumentSnapshot>>>,
}

impl RecordGateway {
    pub fn new(table: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            table: table.into(),
            store,
            logger: Logger::new(LOGGER_NAME),
            last_seen: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// The cursor [`Cursor::LastSeen`] currently resolves to.
    pub fn last_seen(&self) -> Option<DocumentSnapshot> {
        self.cursor_slot().clone()
    }

    pub fn reset_cursor(&self) {
        *self.cursor_slot() = None;
    }

    pub async fn find(&self, id: &str) -> FirestoreResult<Option<Record>> {
        self.store
            .get_document(&self.table, id)
            .await
            .map(DocumentSnapshot::into_record)
            .map_err(|err| self.fail("find", err))
    }

    pub async fn data_exists(&self, id: &str) -> FirestoreResult<bool> {
        self.store
            .get_document(&self.table, id)
            .await
            .map(|snapshot| snapshot.exists())
            .map_err(|err| self.fail("data_exists", err))
    }

    /// The whole collection, or the subset of `ids` that exist.
    ///
    /// Ids are fetched one at a time in the given order; the first failing fetch aborts.
    pub async fn find_all(&self, ids: Option<&[String]>) -> FirestoreResult<Vec<Record>> {
        let Some(ids) = ids else {
            let query = StructuredQuery::collection(self.table.clone());
            let snapshots = self
                .store
                .run_query(&query)
                .await
                .map_err(|err| self.fail("find_all", err))?;
            return Ok(into_records(snapshots));
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let snapshot = self
                .store
                .get_document(&self.table, id)
                .await
                .map_err(|err| self.fail("find_all", err))?;
            if let Some(record) = snapshot.into_record() {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn find_where(&self, options: &QueryOptions) -> FirestoreResult<Vec<Record>> {
        let result = async {
            let cursor = self.resolve_cursor(options.cursor.as_ref()).await?;
            let query = StructuredQuery::new(self.table.clone(), translate(options, cursor));
            self.store.run_query(&query).await
        }
        .await;
        self.finish_query("find_where", result)
    }

    pub async fn find_where_or_and(&self, options: &AndOrQueryOptions) -> FirestoreResult<Vec<Record>> {
        let result = async {
            let cursor = self.resolve_cursor(options.cursor.as_ref()).await?;
            let query = StructuredQuery::new(self.table.clone(), translate_and_or(options, cursor));
            self.store.run_query(&query).await
        }
        .await;
        self.finish_query("find_where_or_and", result)
    }

    /// Creates the document under a fresh id when `id` is `None`, otherwise replaces it.
    ///
    /// Returns the document id.
    pub async fn save(&self, data: Value, id: Option<&str>) -> FirestoreResult<String> {
        let result = async {
            let (payload, _) = into_write_payload(data)?;
            let id = match id {
                Some(id) => id.to_string(),
                None => self.unused_id().await?,
            };
            self.store
                .commit(vec![self.set_write(id.clone(), payload)])
                .await?;
            Ok::<_, FirestoreError>(id)
        }
        .await;
        result.map_err(|err| self.fail("save", err))
    }

    /// Merges the given fields into an existing document.
    pub async fn update(&self, data: Value, id: &str) -> FirestoreResult<()> {
        let result = async {
            let (payload, _) = into_write_payload(data)?;
            self.store
                .commit(vec![self.update_write(id.to_string(), payload, Vec::new())])
                .await
        }
        .await;
        result.map_err(|err| self.fail("update", err))
    }

    pub async fn delete(&self, id: &str) -> FirestoreResult<()> {
        self.store
            .commit(vec![self.delete_write(id.to_string())])
            .await
            .map_err(|err| self.fail("delete", err))
    }

    /// Adds `values` to the array at `key`, skipping elements already present.
    pub async fn update_atomic_array(&self, values: Vec<Value>, id: &str, key: &str) -> FirestoreResult<()> {
        let write = self.update_write(
            id.to_string(),
            DocumentData::new(),
            vec![FieldTransform::array_union(key, values)],
        );
        self.store
            .commit(vec![write])
            .await
            .map_err(|err| self.fail("update_atomic_array", err))
    }

    /// Removes every occurrence of `values` from the array at `key`.
    pub async fn remove_from_array(&self, values: Vec<Value>, id: &str, key: &str) -> FirestoreResult<()> {
        let write = self.update_write(
            id.to_string(),
            DocumentData::new(),
            vec![FieldTransform::array_remove(key, values)],
        );
        self.store
            .commit(vec![write])
            .await
            .map_err(|err| self.fail("remove_from_array", err))
    }

    /// Writes every item in one atomic commit. An item's `reference` is used as its id.
    pub async fn save_batch(&self, items: Vec<Value>) -> FirestoreResult<Vec<String>> {
        let result = async {
            let mut ids = Vec::with_capacity(items.len());
            let mut writes = Vec::with_capacity(items.len());
            for item in items {
                let (payload, reference) = into_write_payload(item)?;
                let id = reference.unwrap_or_else(auto_id);
                writes.push(self.set_write(id.clone(), payload));
                ids.push(id);
            }
            self.store.commit(writes).await?;
            Ok::<_, FirestoreError>(ids)
        }
        .await;
        result.map_err(|err| self.fail("save_batch", err))
    }

    /// Merges every item into the document named by its `reference`, in one atomic commit.
    pub async fn update_batch(&self, items: Vec<Value>) -> FirestoreResult<()> {
        let result = async {
            let mut writes = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let (payload, reference) = into_write_payload(item)?;
                let id = reference.ok_or_else(|| {
                    invalid_argument(format!("item {index} has no reference"))
                })?;
                writes.push(self.update_write(id, payload, Vec::new()));
            }
            self.store.commit(writes).await
        }
        .await;
        result.map_err(|err| self.fail("update_batch", err))
    }

    pub async fn delete_batch(&self, ids: &[String]) -> FirestoreResult<()> {
        let writes = ids.iter().map(|id| self.delete_write(id.clone())).collect();
        self.store
            .commit(writes)
            .await
            .map_err(|err| self.fail("delete_batch", err))
    }

    /// Atomically adds to (or subtracts from) a numeric field.
    pub async fn increment_decrement(&self, change: IncrementDecrement) -> FirestoreResult<()> {
        let transform = FieldTransform::increment(change.key.clone(), change.operand());
        let write = self.update_write(change.id.clone(), DocumentData::new(), vec![transform]);
        self.store
            .commit(vec![write])
            .await
            .map_err(|err| self.fail("increment_decrement", err))
    }

    /// Server side count of the documents matching every clause.
    pub async fn count_data(&self, clauses: &[WhereClause]) -> FirestoreResult<u64> {
        let options = QueryOptions::with_clauses(clauses.to_vec());
        let query = StructuredQuery::new(self.table.clone(), translate(&options, None));
        self.store
            .run_count(&query)
            .await
            .map_err(|err| self.fail("count_data", err))
    }

    /// Watches one document when `id` is given, otherwise the whole collection.
    ///
    /// Setup failures go to `error_handler` and no registration is returned.
    pub async fn stream<F, E>(&self, callback: F, error_handler: E, id: Option<&str>) -> Option<ListenerRegistration>
    where
        F: Fn(StreamData) + Send + Sync + 'static,
        E: FnOnce(FirestoreError),
    {
        let target = match id {
            Some(id) => ListenTarget::Document {
                collection: self.table.clone(),
                id: id.to_string(),
            },
            None => ListenTarget::Query(StructuredQuery::collection(self.table.clone())),
        };
        self.register("stream", target, callback, error_handler).await
    }

    /// Watches the documents matching `options`.
    pub async fn stream_where<F, E>(
        &self,
        options: &QueryOptions,
        callback: F,
        error_handler: E,
    ) -> Option<ListenerRegistration>
    where
        F: Fn(StreamData) + Send + Sync + 'static,
        E: FnOnce(FirestoreError),
    {
        let cursor = match self.resolve_cursor(options.cursor.as_ref()).await {
            Ok(cursor) => cursor,
            Err(err) => {
                error_handler(self.fail("stream_where", err));
                return None;
            }
        };
        let query = StructuredQuery::new(self.table.clone(), translate(options, cursor));
        self.register("stream_where", ListenTarget::Query(query), callback, error_handler)
            .await
    }

    async fn register<F, E>(
        &self,
        operation: &str,
        target: ListenTarget,
        callback: F,
        error_handler: E,
    ) -> Option<ListenerRegistration>
    where
        F: Fn(StreamData) + Send + Sync + 'static,
        E: FnOnce(FirestoreError),
    {
        let listener = Arc::new(move |event: ListenEvent| {
            let data = match event {
                ListenEvent::Document(snapshot) => StreamData::Document(snapshot.into_record()),
                ListenEvent::Query(snapshots) => StreamData::Collection(into_records(snapshots)),
            };
            callback(data);
        });
        match self.store.listen(target, listener).await {
            Ok(registration) => Some(registration),
            Err(err) => {
                error_handler(self.fail(operation, err));
                None
            }
        }
    }

    async fn resolve_cursor(&self, cursor: Option<&Cursor>) -> FirestoreResult<Option<DocumentSnapshot>> {
        match cursor {
            None => Ok(None),
            Some(Cursor::Snapshot(snapshot)) => Ok(Some(snapshot.clone())),
            Some(Cursor::LastSeen) => Ok(self.last_seen()),
            Some(Cursor::DocumentId(id)) => {
                let snapshot = self.store.get_document(&self.table, id).await?;
                if snapshot.exists() {
                    Ok(Some(snapshot))
                } else {
                    Err(not_found(format!(
                        "Cursor document {}/{id} does not exist",
                        self.table
                    )))
                }
            }
        }
    }

    fn finish_query(
        &self,
        operation: &str,
        result: FirestoreResult<Vec<DocumentSnapshot>>,
    ) -> FirestoreResult<Vec<Record>> {
        let snapshots = result.map_err(|err| self.fail(operation, err))?;
        if let Some(last) = snapshots.last() {
            *self.cursor_slot() = Some(last.clone());
        }
        Ok(into_records(snapshots))
    }

    async fn unused_id(&self) -> FirestoreResult<String> {
        for _ in 0..AUTO_ID_ATTEMPTS {
            let candidate = auto_id();
            if !self.store.get_document(&self.table, &candidate).await?.exists() {
                return Ok(candidate);
            }
        }
        Err(aborted("Could not allocate an unused document id"))
    }

    fn set_write(&self, id: String, data: DocumentData) -> WriteOperation {
        WriteOperation::Set {
            collection: self.table.clone(),
            id,
            data,
        }
    }

    fn update_write(&self, id: String, data: DocumentData, transforms: Vec<FieldTransform>) -> WriteOperation {
        WriteOperation::Update {
            collection: self.table.clone(),
            id,
            data,
            transforms,
        }
    }

    fn delete_write(&self, id: String) -> WriteOperation {
        WriteOperation::Delete {
            collection: self.table.clone(),
            id,
        }
    }

    fn cursor_slot(&self) -> MutexGuard<'_, Option<DocumentSnapshot>> {
        self.last_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fail(&self, operation: &str, err: FirestoreError) -> FirestoreError {
        let err = err.in_operation(operation);
        self.logger
            .error_with([self.table.as_str(), err.to_string().as_str()]);
        err
    }
}

fn into_records(snapshots: Vec<DocumentSnapshot>) -> Vec<Record> {
    snapshots
        .into_iter()
        .filter_map(DocumentSnapshot::into_record)
        .collect()
}
