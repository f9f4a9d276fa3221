use serde_json::Value;

use crate::firestore::value::{DocumentData, Record};

/// Metadata about the state of a document snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotMetadata {
    from_cache: bool,
}

impl SnapshotMetadata {
    pub fn new(from_cache: bool) -> Self {
        Self { from_cache }
    }

    /// Indicates whether the snapshot was served by a process-local store.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }
}

/// The state of one document at the time it was read.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    collection: String,
    id: String,
    data: Option<DocumentData>,
    metadata: SnapshotMetadata,
}

impl DocumentSnapshot {
    pub fn new(
        collection: impl Into<String>,
        id: impl Into<String>,
        data: Option<DocumentData>,
        metadata: SnapshotMetadata,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            data,
            metadata,
        }
    }

    pub fn missing(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(collection, id, None, SnapshotMetadata::default())
    }

    /// Returns whether the document exists on the backend.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&DocumentData> {
        self.data.as_ref()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.as_ref()?.get(field)
    }

    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Slash separated path relative to the database root.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }

    /// Converts an existing document into a [`Record`].
    pub fn into_record(self) -> Option<Record> {
        let id = self.id;
        self.data.map(|data| Record::new(id, data))
    }
}
