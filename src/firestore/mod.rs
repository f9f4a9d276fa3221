//! Cloud Firestore record gateway.
//!
//! [`RecordGateway`] wraps one collection and talks to the database through a
//! [`DocumentStore`]: [`MemoryDocumentStore`] keeps everything in process, while
//! [`HttpDocumentStore`] speaks the Firestore REST v1 API.

mod error;
mod gateway;
mod listener;
mod query;
mod snapshot;
pub mod store;
mod value;

#[doc(inline)]
pub use error::{
    aborted, already_exists, deadline_exceeded, failed_precondition, internal_error,
    invalid_argument, missing_project_id, not_found, permission_denied, resource_exhausted,
    unauthenticated, unavailable, FirestoreError, FirestoreErrorCode, FirestoreResult,
};

#[doc(inline)]
pub use gateway::{IncrementDecrement, RecordGateway, StreamData};

#[doc(inline)]
pub use listener::ListenerRegistration;

#[doc(inline)]
pub use query::{
    translate, translate_and_or, AndOrQueryOptions, AndOrWhereClause, ClauseKind, CompositeMode,
    Cursor, Direction, Filter, OrderBy, QueryConstraint, QueryOptions, StructuredQuery,
    WhereClause, WhereFilterOp,
};

#[doc(inline)]
pub use snapshot::{DocumentSnapshot, SnapshotMetadata};

#[doc(inline)]
pub use store::{
    DocumentStore, HttpDocumentStore, ListenCallback, ListenEvent, ListenTarget,
    MemoryDocumentStore, NoopTokenProvider, StaticTokenProvider, TokenProvider, WriteOperation,
};

#[doc(inline)]
pub use value::{DocumentData, FieldTransform, Record, TransformOp, REFERENCE_FIELD};
