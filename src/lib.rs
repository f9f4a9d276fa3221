//! Gateways over the Firebase backend services.
//!
//! The crate exposes three call groups that sit between application code and the
//! Firebase services:
//!
//! * [`firestore::RecordGateway`] performs per-collection CRUD, batches, counters,
//!   count aggregation and real-time subscriptions on Cloud Firestore documents.
//! * [`storage::StorageUpload`] validates a file against an upload category, derives a
//!   randomized object path and uploads it to Cloud Storage, returning a download URL.
//! * [`auth::UserGateway`] wraps password, phone and multi-factor sign-in flows and keeps a
//!   profile document in sync through a [`firestore::RecordGateway`].
//!
//! Each service talks to its backend through a trait (`DocumentStore`, `ObjectStore`,
//! `IdentityProvider`) with an in-memory implementation for tests and local tooling and a
//! REST implementation built on `reqwest`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use firebase_gateway::config::FirebaseOptions;
//! use firebase_gateway::firestore::{HttpDocumentStore, RecordGateway};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = FirebaseOptions::from_env();
//! let store = Arc::new(HttpDocumentStore::from_options(&options)?);
//! let users = RecordGateway::new("users", store);
//! let id = users
//!     .save(json!({ "name": "Ada", "status": "active" }), None)
//!     .await?;
//! let record = users.find(&id).await?;
//! assert!(record.is_some());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod firestore;
pub mod logger;
pub mod storage;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;
