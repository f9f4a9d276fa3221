//! Test utilities shared across crate-level unit tests.

pub mod http;
pub mod records;

pub use http::start_mock_server;
pub use records::memory_records;
