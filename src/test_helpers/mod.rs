//! # Test Helpers
//!
//! In-memory doubles for exercising producers, consumers and the configurator
//! without a database server, plus schema fixtures shaped like real deployments.
//! Integration tests against a live Postgres read `TEST_DATABASE_URL` and skip
//! when it is unset.

pub mod fixtures;
pub mod memory_database;
pub mod recording_handler;

pub use fixtures::{
    incoming_v12_schema, incoming_v1_schema, outgoing_v11_schema, outgoing_v12_schema,
    outgoing_v1_schema, schema_for,
};
pub use memory_database::{
    MemoryConnection, MemoryDatabase, MemoryRow, MemorySnapshot, StatementKind,
};
pub use recording_handler::RecordingHandler;

/// Postgres URL for live integration tests, if configured
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok().filter(|url| !url.is_empty())
}
