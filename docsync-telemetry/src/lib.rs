//! Logging setup shared by the replicator binary and the tests.

pub mod tracing;
