//! Helpers for tests of the replication pipeline.

pub mod collection;
pub mod faulty_store;
pub mod notify;
pub mod notifying_checkpoint_store;
pub mod wait;
