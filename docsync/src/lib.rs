//! Document replication between two document stores.
//!
//! A [`pipeline::Pipeline`] runs one supervisor per configured collection pair. Each supervisor
//! optionally copies the documents that existed before a cutover time and then follows the
//! source change feed, applying every event to the destination and checkpointing its position
//! after each event.

pub mod concurrency;
pub mod error;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod replication;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
