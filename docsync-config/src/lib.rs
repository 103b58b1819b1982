//! Configuration types and loading for the docsync replicator.
//!
//! The [`shared`] module holds the structures deserialized from the operator-provided
//! configuration record, while [`load_config`] resolves where that record comes from
//! (a JSON file or an inline JSON environment variable) and layers `APP_` overrides on top.

mod load;
pub mod shared;

pub use load::*;
