//! Store gateway and checkpoint persistence.
//!
//! [`document`] holds the [`document::Store`] capability the pipeline uses to read from the
//! source and write to the destination, [`checkpoint`] persists change feed positions.

pub mod checkpoint;
pub mod document;
