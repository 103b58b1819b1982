//! The two phases of a collection pair: the snapshot copy and the change feed consumer.

pub mod apply;
pub mod cutover;
pub mod snapshot;
