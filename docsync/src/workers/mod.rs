//! Collection supervisors and the pool that owns them.

pub mod collection;
pub mod policy;
pub mod pool;
