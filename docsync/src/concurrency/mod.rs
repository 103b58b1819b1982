//! Coordination primitives shared by the pipeline and its supervisors.
//!
//! [`shutdown`] broadcasts a cooperative stop request to every task. [`signal`] carries the
//! streaming gate that keeps supervisors from subscribing to their change feeds until every
//! copy phase in the fleet has finished.

pub mod shutdown;
pub mod signal;
