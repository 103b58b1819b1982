mod any;
mod base;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

pub use any::*;
pub use base::*;
