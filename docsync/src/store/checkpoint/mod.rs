mod base;
pub mod document;
pub mod memory;

pub use base::*;
