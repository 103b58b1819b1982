mod base;
mod collection;
mod connection;
mod cutover;
mod pipeline;
mod sync;

pub use base::*;
pub use collection::*;
pub use connection::*;
pub use cutover::*;
pub use pipeline::*;
pub use sync::*;
