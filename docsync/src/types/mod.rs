mod document;
mod event;
mod token;

pub use document::*;
pub use event::*;
pub use token::*;
