//! Domain types for line delivery

mod event;
mod line;

pub use event::{ConnectionEvent, ConnectionHub, ConnectionListener};
pub use line::{Line, Word};
pub(crate) use line::{CR, LF, SPACE};
