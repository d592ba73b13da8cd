//! Typed publish/subscribe plumbing
//!
//! Producers (the connection's receive loop) and consumers (application
//! listeners) only share the [`EventKind`] enumeration and the payload type.

pub mod hub;

pub use hub::{EmitReport, EventHub, EventKind, Listener};
