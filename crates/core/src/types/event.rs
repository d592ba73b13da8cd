//! Connection event kinds

use crate::events::{EventHub, EventKind, Listener};
use crate::types::Line;

/// Events published by a [`SecureLineConnection`](crate::SecureLineConnection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// A complete line arrived; payload is the [`Line`]
    LineReceived,

    /// The receive loop stopped on an I/O error while the connection was
    /// still meant to be open; no payload
    ReceiveInterrupted,
}

impl EventKind for ConnectionEvent {
    const ALL: &'static [Self] = &[
        ConnectionEvent::LineReceived,
        ConnectionEvent::ReceiveInterrupted,
    ];
}

/// Hub type embedded in every connection
pub type ConnectionHub = EventHub<ConnectionEvent, Line>;

/// Listener type accepted by a connection
pub type ConnectionListener = Listener<ConnectionEvent, Line>;
