//! Linewire Core - Secure line-oriented network client
//!
//! This crate provides:
//! - Enumeration-keyed event hub (publish/subscribe)
//! - Incremental CRLF line tokenizer
//! - TLS transport over blocking TCP (rustls)
//! - `SecureLineConnection`: connect/send/disconnect plus a background
//!   receive loop that publishes every inbound line
//! - Error types

pub mod connection;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-export common types
pub use connection::{ConnectionState, SecureLineConnection};
pub use error::{CoreError, Result};
pub use events::{EmitReport, EventHub, EventKind, Listener};
pub use protocol::LineTokenizer;
pub use transport::{load_pem_certificates, TransportConfig, TrustPolicy};
pub use types::{ConnectionEvent, ConnectionHub, ConnectionListener, Line, Word};
