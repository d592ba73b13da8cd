//! Secure line connection
//!
//! Owns one TLS socket at a time plus the background receive loop that turns
//! its inbound bytes into [`Line`]s and publishes them on the embedded hub.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --connect()--> Connected --disconnect()--> Closed
//!                        ^                           |
//!                        +--------connect()----------+
//! ```
//!
//! ## Threads
//!
//! Every successful `connect()` spawns exactly one reader thread. It blocks
//! on the socket, tokenizes, and invokes `LineReceived` listeners on its own
//! stack, so a slow listener delays every later line on that connection.
//!
//! `disconnect()` stops the reader only by closing the inbound half of the
//! socket. When it is called from a listener (i.e. on the reader thread
//! itself) it skips the join, because the reader cannot wait for itself.
//! Listeners that need the connection should capture a `Weak` to it; a
//! strong reference inside a listener keeps the connection alive forever.

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::events::EmitReport;
use crate::protocol::LineTokenizer;
use crate::transport::{self, TlsReader, TlsSession, TransportConfig};
use crate::types::{ConnectionEvent, ConnectionHub, ConnectionListener, Line};
use crate::{CoreError, Result};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, never connected
    Idle,
    /// Socket open, receive loop running
    Connected,
    /// Disconnected; `connect()` may be called again
    Closed,
}

/// TLS client that publishes inbound CRLF-terminated lines
pub struct SecureLineConnection {
    host: String,
    addr: SocketAddr,
    server_name: ServerName<'static>,
    tls_config: Arc<ClientConfig>,
    read_buffer_size: usize,
    hub: Arc<ConnectionHub>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    link: Option<Link>,
    /// Reader that disconnected itself from a listener and was not joined
    detached: Option<JoinHandle<()>>,
}

/// Resources of one connect/disconnect cycle
struct Link {
    session: Arc<TlsSession>,
    closing: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl SecureLineConnection {
    /// Create an idle connection to `host:port`
    ///
    /// # Errors
    /// - `Configuration` for an empty host, port 0 or invalid TLS settings
    /// - `UnknownHost` if `host` does not resolve
    pub fn new(host: &str, port: u16, config: TransportConfig) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(CoreError::Configuration("Host cannot be empty".to_string()));
        }
        if port == 0 {
            return Err(CoreError::Configuration("Port cannot be 0".to_string()));
        }

        config.validate()?;
        let server_name = config.resolve_server_name(host)?;
        let addr = resolve(host, port)?;
        let tls_config = transport::configure_client(&config)?;

        debug!("Resolved {}:{} to {}", host, port, addr);

        Ok(Self {
            host: host.to_string(),
            addr,
            server_name,
            tls_config,
            read_buffer_size: config.read_buffer_size,
            hub: Arc::new(ConnectionHub::new()?),
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                link: None,
                detached: None,
            }),
        })
    }

    /// Open the TLS socket and start the receive loop
    ///
    /// Blocks until the handshake completes, and until a reader left over
    /// from a disconnect inside a listener has finished. On failure the
    /// state is left unchanged.
    pub fn connect(&self) -> Result<()> {
        let detached = self.lock_inner().detached.take();
        if let Some(reader) = detached {
            join_reader(reader);
        }

        let mut inner = self.lock_inner();
        if inner.state == ConnectionState::Connected {
            return Err(CoreError::AlreadyConnected);
        }

        info!("Connecting to {} ({})...", self.host, self.addr);

        let session = Arc::new(TlsSession::establish(
            self.addr,
            self.server_name.clone(),
            Arc::clone(&self.tls_config),
        )?);
        let closing = Arc::new(AtomicBool::new(false));

        let receive_loop = ReceiveLoop {
            reader: session.reader(self.read_buffer_size),
            hub: Arc::clone(&self.hub),
            closing: Arc::clone(&closing),
            peer: self.addr,
        };
        let reader = thread::Builder::new()
            .name(format!("linewire-recv-{}", self.addr))
            .spawn(move || receive_loop.run())?;

        inner.link = Some(Link {
            session,
            closing,
            reader,
        });
        inner.state = ConnectionState::Connected;

        info!("Connected to {}", self.addr);
        Ok(())
    }

    /// Write `bytes` to the server exactly as given
    ///
    /// No terminator or encoding is added; append `\r\n` yourself.
    pub fn send(&self, bytes: impl AsRef<[u8]>) -> Result<()> {
        let session = {
            let inner = self.lock_inner();
            match (&inner.state, &inner.link) {
                (ConnectionState::Connected, Some(link)) => Arc::clone(&link.session),
                _ => return Err(CoreError::NotConnected),
            }
        };
        session.write_all(bytes.as_ref())
    }

    /// Close the connection and stop the receive loop
    ///
    /// Idempotent. The shutdown sequence runs once per `connect()`: inbound
    /// half, join the reader (unless called on it), outbound half, socket.
    pub fn disconnect(&self) -> Result<()> {
        let link = {
            let mut inner = self.lock_inner();
            if inner.state != ConnectionState::Connected {
                return Ok(());
            }
            inner.state = ConnectionState::Closed;
            inner.link.take()
        };
        let Some(link) = link else {
            return Ok(());
        };

        let (result, detached) = link.shut_down();
        if let Some(reader) = detached {
            self.lock_inner().detached = Some(reader);
        }
        info!("Disconnected from {}", self.addr);
        result
    }

    /// Alias for [`disconnect`](Self::disconnect)
    pub fn close(&self) -> Result<()> {
        self.disconnect()
    }

    /// Host name as given at construction
    pub fn server_host(&self) -> &str {
        &self.host
    }

    /// Resolved server IP address
    pub fn server_address(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn server_port(&self) -> u16 {
        self.addr.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_inner().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The connection's event hub
    pub fn events(&self) -> &ConnectionHub {
        &self.hub
    }

    pub fn add_listener(
        &self,
        kind: ConnectionEvent,
        listener: &ConnectionListener,
    ) -> Result<bool> {
        self.hub.add_listener(kind, listener)
    }

    pub fn remove_listener(&self, kind: ConnectionEvent, listener: &ConnectionListener) -> bool {
        self.hub.remove_listener(kind, listener)
    }

    pub fn emit(&self, kind: ConnectionEvent) -> Result<EmitReport> {
        self.hub.emit(kind)
    }

    pub fn emit_with(&self, kind: ConnectionEvent, line: &Line) -> Result<EmitReport> {
        self.hub.emit_with(kind, line)
    }

    /// Register `f` for every received line; returns the listener for removal
    pub fn on_line<F>(&self, f: F) -> Result<ConnectionListener>
    where
        F: Fn(&Line) + Send + Sync + 'static,
    {
        let listener = ConnectionListener::new(move |_, line: Option<&Line>| {
            if let Some(line) = line {
                f(line);
            }
        });
        self.hub.add_listener(ConnectionEvent::LineReceived, &listener)?;
        Ok(listener)
    }

    /// Register `f` for receive interruptions; returns the listener for removal
    pub fn on_interrupted<F>(&self, f: F) -> Result<ConnectionListener>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let listener = ConnectionListener::new(move |_, _| f());
        self.hub.add_listener(ConnectionEvent::ReceiveInterrupted, &listener)?;
        Ok(listener)
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SecureLineConnection {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("Error while closing connection to {}: {}", self.addr, e);
        }
    }
}

impl fmt::Debug for SecureLineConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureLineConnection")
            .field("host", &self.host)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .field("hub", &self.hub)
            .finish()
    }
}

impl Link {
    /// Run the shutdown sequence
    ///
    /// Returns the reader handle when called on the reader thread itself,
    /// which cannot be joined yet.
    fn shut_down(self) -> (Result<()>, Option<JoinHandle<()>>) {
        // Must be visible before the reader wakes up from the shutdown below
        self.closing.store(true, Ordering::SeqCst);
        let mut first_error = self.session.shutdown_read().err();

        let detached = if thread::current().id() == self.reader.thread().id() {
            debug!("Disconnect requested from the receive loop, not joining");
            Some(self.reader)
        } else {
            join_reader(self.reader);
            None
        };

        if let Err(e) = self.session.close_outbound() {
            first_error.get_or_insert(e);
        }
        // The socket closes once the last session handle is dropped
        drop(self.session);

        let result = match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        };
        (result, detached)
    }
}

/// Wait for a reader to exit, unless it is the current thread
fn join_reader(reader: JoinHandle<()>) {
    if thread::current().id() == reader.thread().id() {
        return;
    }
    if reader.join().is_err() {
        error!("Receive loop panicked");
    }
}

/// Background task for one connect/disconnect cycle
struct ReceiveLoop {
    reader: TlsReader,
    hub: Arc<ConnectionHub>,
    closing: Arc<AtomicBool>,
    peer: SocketAddr,
}

impl ReceiveLoop {
    fn run(mut self) {
        info!("[RECV] Receive loop started for {}", self.peer);
        let mut tokenizer = LineTokenizer::new();

        loop {
            match self.reader.next_chunk() {
                Ok(Some(chunk)) => {
                    let hub = &self.hub;
                    let closing = &self.closing;
                    tokenizer.feed_with(chunk, |line| {
                        if !closing.load(Ordering::SeqCst) {
                            deliver(hub, &line);
                        }
                    });
                    if self.is_closing() {
                        break;
                    }
                }
                Ok(None) => {
                    if !self.is_closing() {
                        if let Some(line) = tokenizer.finish() {
                            deliver(&self.hub, &line);
                        }
                    }
                    if self.is_closing() {
                        debug!("[RECV] Read ended by disconnect");
                    } else {
                        info!("[RECV] Connection closed by {}", self.peer);
                    }
                    break;
                }
                Err(e) => {
                    if self.is_closing() {
                        debug!("[RECV] Read ended by disconnect: {}", e);
                    } else {
                        warn!("[RECV] Receive interrupted from {}: {}", self.peer, e);
                        if let Err(e) = self.hub.emit(ConnectionEvent::ReceiveInterrupted) {
                            error!("[RECV] Failed to emit interruption: {}", e);
                        }
                    }
                    break;
                }
            }
        }

        info!("[RECV] Receive loop ended for {}", self.peer);
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

fn deliver(hub: &ConnectionHub, line: &Line) {
    debug!("[RECV] Line with {} words", line.len());
    match hub.emit_with(ConnectionEvent::LineReceived, line) {
        Ok(report) if !report.is_clean() => {
            warn!(
                "[RECV] {} of {} line listeners failed",
                report.failed,
                report.failed + report.delivered
            );
        }
        Ok(_) => {}
        Err(e) => error!("[RECV] Failed to emit line: {}", e),
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let unknown = |source: io::Error| CoreError::UnknownHost {
        host: host.to_string(),
        source,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(unknown)?
        .next()
        .ok_or_else(|| unknown(io::Error::new(io::ErrorKind::NotFound, "no addresses found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insecure(port: u16) -> Result<SecureLineConnection> {
        SecureLineConnection::new("127.0.0.1", port, TransportConfig::insecure())
    }

    #[test]
    fn test_empty_host_rejected() {
        let err = SecureLineConnection::new("  ", 993, TransportConfig::insecure()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_port_zero_rejected() {
        let err = insecure(0).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_unresolvable_host() {
        let err = SecureLineConnection::new("nowhere.invalid", 993, TransportConfig::insecure())
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownHost { .. }));
    }

    #[test]
    fn test_new_connection_is_idle() {
        let conn = insecure(993).unwrap();
        assert_eq!(conn.state(), ConnectionState::Idle);
        assert_eq!(conn.server_address(), IpAddr::from([127, 0, 0, 1]));
        assert_eq!(conn.server_port(), 993);
        assert_eq!(conn.server_host(), "127.0.0.1");
    }

    #[test]
    fn test_send_requires_connection() {
        let conn = insecure(993).unwrap();
        assert!(matches!(conn.send(b"NOOP\r\n"), Err(CoreError::NotConnected)));
    }

    #[test]
    fn test_disconnect_when_idle_is_noop() {
        let conn = insecure(993).unwrap();
        assert!(conn.disconnect().is_ok());
        assert!(conn.close().is_ok());
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_failed_connect_leaves_state() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let conn = insecure(port).unwrap();
        let err = conn.connect().unwrap_err();
        assert!(err.is_transport());
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_listener_helpers_register() {
        let conn = insecure(993).unwrap();
        let on_line = conn.on_line(|_| {}).unwrap();
        conn.on_interrupted(|| {}).unwrap();

        assert_eq!(conn.events().listener_count(ConnectionEvent::LineReceived), 1);
        assert_eq!(conn.events().listener_count(ConnectionEvent::ReceiveInterrupted), 1);
        assert!(conn.remove_listener(ConnectionEvent::LineReceived, &on_line));
    }
}
