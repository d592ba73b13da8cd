//! Blocking TLS session over TCP with split read/write access
//!
//! The rustls state machine sits behind one mutex. The reader blocks on the
//! TCP socket *outside* that lock and only takes it to decrypt what arrived,
//! so a writer on another thread is never stuck behind an idle read.
//!
//! ```text
//! reader thread                      caller thread
//! socket.read()  (blocking, no lock)
//! lock -> read_tls/process -> unlock lock -> encrypt/write_tls -> unlock
//! ```

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::{CoreError, Result};

/// Plaintext drained from rustls per `read` call
const PLAINTEXT_CHUNK: usize = 4096;

/// An established TLS session
#[derive(Debug)]
pub struct TlsSession {
    conn: Mutex<ClientConnection>,
    socket: TcpStream,
}

impl TlsSession {
    /// Open a TCP connection to `addr` and complete the TLS handshake
    ///
    /// Blocks the calling thread until the handshake finishes or fails.
    pub fn establish(
        addr: SocketAddr,
        server_name: ServerName<'static>,
        config: Arc<ClientConfig>,
    ) -> Result<Self> {
        let mut socket = TcpStream::connect(addr)?;
        socket.set_nodelay(true)?;

        let mut conn = ClientConnection::new(config, server_name)?;
        while conn.is_handshaking() {
            conn.complete_io(&mut socket).map_err(handshake_error)?;
        }
        while conn.wants_write() {
            conn.write_tls(&mut socket)?;
        }

        debug!(
            "TLS handshake complete with {} ({:?})",
            addr,
            conn.protocol_version()
        );

        Ok(Self {
            conn: Mutex::new(conn),
            socket,
        })
    }

    /// Reader over this session's inbound plaintext
    pub fn reader(self: &Arc<Self>, buffer_size: usize) -> TlsReader {
        TlsReader {
            session: Arc::clone(self),
            scratch: vec![0u8; buffer_size.max(1)],
            plain: Vec::new(),
            eof: false,
        }
    }

    /// Encrypt and write `bytes` verbatim
    pub fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut conn = self.lock();
        let mut rest = bytes;
        while !rest.is_empty() {
            let n = conn.writer().write(rest)?;
            self.flush_tls(&mut conn)?;
            if n == 0 {
                return Err(CoreError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "TLS session refused plaintext",
                )));
            }
            rest = &rest[n..];
        }
        trace!("Sent {} bytes", bytes.len());
        Ok(())
    }

    /// Close the inbound half of the socket
    ///
    /// A thread blocked in [`TlsReader::next_chunk`] wakes up with EOF or an
    /// error.
    pub fn shutdown_read(&self) -> Result<()> {
        ignore_peer_gone(self.socket.shutdown(Shutdown::Read))?;
        Ok(())
    }

    /// Send close_notify and close the outbound half of the socket
    pub fn close_outbound(&self) -> Result<()> {
        {
            let mut conn = self.lock();
            conn.send_close_notify();
            ignore_peer_gone(self.flush_tls(&mut conn))?;
        }
        ignore_peer_gone(self.socket.shutdown(Shutdown::Write))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ClientConnection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush_tls(&self, conn: &mut ClientConnection) -> io::Result<()> {
        let mut socket = &self.socket;
        while conn.wants_write() {
            conn.write_tls(&mut socket)?;
        }
        Ok(())
    }

    /// Feed raw TLS bytes (empty = TCP EOF) and collect decrypted plaintext
    ///
    /// Returns `true` once the peer has closed: its close_notify was consumed,
    /// or the TCP stream ended without one.
    fn ingest(&self, mut tls: &[u8], plain: &mut Vec<u8>) -> io::Result<bool> {
        let mut conn = self.lock();
        loop {
            conn.read_tls(&mut tls)?;
            let processed = conn.process_new_packets();
            // Pending alerts or key updates go out even when processing failed
            self.flush_tls(&mut conn)?;
            processed.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            let closed = drain_plaintext(&mut conn, plain)?;
            if closed || tls.is_empty() {
                return Ok(closed);
            }
        }
    }
}

/// Blocking plaintext reader bound to one session
#[derive(Debug)]
pub struct TlsReader {
    session: Arc<TlsSession>,
    scratch: Vec<u8>,
    plain: Vec<u8>,
    eof: bool,
}

impl TlsReader {
    /// Block until plaintext arrives
    ///
    /// - `Ok(Some(bytes))`: the next chunk, in wire order
    /// - `Ok(None)`: the peer closed, with or without close_notify
    /// - `Err(_)`: I/O failure such as a connection reset
    pub fn next_chunk(&mut self) -> io::Result<Option<&[u8]>> {
        self.plain.clear();
        if self.eof {
            return Ok(None);
        }

        loop {
            let n = match (&self.session.socket).read(&mut self.scratch) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            trace!("Read {} TLS bytes", n);

            if self.session.ingest(&self.scratch[..n], &mut self.plain)? {
                self.eof = true;
            }
            if !self.plain.is_empty() {
                return Ok(Some(&self.plain));
            }
            if self.eof {
                return Ok(None);
            }
        }
    }
}

fn drain_plaintext(conn: &mut ClientConnection, plain: &mut Vec<u8>) -> io::Result<bool> {
    let mut buf = [0u8; PLAINTEXT_CHUNK];
    loop {
        match conn.reader().read(&mut buf) {
            Ok(0) => return Ok(true),
            Ok(n) => plain.extend_from_slice(&buf[..n]),
            // TCP FIN without close_notify ends the stream like a socket EOF
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("Peer closed without close_notify");
                return Ok(true);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}

/// Surface rustls failures as TLS errors rather than opaque I/O errors
fn handshake_error(err: io::Error) -> CoreError {
    match err.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
        Some(tls) => CoreError::Tls(tls.clone()),
        None => CoreError::Io(err),
    }
}

/// Closing a socket the peer already dropped or reset is not a failure
fn ignore_peer_gone(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
            ) =>
        {
            Ok(())
        }
        other => other,
    }
}
