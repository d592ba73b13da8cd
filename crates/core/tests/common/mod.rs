//! In-process TLS line server and event capture for integration tests

#![allow(dead_code)]

use linewire_core::transport::certificate_fingerprint;
use linewire_core::{SecureLineConnection, TransportConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

/// Self-signed TLS server that runs `script` for each accepted connection
pub struct TestServer {
    pub addr: SocketAddr,
    pub cert: CertificateDer<'static>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start<F>(connections: usize, script: F) -> Self
    where
        F: Fn(ServerSession, usize) + Send + 'static,
    {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = CertificateDer::from(certified.cert);
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = Arc::new(
            ServerConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .unwrap()
                .with_no_client_auth()
                .with_single_cert(vec![cert.clone()], key)
                .unwrap(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for index in 0..connections {
                let Ok((sock, _)) = listener.accept() else {
                    return;
                };
                // Failed handshakes (e.g. pin mismatch) are part of some tests
                if let Some(session) = ServerSession::handshake(sock, Arc::clone(&config)) {
                    script(session, index);
                }
            }
        });

        Self {
            addr,
            cert,
            handle: Some(handle),
        }
    }

    pub fn fingerprint(&self) -> String {
        certificate_fingerprint(&self.cert)
    }

    /// Idle client pinned to this server's certificate
    pub fn client(&self) -> Arc<SecureLineConnection> {
        let config = TransportConfig::with_fingerprint(self.fingerprint());
        Arc::new(SecureLineConnection::new("127.0.0.1", self.addr.port(), config).unwrap())
    }

    /// Wait for the server thread, surfacing assertion failures in scripts
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("server script panicked");
        }
    }
}

/// Server side of one accepted TLS connection
pub struct ServerSession {
    conn: ServerConnection,
    sock: TcpStream,
    pending: Vec<u8>,
}

impl ServerSession {
    fn handshake(mut sock: TcpStream, config: Arc<ServerConfig>) -> Option<Self> {
        sock.set_nodelay(true).ok()?;
        let mut conn = ServerConnection::new(config).ok()?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock).ok()?;
        }
        Some(Self {
            conn,
            sock,
            pending: Vec::new(),
        })
    }

    /// Write `bytes` as one TLS record batch and push it onto the wire
    pub fn send(&mut self, bytes: &[u8]) {
        self.conn.writer().write_all(bytes).unwrap();
        self.flush();
    }

    /// Send pieces with a pause in between so the client reads them separately
    pub fn send_in_pieces(&mut self, pieces: &[&[u8]]) {
        for piece in pieces {
            self.send(piece);
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Next CRLF-terminated line from the client, without the terminator
    pub fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line);
                return Some(text.trim_end_matches(['\r', '\n']).to_string());
            }
            if !self.fill()? {
                return None;
            }
        }
    }

    /// Send close_notify, shut down writing and wait for the client to close
    pub fn close_gracefully(mut self) {
        self.conn.send_close_notify();
        self.flush();
        let _ = self.sock.shutdown(Shutdown::Write);
        self.wait_for_close();
    }

    /// Shut down writing without close_notify and wait for the client to close
    pub fn close_without_notify(mut self) {
        self.flush();
        let _ = self.sock.shutdown(Shutdown::Write);
        self.wait_for_close();
    }

    /// Block until the client closes its side, discarding anything it sends
    pub fn wait_for_close(mut self) {
        while let Some(true) = self.fill() {
            self.pending.clear();
        }
    }

    /// Wait for unread client data, then drop the socket without close_notify
    ///
    /// Closing with unread data makes the kernel answer with a TCP reset.
    pub fn reset_after_client_writes(self) {
        let mut probe = [0u8; 1];
        let _ = self.sock.peek(&mut probe);
        drop(self);
    }

    fn flush(&mut self) {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.sock).unwrap();
        }
    }

    /// Pull more plaintext into `pending`; `Some(false)` on close, `None` on error
    fn fill(&mut self) -> Option<bool> {
        let mut chunk = [0u8; 1024];
        loop {
            match self.conn.reader().read(&mut chunk) {
                Ok(0) => return Some(false),
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    return Some(true);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => return None,
            }
            if self.conn.read_tls(&mut self.sock).ok()? == 0 {
                return Some(false);
            }
            self.conn.process_new_packets().ok()?;
        }
    }
}

/// What a client-side listener observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Line(Vec<String>),
    Interrupted,
}

impl Seen {
    pub fn line(words: &[&str]) -> Self {
        Seen::Line(words.iter().map(|w| w.to_string()).collect())
    }
}

/// Records every event a connection publishes
pub struct EventLog {
    rx: Receiver<Seen>,
}

impl EventLog {
    pub fn attach(conn: &SecureLineConnection) -> Self {
        let (tx, rx) = mpsc::channel();

        let line_tx = Mutex::new(tx.clone());
        conn.on_line(move |line| {
            let _ = line_tx.lock().unwrap().send(Seen::Line(line.to_strings()));
        })
        .unwrap();

        let interrupt_tx = Mutex::new(tx);
        conn.on_interrupted(move || {
            let _ = interrupt_tx.lock().unwrap().send(Seen::Interrupted);
        })
        .unwrap();

        Self { rx }
    }

    pub fn next(&self) -> Seen {
        self.rx
            .recv_timeout(EVENT_TIMEOUT)
            .expect("timed out waiting for a connection event")
    }

    pub fn assert_quiet(&self) {
        match self.rx.recv_timeout(QUIET_PERIOD) {
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            Ok(event) => panic!("unexpected event: {:?}", event),
        }
    }
}
