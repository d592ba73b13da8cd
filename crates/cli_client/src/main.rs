//! Linewire terminal client
//! Prints every line the server sends and forwards stdin lines as CRLF-terminated commands

use anyhow::{Context, Result};
use clap::Parser;
use linewire_core::{load_pem_certificates, Line, SecureLineConnection, TransportConfig};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long to keep printing server output after stdin reaches EOF
const EOF_LINGER: Duration = Duration::from_millis(500);

/// Linewire - secure line-oriented client
#[derive(Parser, Debug)]
#[command(name = "linewire")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Talk to a line-oriented TLS server", long_about = None)]
struct Args {
    /// Server host name or IP address
    #[arg(long)]
    host: String,

    /// Server port
    #[arg(short, long)]
    port: u16,

    /// TLS server name (SNI) if it differs from the host
    #[arg(long)]
    server_name: Option<String>,

    /// PEM file with the trust anchors to verify the server against
    #[arg(long, conflicts_with_all = ["fingerprint", "insecure"])]
    ca_file: Option<PathBuf>,

    /// Pin the server certificate by SHA-256 fingerprint
    #[arg(long, conflicts_with = "insecure")]
    fingerprint: Option<String>,

    /// Skip certificate verification (testing only)
    #[arg(long, default_value_t = false)]
    insecure: bool,

    /// Print each line as a JSON array of words
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

/// What the receive thread hands over to the async side
#[derive(Debug)]
enum Inbound {
    Line(Line),
    Interrupted,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let config = transport_config(&args)?;
    let conn = Arc::new(
        SecureLineConnection::new(&args.host, args.port, config)
            .with_context(|| format!("Invalid server {}:{}", args.host, args.port))?,
    );

    // Listeners run on the receive thread; they only forward into the channel
    let (event_tx, mut events) = mpsc::unbounded_channel::<Inbound>();
    let line_tx = event_tx.clone();
    conn.on_line(move |line| {
        let _ = line_tx.send(Inbound::Line(line.clone()));
    })?;
    conn.on_interrupted(move || {
        let _ = event_tx.send(Inbound::Interrupted);
    })?;

    let connecting = Arc::clone(&conn);
    tokio::task::spawn_blocking(move || connecting.connect())
        .await?
        .with_context(|| format!("Failed to connect to {}", conn.socket_addr()))?;
    info!("Connected to {} ({})", conn.server_host(), conn.socket_addr());

    let mut stdin_rx = spawn_stdin_reader();
    let mut stdin_open = true;
    let linger = sleep(EOF_LINGER);
    tokio::pin!(linger);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received, disconnecting");
                break;
            }
            event = events.recv() => match event {
                Some(Inbound::Line(line)) => print_line(&line, args.json)?,
                Some(Inbound::Interrupted) => {
                    warn!("Connection to {} interrupted", conn.socket_addr());
                    break;
                }
                None => break,
            },
            input = stdin_rx.recv(), if stdin_open => match input {
                Some(text) => send_line(&conn, text).await?,
                None => {
                    debug!("stdin closed");
                    stdin_open = false;
                    linger.as_mut().reset(Instant::now() + EOF_LINGER);
                }
            },
            _ = &mut linger, if !stdin_open => break,
        }
    }

    let closing = Arc::clone(&conn);
    if let Err(e) = tokio::task::spawn_blocking(move || closing.disconnect()).await? {
        error!("Disconnect failed: {}", e);
    }
    info!("Connection closed");

    Ok(())
}

fn transport_config(args: &Args) -> Result<TransportConfig> {
    let config = if let Some(path) = &args.ca_file {
        let roots = load_pem_certificates(path)
            .with_context(|| format!("Failed to load trust anchors from {}", path.display()))?;
        TransportConfig::with_roots(roots)
    } else if let Some(fingerprint) = &args.fingerprint {
        TransportConfig::with_fingerprint(fingerprint.clone())
    } else if args.insecure {
        TransportConfig::insecure()
    } else {
        anyhow::bail!("Choose a trust policy: --ca-file, --fingerprint or --insecure");
    };

    Ok(match &args.server_name {
        Some(name) => config.server_name(name.clone()),
        None => config,
    })
}

/// Read stdin on a plain thread so a pending read never holds up shutdown
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Frame one command with CRLF and send it
async fn send_line(conn: &Arc<SecureLineConnection>, text: String) -> Result<()> {
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let mut frame = text.into_bytes();
        frame.extend_from_slice(b"\r\n");
        conn.send(frame)
    })
    .await?
    .context("Failed to send command")
}

fn print_line(line: &Line, json: bool) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    if json {
        let encoded = serde_json::to_string(&line.to_strings())?;
        writeln!(stdout, "{}", encoded)?;
    } else {
        writeln!(stdout, "{}", line)?;
    }
    stdout.flush()?;
    Ok(())
}

fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::WARN);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
