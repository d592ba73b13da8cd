//! TLS transport configuration helpers
//!
//! This module provides the rustls client setup used by every connection:
//! - Trust policy (explicit roots, pinned fingerprint, or none)
//! - SNI server name selection
//! - Receive buffer sizing

pub mod tls;
pub mod verifier;

pub use tls::{TlsReader, TlsSession};
pub use verifier::{certificate_fingerprint, normalize_fingerprint};

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use crate::{CoreError, Result};

/// Default size of the socket read buffer (8KB)
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// How the server certificate is authenticated
#[derive(Debug, Clone)]
pub enum TrustPolicy {
    /// Verify the chain against these trust anchors and check the host name
    Roots(Vec<CertificateDer<'static>>),

    /// Accept exactly the end-entity certificate with this SHA-256
    /// fingerprint (any common hex formatting)
    Fingerprint(String),

    /// Accept any certificate; test servers only
    Insecure,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        TrustPolicy::Roots(Vec::new())
    }
}

/// Transport settings for a connection
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Certificate trust policy
    pub trust: TrustPolicy,

    /// SNI / verification name; the connection host when `None`
    pub server_name: Option<String>,

    /// Bytes requested from the socket per read
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            trust: TrustPolicy::default(),
            server_name: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl TransportConfig {
    /// Trust the given root certificates
    pub fn with_roots(roots: Vec<CertificateDer<'static>>) -> Self {
        Self {
            trust: TrustPolicy::Roots(roots),
            ..Self::default()
        }
    }

    /// Pin the server certificate by fingerprint
    pub fn with_fingerprint(fingerprint: impl Into<String>) -> Self {
        Self {
            trust: TrustPolicy::Fingerprint(fingerprint.into()),
            ..Self::default()
        }
    }

    /// Skip certificate verification
    pub fn insecure() -> Self {
        Self {
            trust: TrustPolicy::Insecure,
            ..Self::default()
        }
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Check settings that do not depend on the target host
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(CoreError::Configuration(
                "read buffer size must be greater than zero".to_string(),
            ));
        }
        if let TrustPolicy::Fingerprint(fp) = &self.trust {
            // SHA-256 = 32 bytes = 64 hex digits
            if normalize_fingerprint(fp).len() != 64 {
                return Err(CoreError::Configuration(format!(
                    "fingerprint must be a SHA-256 digest, got '{}'",
                    fp
                )));
            }
        }
        Ok(())
    }

    /// Name presented via SNI and used for verification
    pub(crate) fn resolve_server_name(&self, host: &str) -> Result<ServerName<'static>> {
        let name = self.server_name.as_deref().unwrap_or(host);
        ServerName::try_from(name.to_string())
            .map_err(|e| CoreError::Configuration(format!("invalid server name '{}': {}", name, e)))
    }
}

/// Build the rustls client configuration for `config`
///
/// Uses the ring provider explicitly so no process-wide default provider
/// needs to be installed.
pub fn configure_client(config: &TransportConfig) -> Result<Arc<ClientConfig>> {
    config.validate()?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let client = match &config.trust {
        TrustPolicy::Roots(roots) => {
            let mut store = RootCertStore::empty();
            for cert in roots {
                store.add(cert.clone())?;
            }
            builder.with_root_certificates(store).with_no_client_auth()
        }
        TrustPolicy::Fingerprint(fp) => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier::PinnedFingerprintVerifier::new(
                fp,
                Arc::clone(&provider),
            )))
            .with_no_client_auth(),
        TrustPolicy::Insecure => {
            tracing::warn!("Certificate verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier::NoVerification::new(
                    Arc::clone(&provider),
                )))
                .with_no_client_auth()
        }
    };

    Ok(Arc::new(client))
}

/// Load PEM encoded trust anchors from `path`
pub fn load_pem_certificates(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CoreError::CertParseError(format!("{}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(CoreError::CertParseError(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert!(config.server_name.is_none());
        assert!(matches!(config.trust, TrustPolicy::Roots(ref r) if r.is_empty()));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let config = TransportConfig::insecure().read_buffer_size(0);
        assert!(matches!(config.validate(), Err(CoreError::Configuration(_))));
    }

    #[test]
    fn test_short_fingerprint_rejected() {
        let config = TransportConfig::with_fingerprint("AA:BB");
        assert!(matches!(configure_client(&config), Err(CoreError::Configuration(_))));
    }

    #[test]
    fn test_configure_client_with_self_signed_root() {
        let cert = rcgen::generate_simple_self_signed(["localhost".to_string()]).unwrap();
        let config = TransportConfig::with_roots(vec![CertificateDer::from(cert.cert)]);
        assert!(configure_client(&config).is_ok());
    }

    #[test]
    fn test_configure_client_insecure() {
        assert!(configure_client(&TransportConfig::insecure()).is_ok());
    }

    #[test]
    fn test_server_name_override() {
        let config = TransportConfig::insecure().server_name("mail.example.org");
        let name = config.resolve_server_name("127.0.0.1").unwrap();
        assert_eq!(name.to_str(), "mail.example.org");
    }

    #[test]
    fn test_ip_literal_is_valid_server_name() {
        let name = TransportConfig::default().resolve_server_name("127.0.0.1").unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));
    }

    #[test]
    fn test_invalid_server_name_rejected() {
        let result = TransportConfig::default().resolve_server_name("bad name!");
        assert!(matches!(result, Err(CoreError::Configuration(_))));
    }

    #[test]
    fn test_load_pem_missing_file() {
        let result = load_pem_certificates("/nonexistent/linewire/ca.pem");
        assert!(matches!(result, Err(CoreError::Io(_))));
    }
}
