//! Custom server certificate verifiers
//!
//! `PinnedFingerprintVerifier` trusts exactly one end-entity certificate,
//! identified by its SHA-256 fingerprint (trust on first use). No CA chain is
//! consulted. Handshake signatures are still checked with the provider's
//! algorithms, so the peer must hold the pinned certificate's private key.
//!
//! `NoVerification` accepts any certificate and is meant for diagnostics
//! against test servers only.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error};

/// Normalize a fingerprint for comparison
///
/// Handles "AA:BB:CC", "aa:bb:cc", "AABBCC", "aa-bb-cc"; all become "AABBCC".
pub fn normalize_fingerprint(fp: &str) -> String {
    fp.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// SHA-256 fingerprint of a DER certificate as "AA:BB:CC:..."
pub fn certificate_fingerprint(cert: &CertificateDer<'_>) -> String {
    let digest = Sha256::digest(cert.as_ref());
    digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<String>>()
        .join(":")
}

/// First and last four characters, for log lines that must not leak the pin
fn abbreviate(fp: &str) -> String {
    if fp.len() <= 8 {
        return fp.to_string();
    }
    format!("{}...{}", &fp[..4], &fp[fp.len() - 4..])
}

#[derive(Debug)]
pub(crate) struct PinnedFingerprintVerifier {
    expected: String,
    provider: Arc<CryptoProvider>,
}

impl PinnedFingerprintVerifier {
    pub(crate) fn new(fingerprint: &str, provider: Arc<CryptoProvider>) -> Self {
        Self {
            expected: normalize_fingerprint(fingerprint),
            provider,
        }
    }
}

impl ServerCertVerifier for PinnedFingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let actual = normalize_fingerprint(&certificate_fingerprint(end_entity));
        debug!("Verifying pinned certificate - Match: {}", actual == self.expected);

        if actual == self.expected {
            Ok(ServerCertVerified::assertion())
        } else {
            error!(
                "Fingerprint mismatch! Expected: {}, Got: {}",
                abbreviate(&self.expected),
                abbreviate(&actual)
            );
            Err(rustls::Error::General("Fingerprint mismatch".to_string()))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

#[derive(Debug)]
pub(crate) struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl NoVerification {
    pub(crate) fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
