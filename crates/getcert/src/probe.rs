//! Remote TLS probe: connect with SNI and fetch the served leaf
//! certificate.
//!
//! Verification is deliberately disabled - the point of the probe is
//! to inspect whatever the server currently serves, expired or
//! mis-issued included.

use crate::crypto::x509::{self, CertInfo};
use crate::crypto::CryptoError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to connect to {host}:{port}: {detail}")]
    Connect {
        host: String,
        port: u16,
        detail: String,
    },

    #[error("TLS handshake with {host}:{port} failed: {detail}")]
    Handshake {
        host: String,
        port: u16,
        detail: String,
    },

    #[error("{host} is not a valid SNI name")]
    InvalidName { host: String },

    #[error("{host}:{port} presented no certificate")]
    NoPeerCertificate { host: String, port: u16 },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Accepts whatever the server presents; the probe only reads.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Fetch and parse the leaf certificate served at `host:port` with SNI
/// `host`.
pub async fn fetch_remote_leaf(host: &str, port: u16) -> Result<CertInfo, ProbeError> {
    let der = fetch_remote_leaf_der(host, port).await?;
    Ok(x509::parse_der(&der)?)
}

/// Fetch the raw DER leaf served at `host:port`.
pub async fn fetch_remote_leaf_der(host: &str, port: u16) -> Result<Vec<u8>, ProbeError> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    debug!(host, port, "probing remote certificate");
    let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ProbeError::Connect {
            host: host.to_string(),
            port,
            detail: "connect timed out".to_string(),
        })?
        .map_err(|e| ProbeError::Connect {
            host: host.to_string(),
            port,
            detail: e.to_string(),
        })?;

    let server_name =
        ServerName::try_from(host.to_string()).map_err(|_| ProbeError::InvalidName {
            host: host.to_string(),
        })?;

    let tls = timeout(CONNECT_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .map_err(|_| ProbeError::Handshake {
            host: host.to_string(),
            port,
            detail: "handshake timed out".to_string(),
        })?
        .map_err(|e| ProbeError::Handshake {
            host: host.to_string(),
            port,
            detail: e.to_string(),
        })?;

    let (_, connection) = tls.get_ref();
    let leaf = connection
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| ProbeError::NoPeerCertificate {
            host: host.to_string(),
            port,
        })?;

    Ok(leaf.as_ref().to_vec())
}
