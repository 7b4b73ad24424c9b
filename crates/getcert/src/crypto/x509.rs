//! X.509 certificate inspection and PEM wrapping.

use super::CryptoError;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, GeneralName, ParsedExtension, X509Certificate};

/// The fields of a parsed certificate the lifecycle decisions need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub subject_cn: Option<String>,
    pub sans: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// SHA-256 over the DER encoding.
    pub fingerprint: [u8; 32],
}

impl CertInfo {
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Parse the first certificate in a PEM document.
pub fn parse_pem(text: &str) -> Result<CertInfo, CryptoError> {
    let block = pem::parse_many(text.as_bytes())
        .map_err(|e| CryptoError::CertParse(e.to_string()))?
        .into_iter()
        .find(|p| p.tag() == "CERTIFICATE")
        .ok_or_else(|| CryptoError::CertParse("no CERTIFICATE block".to_string()))?;
    parse_der(block.contents())
}

/// Parse a DER-encoded certificate.
pub fn parse_der(der: &[u8]) -> Result<CertInfo, CryptoError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| CryptoError::CertParse(e.to_string()))?;

    let subject_cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string());

    let mut sans = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for general in &san.general_names {
                if let GeneralName::DNSName(value) = general {
                    sans.push(value.trim_end_matches('.').to_ascii_lowercase());
                }
            }
        }
    }

    let not_before = timestamp(cert.validity().not_before.timestamp())?;
    let not_after = timestamp(cert.validity().not_after.timestamp())?;

    Ok(CertInfo {
        subject_cn,
        sans,
        not_before,
        not_after,
        fingerprint: Sha256::digest(der).into(),
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CryptoError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CryptoError::CertParse(format!("validity out of range: {secs}")))
}

/// Wrap DER bytes in CERTIFICATE armor (classic wrapped base64).
pub fn pem_from_der(der: &[u8]) -> String {
    pem::encode(&pem::Pem::new("CERTIFICATE", der.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Self-signed certificate for example.com + www.example.com.
    fn test_cert() -> (String, Vec<u8>) {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = rcgen::CertificateParams::new(vec![
            "example.com".to_string(),
            "www.example.com".to_string(),
        ])
        .unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "example.com");
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), cert.der().to_vec())
    }

    #[test]
    fn parses_cn_and_sans() {
        let (pem_text, _) = test_cert();
        let info = parse_pem(&pem_text).unwrap();
        assert_eq!(info.subject_cn.as_deref(), Some("example.com"));
        assert_eq!(info.sans, vec!["example.com", "www.example.com"]);
        assert!(info.not_before < info.not_after);
    }

    #[test]
    fn pem_round_trip_preserves_fingerprint() {
        let (_, der) = test_cert();
        let direct = parse_der(&der).unwrap();
        let round_tripped = parse_pem(&pem_from_der(&der)).unwrap();
        assert_eq!(direct.fingerprint, round_tripped.fingerprint);
    }

    #[test]
    fn fingerprint_hex_is_64_chars() {
        let (_, der) = test_cert();
        let info = parse_der(&der).unwrap();
        assert_eq!(info.fingerprint_hex().len(), 64);
        assert!(info.fingerprint_hex().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn pem_wrap_uses_classic_armor() {
        let (_, der) = test_cert();
        let text = pem_from_der(&der);
        assert!(text.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(text.trim_end().ends_with("-----END CERTIFICATE-----"));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_pem("not a certificate").is_err());
        assert!(parse_der(&[0u8; 16]).is_err());
    }
}
