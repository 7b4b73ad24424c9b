//! CSR construction and inspection.
//!
//! CSRs carry every name in the `subjectAltName` extension as `DNS:`
//! entries; the subject DN stays empty. The same domain key is reused
//! across renewals, so building a CSR never touches the key material.

use super::CryptoError;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

/// A freshly built CSR in both encodings.
pub struct Csr {
    pub der: Vec<u8>,
    pub pem: String,
}

/// Build a CSR for `names` signed with the PKCS#8 PEM key. The first
/// name is the primary; all names land in the SAN extension.
pub fn build_csr(key_pem: &str, names: &[String]) -> Result<Csr, CryptoError> {
    let key_pair =
        rcgen::KeyPair::from_pem(key_pem).map_err(|e| CryptoError::KeyParse(e.to_string()))?;

    let params = rcgen::CertificateParams::new(names.to_vec())
        .map_err(|e| CryptoError::Csr(e.to_string()))?;

    let request = params
        .serialize_request(&key_pair)
        .map_err(|e| CryptoError::Csr(e.to_string()))?;

    let pem = request.pem().map_err(|e| CryptoError::Csr(e.to_string()))?;
    Ok(Csr {
        der: request.der().to_vec(),
        pem,
    })
}

/// Extract the SAN DNS names from a PEM or DER encoded CSR.
pub fn csr_names(data: &[u8]) -> Result<Vec<String>, CryptoError> {
    let der: Vec<u8> = if data.starts_with(b"-----BEGIN") {
        pem::parse(data)
            .map_err(|e| CryptoError::CsrParse(e.to_string()))?
            .into_contents()
    } else {
        data.to_vec()
    };

    let (_, csr) = X509CertificationRequest::from_der(&der)
        .map_err(|e| CryptoError::CsrParse(e.to_string()))?;

    let mut names = Vec::new();
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for general in &san.general_names {
                    if let GeneralName::DNSName(value) = general {
                        names.push(value.trim_end_matches('.').to_ascii_lowercase());
                    }
                }
            }
        }
    }
    Ok(names)
}

/// Whether the CSR covers exactly `expected` (compared as sets).
pub fn csr_matches(data: &[u8], expected: &[String]) -> Result<bool, CryptoError> {
    use std::collections::BTreeSet;
    let have: BTreeSet<String> = csr_names(data)?.into_iter().collect();
    let want: BTreeSet<String> = expected.iter().map(|n| n.to_ascii_lowercase()).collect();
    Ok(have == want)
}
