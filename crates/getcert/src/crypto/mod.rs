//! Crypto provider: account and domain keys, JWK/JWS primitives, CSR
//! construction and X.509 inspection.
//!
//! Every ACME field uses the URL-safe unpadded base64 variant from
//! [`jws`]; PEM bodies keep classic base64.

pub mod csr;
pub mod jws;
pub mod keys;
pub mod x509;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGen(String),

    #[error("failed to read key {path}: {source}")]
    KeyRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write key {path}: {source}")]
    KeyWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse key: {0}")]
    KeyParse(String),

    #[error("signing failed: {0}")]
    Sign(String),

    #[error("CSR construction failed: {0}")]
    Csr(String),

    #[error("failed to parse CSR: {0}")]
    CsrParse(String),

    #[error("failed to parse certificate: {0}")]
    CertParse(String),
}
