//! ACME v1 protocol plumbing: nonce-tracking HTTP transport, the JWS
//! signed request engine, and the wire types.

pub mod http;
pub mod request;
pub mod types;

use crate::crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no Replay-Nonce in response from {0}")]
    MissingNonce(String),

    #[error("unexpected status {status} from {url}: {detail}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        detail: String,
    },

    #[error("CA response is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("failed to decode CA response: {0}")]
    Decode(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The fixed ACME v1 endpoint layout under a directory base URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub directory: String,
    pub new_reg: String,
    pub new_authz: String,
    pub new_cert: String,
}

impl Endpoints {
    pub fn for_ca(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Endpoints {
            directory: format!("{base}/directory"),
            new_reg: format!("{base}/acme/new-reg"),
            new_authz: format!("{base}/acme/new-authz"),
            new_cert: format!("{base}/acme/new-cert"),
        }
    }
}
