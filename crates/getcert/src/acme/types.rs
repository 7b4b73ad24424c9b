//! ACME v1 wire types. Every payload carries its `resource` field;
//! challenges deserialize into a tagged variant so unknown types
//! survive parsing.

use crate::crypto::jws::base64url;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct NewRegistration {
    resource: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact: Option<Vec<String>>,
    agreement: String,
}

impl NewRegistration {
    pub fn new(email: Option<&str>, agreement: &str) -> Self {
        NewRegistration {
            resource: "new-reg",
            contact: email.map(|e| vec![format!("mailto:{e}")]),
            agreement: agreement.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NewAuthorization {
    resource: &'static str,
    identifier: Identifier,
}

impl NewAuthorization {
    pub fn dns(domain: &str) -> Self {
        NewAuthorization {
            resource: "new-authz",
            identifier: Identifier {
                kind: "dns",
                value: domain.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    kind: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
pub struct ChallengeReady {
    resource: &'static str,
    #[serde(rename = "keyAuthorization")]
    key_authorization: String,
}

impl ChallengeReady {
    pub fn new(key_authorization: &str) -> Self {
        ChallengeReady {
            resource: "challenge",
            key_authorization: key_authorization.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NewCertificate {
    resource: &'static str,
    csr: String,
}

impl NewCertificate {
    pub fn from_der(csr_der: &[u8]) -> Self {
        NewCertificate {
            resource: "new-cert",
            csr: base64url(csr_der),
        }
    }
}

/// Authorization response: the CA's challenge bundle for one
/// identifier.
#[derive(Debug, Deserialize)]
pub struct Authorization {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    pub fn http01(&self) -> Option<&ChallengeData> {
        self.challenges.iter().find_map(|c| match c {
            Challenge::Http01(data) => Some(data),
            _ => None,
        })
    }

    pub fn dns01(&self) -> Option<&ChallengeData> {
        self.challenges.iter().find_map(|c| match c {
            Challenge::Dns01(data) => Some(data),
            _ => None,
        })
    }
}

/// A challenge, selected by its `type` tag. Types this client does not
/// speak land in `Other` instead of failing the parse.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Challenge {
    #[serde(rename = "http-01")]
    Http01(ChallengeData),
    #[serde(rename = "dns-01")]
    Dns01(ChallengeData),
    #[serde(untagged)]
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeData {
    pub uri: String,
    pub token: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Challenge polling response.
#[derive(Debug, Deserialize)]
pub struct ChallengePoll {
    pub status: String,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}
