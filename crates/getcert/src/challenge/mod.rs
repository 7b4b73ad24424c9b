//! Per-identifier challenge orchestration.
//!
//! Each identifier moves through provision → self-check → notify →
//! poll → teardown. HTTP-01 runs the whole ladder one identifier at a
//! time; DNS-01 provisions every record first so propagation waits
//! overlap, then notifies.

pub mod dns01;
pub mod http01;

use crate::acme::http::AcmeResponse;
use crate::acme::request::SignedRequester;
use crate::acme::types::{Authorization, ChallengeData, ChallengePoll, ChallengeReady, NewAuthorization};
use crate::acme::{AcmeError, Endpoints};
use crate::config::Config;
use crate::crypto::CryptoError;
use crate::dns::DnsError;
use crate::hooks::HookError;
use crate::session::{CleanupRegistry, Workspace};
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cadence between challenge status polls.
pub const CHALLENGE_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Ceiling on challenge polls so a wedged authorization cannot stall
/// the run forever.
pub const CHALLENGE_POLL_MAX: u32 = 30;
/// Cadence between DNS TXT propagation polls.
pub const DNS_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Ceiling on TXT propagation polls per record.
pub const DNS_POLL_MAX: u32 = 100;

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("new-authz for {identifier} returned status {status}: {detail}")]
    AuthzStatus {
        identifier: String,
        status: u16,
        detail: String,
    },

    #[error("CA offered no {challenge_type} challenge for {identifier}")]
    MissingChallenge {
        identifier: String,
        challenge_type: &'static str,
    },

    #[error("no challenge location (ACL) configured for {identifier} at index {index}")]
    MissingAclEntry { identifier: String, index: usize },

    #[error("{0} is not configured")]
    MissingHook(&'static str),

    #[error("self-check for {identifier} failed: {detail}")]
    SelfCheck { identifier: String, detail: String },

    #[error("notifying challenge for {identifier} returned status {status}: {detail}")]
    NotifyStatus {
        identifier: String,
        status: u16,
        detail: String,
    },

    #[error("CA rejected the challenge for {identifier}: {detail}")]
    Invalid { identifier: String, detail: String },

    #[error("challenge for {identifier} still pending after {attempts} polls")]
    PollExhausted { identifier: String, attempts: u32 },

    #[error("TXT record for {identifier} not observed after {attempts} attempts")]
    PropagationTimeout { identifier: String, attempts: u32 },

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Drives authorizations for one certificate run.
pub struct Orchestrator<'a> {
    pub requester: &'a mut SignedRequester,
    pub config: &'a Config,
    pub workspace: &'a Workspace,
    pub cleanup: &'a CleanupRegistry,
    pub endpoints: &'a Endpoints,
}

impl Orchestrator<'_> {
    /// Authorize every identifier with the configured challenge type.
    pub async fn authorize_all(&mut self, names: &[String]) -> Result<(), ChallengeError> {
        if self.config.validate_via_dns {
            dns01::run(self, names).await
        } else {
            http01::run(self, names).await
        }
    }

    /// POST `new-authz` for one identifier. HTTP 201 is required.
    pub(crate) async fn new_authz(
        &mut self,
        identifier: &str,
    ) -> Result<Authorization, ChallengeError> {
        info!(identifier, "requesting authorization");
        let response = self
            .requester
            .send_signed(
                &self.endpoints.new_authz,
                &NewAuthorization::dns(identifier),
                false,
            )
            .await?;
        if response.status != 201 {
            return Err(ChallengeError::AuthzStatus {
                identifier: identifier.to_string(),
                status: response.status,
                detail: response.detail(),
            });
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| AcmeError::Decode(e.to_string()).into())
    }

    /// Tell the CA the challenge is ready, then poll it to `valid`.
    pub(crate) async fn notify_and_poll(
        &mut self,
        identifier: &str,
        challenge: &ChallengeData,
        key_authorization: &str,
    ) -> Result<(), ChallengeError> {
        let response: AcmeResponse = self
            .requester
            .send_signed(
                &challenge.uri,
                &ChallengeReady::new(key_authorization),
                false,
            )
            .await?;
        if !(200..300).contains(&response.status) {
            return Err(ChallengeError::NotifyStatus {
                identifier: identifier.to_string(),
                status: response.status,
                detail: response.detail(),
            });
        }
        debug!(identifier, status = response.status, "challenge notified");

        for attempt in 1..=CHALLENGE_POLL_MAX {
            let response = self.requester.get(&challenge.uri).await?;
            let poll: ChallengePoll = serde_json::from_slice(&response.body)
                .map_err(|e| AcmeError::Decode(e.to_string()))?;

            match poll.status.as_str() {
                "valid" => {
                    info!(identifier, "challenge verified");
                    return Ok(());
                }
                "invalid" => {
                    return Err(ChallengeError::Invalid {
                        identifier: identifier.to_string(),
                        detail: poll
                            .error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "no detail".to_string()),
                    });
                }
                other => {
                    debug!(identifier, status = other, attempt, "challenge pending");
                    tokio::time::sleep(CHALLENGE_POLL_INTERVAL).await;
                }
            }
        }

        warn!(identifier, "challenge never left pending");
        Err(ChallengeError::PollExhausted {
            identifier: identifier.to_string(),
            attempts: CHALLENGE_POLL_MAX,
        })
    }
}
