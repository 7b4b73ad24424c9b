//! DNS-01: create every TXT record first, then wait for all of them,
//! then notify. Batching the adds amortizes propagation delay across
//! identifiers.
//!
//! Each in-flight record is spooled to `tmp/dns_verify/<identifier>`
//! and registered with the cleanup registry so the delete hook runs
//! even on abnormal exits.

use super::{ChallengeError, Orchestrator, DNS_POLL_INTERVAL, DNS_POLL_MAX};
use crate::crypto::jws::{dns_auth_key, key_authorization};
use crate::dns;
use crate::hooks;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// In-flight state for one identifier, persisted to the spool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsVerifyRecord {
    pub token: String,
    pub uri: String,
    #[serde(rename = "keyAuthorization")]
    pub key_authorization: String,
    pub identifier: String,
    #[serde(rename = "primaryNS")]
    pub primary_ns: String,
    #[serde(rename = "authKey")]
    pub auth_key: String,
}

pub(super) async fn run(
    orch: &mut Orchestrator<'_>,
    names: &[String],
) -> Result<(), ChallengeError> {
    let add_command = orch
        .config
        .dns_add_command
        .clone()
        .ok_or(ChallengeError::MissingHook("DNS_ADD_COMMAND"))?;
    let del_command = orch
        .config
        .dns_del_command
        .clone()
        .ok_or(ChallengeError::MissingHook("DNS_DEL_COMMAND"))?;

    // Phase 1: create every record before verifying any.
    let mut records = Vec::with_capacity(names.len());
    for identifier in names {
        let authz = orch.new_authz(identifier).await?;
        let challenge = authz
            .dns01()
            .ok_or_else(|| ChallengeError::MissingChallenge {
                identifier: identifier.clone(),
                challenge_type: "dns-01",
            })?
            .clone();

        let key_auth = key_authorization(&challenge.token, orch.requester.thumbprint());
        let auth_key = dns_auth_key(&key_auth);

        hooks::run_hook(&add_command, &[identifier, &auth_key]).await?;
        orch.cleanup.register_dns(identifier, &del_command);
        info!(identifier, "TXT record requested");

        let primary_ns = dns::authoritative_ns(identifier).await?;
        debug!(identifier, primary_ns = %primary_ns, "authoritative nameserver");

        let record = DnsVerifyRecord {
            token: challenge.token.clone(),
            uri: challenge.uri.clone(),
            key_authorization: key_auth,
            identifier: identifier.clone(),
            primary_ns,
            auth_key,
        };
        spool_write(&orch.workspace.dns_spool_dir(), &record)?;
        records.push(record);
    }

    let outcome = verify_and_notify_all(orch, &records).await;

    // Teardown every record, success or not.
    for record in &records {
        hooks::run_dns_teardown(&del_command, &record.identifier).await;
        orch.cleanup.resolve_dns(&record.identifier);
    }

    outcome
}

async fn verify_and_notify_all(
    orch: &mut Orchestrator<'_>,
    records: &[DnsVerifyRecord],
) -> Result<(), ChallengeError> {
    // Phase 2: every record must be visible on its authoritative NS.
    for record in records {
        wait_for_txt(record).await?;
    }

    // Phase 3: optional settling pad for lagging secondaries.
    if orch.config.dns_extra_wait > 0 {
        info!(
            seconds = orch.config.dns_extra_wait,
            "extra DNS propagation wait"
        );
        tokio::time::sleep(Duration::from_secs(orch.config.dns_extra_wait)).await;
    }

    // Phase 4: notify and poll each challenge.
    for record in records {
        let challenge = crate::acme::types::ChallengeData {
            uri: record.uri.clone(),
            token: record.token.clone(),
            status: None,
        };
        orch.notify_and_poll(&record.identifier, &challenge, &record.key_authorization)
            .await?;
    }
    Ok(())
}

/// Poll the authoritative NS until the challenge TXT record carries the
/// expected value.
async fn wait_for_txt(record: &DnsVerifyRecord) -> Result<(), ChallengeError> {
    let name = dns::challenge_record(&record.identifier);
    for attempt in 1..=DNS_POLL_MAX {
        if dns::txt_matches(&record.primary_ns, &name, &record.auth_key).await? {
            info!(identifier = %record.identifier, attempt, "TXT record propagated");
            return Ok(());
        }
        debug!(identifier = %record.identifier, attempt, "TXT record not visible yet");
        tokio::time::sleep(DNS_POLL_INTERVAL).await;
    }
    Err(ChallengeError::PropagationTimeout {
        identifier: record.identifier.clone(),
        attempts: DNS_POLL_MAX,
    })
}

fn spool_write(dir: &Path, record: &DnsVerifyRecord) -> Result<(), ChallengeError> {
    let to_err = |e: std::io::Error| ChallengeError::Io {
        path: dir.display().to_string(),
        source: e,
    };
    std::fs::create_dir_all(dir).map_err(to_err)?;
    let path = dir.join(&record.identifier);
    let body = serde_json::to_vec_pretty(record).expect("spool record serializes");
    std::fs::write(&path, body).map_err(|e| ChallengeError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> DnsVerifyRecord {
        DnsVerifyRecord {
            token: "tok".to_string(),
            uri: "https://ca/challenge/1".to_string(),
            key_authorization: "tok.thumb".to_string(),
            identifier: "a.example.com".to_string(),
            primary_ns: "ns1.example.com".to_string(),
            auth_key: dns_auth_key("tok.thumb"),
        }
    }

    #[test]
    fn spool_round_trips_with_wire_field_names() {
        let tmp = TempDir::new().unwrap();
        let rec = record();
        spool_write(tmp.path(), &rec).unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("a.example.com")).unwrap();
        assert!(raw.contains("\"keyAuthorization\""));
        assert!(raw.contains("\"primaryNS\""));
        assert!(raw.contains("\"authKey\""));

        let parsed: DnsVerifyRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.identifier, rec.identifier);
        assert_eq!(parsed.auth_key, rec.auth_key);
    }

    #[test]
    fn auth_key_is_digest_of_key_authorization() {
        let rec = record();
        assert_eq!(rec.auth_key, dns_auth_key(&rec.key_authorization));
        assert_eq!(rec.auth_key.len(), 43);
    }
}
