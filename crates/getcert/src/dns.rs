//! DNS support: name resolvability checks, authoritative nameserver
//! discovery via SOA, and TXT queries pinned to that nameserver.
//!
//! Propagation checks disable caching and query the zone's own primary
//! NS so a stale recursive cache cannot produce a false positive.

use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("failed to resolve {name}: {detail}")]
    Resolve { name: String, detail: String },

    #[error("no authoritative nameserver found for {0}")]
    NoNameserver(String),
}

/// TXT record name for a DNS-01 challenge.
pub fn challenge_record(identifier: &str) -> String {
    format!("_acme-challenge.{identifier}")
}

fn system_resolver(opts: ResolverOpts) -> TokioResolver {
    Resolver::builder_with_config(
        ResolverConfig::default(),
        TokioConnectionProvider::default(),
    )
    .with_options(opts)
    .build()
}

fn default_opts() -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = Duration::from_secs(5);
    opts.attempts = 2;
    opts
}

/// More patient options for the single retry the SOA discovery makes.
fn verbose_opts() -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = Duration::from_secs(10);
    opts.attempts = 5;
    opts
}

/// Whether `name` resolves to at least one address.
pub async fn name_resolves(name: &str) -> bool {
    match system_resolver(default_opts()).lookup_ip(name).await {
        Ok(lookup) => lookup.iter().next().is_some(),
        Err(e) => {
            trace!(name, error = %e, "lookup failed");
            false
        }
    }
}

/// Find the primary nameserver (SOA mname) responsible for
/// `identifier`, walking up parent labels until a SOA answers. Retries
/// once with more patient resolver options before giving up.
pub async fn authoritative_ns(identifier: &str) -> Result<String, DnsError> {
    if let Some(ns) = soa_mname(identifier, default_opts()).await {
        return Ok(ns);
    }
    debug!(identifier, "SOA lookup empty, retrying with verbose options");
    soa_mname(identifier, verbose_opts())
        .await
        .ok_or_else(|| DnsError::NoNameserver(identifier.to_string()))
}

async fn soa_mname(identifier: &str, opts: ResolverOpts) -> Option<String> {
    let resolver = system_resolver(opts);
    let mut zone = identifier.to_string();
    loop {
        match resolver.soa_lookup(zone.clone()).await {
            Ok(lookup) => {
                if let Some(soa) = lookup.iter().next() {
                    let mname = soa.mname().to_utf8();
                    return Some(mname.trim_end_matches('.').to_string());
                }
            }
            Err(e) => trace!(zone, error = %e, "SOA lookup failed"),
        }
        // Walk up one label; stop at the TLD.
        match zone.split_once('.') {
            Some((_, parent)) if parent.contains('.') => zone = parent.to_string(),
            _ => return None,
        }
    }
}

/// Query `record` as TXT against the nameserver `ns_host` and report
/// whether any record equals `expected`. Absence is `Ok(false)`;
/// transport-level failures are logged and also `Ok(false)` so the
/// caller's poll loop keeps going.
pub async fn txt_matches(ns_host: &str, record: &str, expected: &str) -> Result<bool, DnsError> {
    let ns_ip = resolve_host(ns_host).await?;

    let mut config = ResolverConfig::new();
    config.add_name_server(NameServerConfig::new(
        SocketAddr::new(ns_ip, 53),
        Protocol::Udp,
    ));
    let mut opts = default_opts();
    opts.cache_size = 0;

    let resolver = Resolver::builder_with_config(config, TokioConnectionProvider::default())
        .with_options(opts)
        .build();

    match resolver.txt_lookup(record.to_string()).await {
        Ok(records) => {
            for txt in records.iter() {
                let value: String = txt
                    .txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part))
                    .collect();
                trace!(record, value = %value, "TXT answer");
                if value == expected {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Err(e) => {
            warn!(record, ns = ns_host, error = %e, "TXT query failed");
            Ok(false)
        }
    }
}

async fn resolve_host(host: &str) -> Result<IpAddr, DnsError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let lookup = system_resolver(default_opts())
        .lookup_ip(host)
        .await
        .map_err(|e| DnsError::Resolve {
            name: host.to_string(),
            detail: e.to_string(),
        })?;
    lookup.iter().next().ok_or_else(|| DnsError::Resolve {
        name: host.to_string(),
        detail: "no addresses".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_record_prefix() {
        assert_eq!(
            challenge_record("sub.example.com"),
            "_acme-challenge.sub.example.com"
        );
    }

    #[tokio::test]
    async fn resolve_host_accepts_literal_ip() {
        assert_eq!(
            resolve_host("192.0.2.7").await.unwrap(),
            "192.0.2.7".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn verbose_opts_are_more_patient() {
        assert!(verbose_opts().attempts > default_opts().attempts);
        assert!(verbose_opts().timeout > default_opts().timeout);
    }
}
