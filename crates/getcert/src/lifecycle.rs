//! The certificate lifecycle controller.
//!
//! Drives a full run for one domain: reconcile against the live
//! server, gate on expiry, materialize keys and CSR, register the
//! account, authorize every identifier, finalize, fetch the chain,
//! fan out the artifacts and reload the consuming service.

use crate::acme::http::AcmeHttp;
use crate::acme::request::SignedRequester;
use crate::acme::types::{NewCertificate, NewRegistration};
use crate::acme::{AcmeError, Endpoints};
use crate::challenge::{ChallengeError, Orchestrator};
use crate::config::{Config, ConfigError};
use crate::crypto::keys::{generate_domain_key, write_key_pem, AccountKey};
use crate::crypto::x509::{self, CertInfo};
use crate::crypto::{csr, CryptoError};
use crate::hooks::{self, HookError};
use crate::probe::{self, ProbeError};
use crate::session::{archive_file, CleanupRegistry, SessionError, Workspace};
use crate::transport::{self, TransportError};
use crate::{dns, session};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause after the reload hook so the service finishes its restart
/// before the post-deploy probe.
const RELOAD_SETTLE: Duration = Duration::from_secs(2);

/// `--force` stretches the renewal window to a year, which renews any
/// certificate a public CA will actually issue.
const FORCE_RENEW_ALLOW_DAYS: i64 = 365;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("reload command failed: {0}")]
    Reload(#[from] HookError),

    #[error("{0} does not resolve in DNS")]
    Unresolvable(String),

    #[error("account registration returned status {status}: {detail}")]
    Registration { status: u16, detail: String },

    #[error("new-cert returned status {status}: {detail}")]
    Finalize { status: u16, detail: String },

    #[error("post-deploy verification probe failed: {0}")]
    PostDeployProbe(#[from] ProbeError),

    #[error("certificate served by {domain} does not match the deployed certificate")]
    PostDeployMismatch { domain: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// What a run ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Certificate is inside the renewal window; nothing to do.
    UpToDate,
    /// Remote server was behind; local artifacts were re-deployed.
    Repaired,
    /// A certificate was obtained and deployed.
    Issued,
}

/// Run the full lifecycle for `domain` inside `work_dir`.
pub async fn run(
    config: &Config,
    work_dir: &Path,
    domain: &str,
    force: bool,
    cleanup: &CleanupRegistry,
) -> Result<RunOutcome, LifecycleError> {
    config.validate(domain)?;
    let port = config.remote_port()?;

    let workspace = Workspace::new(work_dir, domain);
    workspace.ensure_layout()?;
    cleanup.register_tmp(&workspace.tmp_dir());

    let mut repaired = false;

    // Reconcile what the server serves with what the workspace holds.
    if config.check_remote && !force {
        repaired = reconcile_remote(config, &workspace, domain, port).await?;
    }

    // Renewal gate: strictly inside the window means nothing to do.
    let renew_allow = if force {
        FORCE_RENEW_ALLOW_DAYS
    } else {
        config.renew_allow
    };
    let cert_path = workspace.cert_path();
    let existing = read_cert_info(&cert_path)?;
    if let Some(info) = &existing {
        let threshold = chrono::Utc::now() + chrono::Duration::days(renew_allow);
        if threshold < info.not_after {
            info!(
                domain,
                not_after = %info.not_after,
                renew_allow,
                "certificate is current, nothing to do"
            );
            return Ok(if repaired {
                RunOutcome::Repaired
            } else {
                RunOutcome::UpToDate
            });
        }
        debug!(domain, not_after = %info.not_after, "renewal window reached");
    }

    // The outgoing certificate is preserved under its validity dates.
    if let Some(info) = &existing {
        archive_file(&cert_path, info)?;
    }

    let (account_key, created) =
        AccountKey::load_or_create(&config.account_key, config.account_key_length)?;
    if created {
        info!(path = %config.account_key.display(), "account key created");
    }

    let key_path = workspace.key_path();
    if !key_path.is_file() {
        let pem = generate_domain_key(config.private_key_alg, config.domain_key_length)?;
        write_key_pem(&key_path, &pem)?;
        info!(path = %key_path.display(), "domain key created");
    }

    let names = config.names(domain);

    // Every name must resolve before we ask the CA to check them -
    // unless DNS-01 is doing the proving, where only TXT records
    // matter.
    if !config.validate_via_dns {
        for name in &names {
            if !dns::name_resolves(name).await {
                return Err(LifecycleError::Unresolvable(name.clone()));
            }
        }
    }

    let csr_der = ensure_csr(&workspace, &key_path, &names)?;

    // From here on we talk to the CA.
    let endpoints = Endpoints::for_ca(&config.ca);
    let http = AcmeHttp::new(endpoints.directory.clone())?;
    let mut requester = SignedRequester::new(http, account_key);

    register_account(&mut requester, &endpoints, config).await?;

    let mut orchestrator = Orchestrator {
        requester: &mut requester,
        config,
        workspace: &workspace,
        cleanup,
        endpoints: &endpoints,
    };
    orchestrator.authorize_all(&names).await?;

    finalize(&mut requester, &endpoints, &workspace, &csr_der).await?;

    deploy_artifacts(config, &workspace).await?;
    reload_services(config).await?;

    if config.check_remote {
        post_verify(&workspace, domain, port).await?;
    }

    info!(domain, "certificate issued and deployed");
    Ok(RunOutcome::Issued)
}

/// Compare the served certificate with the local copy and converge the
/// two. Returns true when the repair path re-deployed local artifacts.
async fn reconcile_remote(
    config: &Config,
    workspace: &Workspace,
    domain: &str,
    port: u16,
) -> Result<bool, LifecycleError> {
    let remote_der = match probe::fetch_remote_leaf_der(domain, port).await {
        Ok(der) => der,
        Err(e) => {
            warn!(domain, port, error = %e, "remote probe failed, skipping reconciliation");
            return Ok(false);
        }
    };
    let remote = x509::parse_der(&remote_der)?;
    let cert_path = workspace.cert_path();

    let Some(local) = read_cert_info(&cert_path)? else {
        info!(domain, "no local certificate, adopting the served one");
        write_file(&cert_path, x509::pem_from_der(&remote_der).as_bytes())?;
        return Ok(false);
    };

    if remote.fingerprint == local.fingerprint {
        debug!(domain, "remote certificate matches local");
        return Ok(false);
    }

    if remote.subject_cn.as_deref() != Some(domain) {
        info!(
            domain,
            remote_cn = ?remote.subject_cn,
            "served certificate is for a different subject, ignoring"
        );
        return Ok(false);
    }

    if remote.not_after > local.not_after {
        info!(
            domain,
            remote_not_after = %remote.not_after,
            local_not_after = %local.not_after,
            "served certificate is newer, adopting it"
        );
        archive_file(&cert_path, &local)?;
        write_file(&cert_path, x509::pem_from_der(&remote_der).as_bytes())?;
        return Ok(false);
    }

    info!(
        domain,
        "served certificate is older than local, re-deploying local artifacts"
    );
    deploy_artifacts(config, workspace).await?;
    reload_services(config).await?;
    post_verify(workspace, domain, port).await?;
    Ok(true)
}

/// Load the CSR when it still covers exactly the configured names,
/// rebuilding it otherwise. Returns the DER bytes for `new-cert`.
fn ensure_csr(
    workspace: &Workspace,
    key_path: &Path,
    names: &[String],
) -> Result<Vec<u8>, LifecycleError> {
    let csr_path = workspace.csr_path();

    if csr_path.is_file() {
        let existing = read_file(&csr_path)?;
        match csr::csr_matches(&existing, names) {
            Ok(true) => {
                debug!(path = %csr_path.display(), "existing CSR matches configured names");
                return Ok(csr_der_bytes(&existing)?);
            }
            Ok(false) => info!(path = %csr_path.display(), "CSR names changed, regenerating"),
            Err(e) => warn!(path = %csr_path.display(), error = %e, "unreadable CSR, regenerating"),
        }
    }

    let key_pem = String::from_utf8(read_file(key_path)?)
        .map_err(|e| CryptoError::KeyParse(e.to_string()))?;
    let built = csr::build_csr(&key_pem, names)?;
    write_file(&csr_path, built.pem.as_bytes())?;
    info!(path = %csr_path.display(), names = ?names, "CSR written");
    Ok(built.der)
}

fn csr_der_bytes(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.starts_with(b"-----BEGIN") {
        Ok(pem::parse(data)
            .map_err(|e| CryptoError::CsrParse(e.to_string()))?
            .into_contents())
    } else {
        Ok(data.to_vec())
    }
}

/// POST `new-reg`. 201 is a fresh account, 409 means the key is
/// already registered; both are success.
async fn register_account(
    requester: &mut SignedRequester,
    endpoints: &Endpoints,
    config: &Config,
) -> Result<(), LifecycleError> {
    let payload = NewRegistration::new(config.account_email.as_deref(), &config.agreement);
    let response = requester
        .send_signed(&endpoints.new_reg, &payload, false)
        .await?;
    match response.status {
        201 => {
            info!("account registered");
            Ok(())
        }
        409 => {
            debug!("account already registered");
            Ok(())
        }
        status => Err(LifecycleError::Registration {
            status,
            detail: response.detail(),
        }),
    }
}

/// POST the CSR, then fetch the leaf via `Location` and the issuer via
/// the `rel="up"` link.
async fn finalize(
    requester: &mut SignedRequester,
    endpoints: &Endpoints,
    workspace: &Workspace,
    csr_der: &[u8],
) -> Result<(), LifecycleError> {
    let response = requester
        .send_signed(&endpoints.new_cert, &NewCertificate::from_der(csr_der), false)
        .await?;
    if response.status != 201 {
        return Err(LifecycleError::Finalize {
            status: response.status,
            detail: response.detail(),
        });
    }

    let cert_url = response
        .location
        .clone()
        .ok_or(AcmeError::MissingHeader("Location"))?;

    let cert_response = requester.get(&cert_url).await?;
    if cert_response.status != 200 {
        return Err(LifecycleError::Finalize {
            status: cert_response.status,
            detail: cert_response.detail(),
        });
    }
    write_file(
        &workspace.cert_path(),
        x509::pem_from_der(&cert_response.body).as_bytes(),
    )?;
    info!(path = %workspace.cert_path().display(), "certificate written");

    // The issuer link usually rides on the certificate download, with
    // the new-cert response as fallback.
    let issuer_url = cert_response
        .link_up
        .clone()
        .or(response.link_up.clone())
        .ok_or(AcmeError::MissingHeader("Link rel=\"up\""))?;

    let issuer_response = requester.get(&issuer_url).await?;
    if issuer_response.status != 200 {
        return Err(LifecycleError::Finalize {
            status: issuer_response.status,
            detail: issuer_response.detail(),
        });
    }
    write_file(
        &workspace.chain_path(),
        x509::pem_from_der(&issuer_response.body).as_bytes(),
    )?;
    info!(path = %workspace.chain_path().display(), "issuer certificate written");

    Ok(())
}

/// Fan the artifacts out to every configured destination. Derived
/// artifacts (leaf+issuer, key+leaf+issuer) are assembled under tmp.
async fn deploy_artifacts(config: &Config, workspace: &Workspace) -> Result<(), LifecycleError> {
    if let Some(dest) = &config.domain_cert_location {
        transport::place("domain certificate", &workspace.cert_path(), dest).await?;
    }
    if let Some(dest) = &config.domain_key_location {
        transport::place("domain key", &workspace.key_path(), dest).await?;
    }
    if let Some(dest) = &config.ca_cert_location {
        transport::place("CA certificate", &workspace.chain_path(), dest).await?;
    }

    if let Some(dest) = &config.domain_chain_location {
        let chain = concat_files(&[&workspace.cert_path(), &workspace.chain_path()])?;
        let tmp = workspace.tmp_dir().join(format!("{}_chain.pem", workspace.domain()));
        write_file(&tmp, chain.as_bytes())?;
        transport::place("certificate chain", &tmp, dest).await?;
    }
    if let Some(dest) = &config.domain_pem_location {
        let full = concat_files(&[
            &workspace.key_path(),
            &workspace.cert_path(),
            &workspace.chain_path(),
        ])?;
        let tmp = workspace.tmp_dir().join(format!("{}.pem", workspace.domain()));
        write_file(&tmp, full.as_bytes())?;
        transport::place("key+certificate bundle", &tmp, dest).await?;
    }
    Ok(())
}

async fn reload_services(config: &Config) -> Result<(), LifecycleError> {
    if let Some(cmd) = &config.reload_cmd {
        hooks::run_reload(cmd).await?;
        tokio::time::sleep(RELOAD_SETTLE).await;
    }
    Ok(())
}

/// The served leaf must now be the one on disk.
async fn post_verify(
    workspace: &Workspace,
    domain: &str,
    port: u16,
) -> Result<(), LifecycleError> {
    let local = read_cert_info(&workspace.cert_path())?.ok_or_else(|| LifecycleError::Io {
        path: workspace.cert_path().display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no local certificate"),
    })?;
    let remote = probe::fetch_remote_leaf(domain, port).await?;
    if remote.fingerprint != local.fingerprint {
        return Err(LifecycleError::PostDeployMismatch {
            domain: domain.to_string(),
        });
    }
    info!(domain, "post-deploy verification passed");
    Ok(())
}

/// Iterate every domain directory in the workspace, isolating
/// failures. Returns the number of failed domains.
pub async fn run_all(
    work_dir: &Path,
    cleanup: &CleanupRegistry,
) -> Result<usize, LifecycleError> {
    let domains = session::domain_dirs(work_dir)?;
    if domains.is_empty() {
        warn!(work_dir = %work_dir.display(), "no domain directories found");
        return Ok(0);
    }

    let mut failures = 0;
    for domain in &domains {
        info!(domain, "processing");
        let config = match Config::load(work_dir, domain) {
            Ok(c) => c,
            Err(e) => {
                warn!(domain, error = %e, "skipping: configuration error");
                failures += 1;
                continue;
            }
        };
        match run(&config, work_dir, domain, false, cleanup).await {
            Ok(outcome) => debug!(domain, ?outcome, "done"),
            Err(e) => {
                warn!(domain, error = %e, "domain failed");
                failures += 1;
            }
        }
        // Release this domain's tmp state before the next run. The
        // cleanup also restores the process umask, so tighten it again
        // for the remaining domains.
        cleanup.cleanup().await;
        cleanup.apply_umask();
    }
    Ok(failures)
}

fn read_cert_info(path: &Path) -> Result<Option<CertInfo>, LifecycleError> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&read_file(path)?).into_owned();
    Ok(Some(x509::parse_pem(&text)?))
}

fn read_file(path: &Path) -> Result<Vec<u8>, LifecycleError> {
    std::fs::read(path).map_err(|e| LifecycleError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

fn write_file(path: &Path, content: &[u8]) -> Result<(), LifecycleError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LifecycleError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    std::fs::write(path, content).map_err(|e| LifecycleError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Concatenate PEM files, keeping a newline between blocks.
fn concat_files(paths: &[&Path]) -> Result<String, LifecycleError> {
    let mut out = String::new();
    for path in paths {
        let text = String::from_utf8_lossy(&read_file(path)?).into_owned();
        out.push_str(text.trim_end());
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyAlgorithm;
    use crate::crypto::keys;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_requester(server_uri: &str) -> (SignedRequester, Endpoints) {
        let endpoints = Endpoints::for_ca(server_uri);
        let http = AcmeHttp::new(endpoints.directory.clone()).unwrap();
        let key = AccountKey::generate(2048).unwrap();
        (SignedRequester::new(http, key), endpoints)
    }

    async fn mount_nonce(server: &MockServer) {
        Mock::given(method("HEAD"))
            .and(url_path("/directory"))
            .respond_with(ResponseTemplate::new(200).insert_header("Replay-Nonce", "nonce-1"))
            .mount(server)
            .await;
    }

    fn base_config(work_dir: &Path) -> Config {
        Config::load(work_dir, "example.com").unwrap()
    }

    fn self_signed(
        domain: &str,
        not_before: time::OffsetDateTime,
        not_after: time::OffsetDateTime,
    ) -> (String, Vec<u8>) {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, domain);
        params.not_before = not_before;
        params.not_after = not_after;
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem().into_bytes())
    }

    #[tokio::test]
    async fn registration_accepts_201_and_409() {
        let server = MockServer::start().await;
        mount_nonce(&server).await;
        Mock::given(method("POST"))
            .and(url_path("/acme/new-reg"))
            .respond_with(
                ResponseTemplate::new(409).insert_header("Replay-Nonce", "nonce-2"),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let config = base_config(tmp.path());
        let (mut requester, endpoints) = test_requester(&server.uri());
        register_account(&mut requester, &endpoints, &config)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn registration_rejects_other_statuses() {
        let server = MockServer::start().await;
        mount_nonce(&server).await;
        Mock::given(method("POST"))
            .and(url_path("/acme/new-reg"))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header("Replay-Nonce", "nonce-2")
                    .set_body_string("bad agreement"),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let config = base_config(tmp.path());
        let (mut requester, endpoints) = test_requester(&server.uri());
        let err = register_account(&mut requester, &endpoints, &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Registration { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn finalize_fetches_leaf_and_issuer() {
        let server = MockServer::start().await;
        mount_nonce(&server).await;

        let (leaf_pem, _) = self_signed(
            "example.com",
            time::macros::datetime!(2026-01-01 00:00 UTC),
            time::macros::datetime!(2026-04-01 00:00 UTC),
        );
        let leaf_der = pem::parse(&leaf_pem).unwrap().into_contents();
        let (issuer_pem, _) = self_signed(
            "issuer.example.com",
            time::macros::datetime!(2025-01-01 00:00 UTC),
            time::macros::datetime!(2030-01-01 00:00 UTC),
        );
        let issuer_der = pem::parse(&issuer_pem).unwrap().into_contents();

        Mock::given(method("POST"))
            .and(url_path("/acme/new-cert"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Replay-Nonce", "nonce-2")
                    .insert_header("Location", format!("{}/cert/1", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/cert/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "Link",
                        format!("<{}/issuer>;rel=\"up\"", server.uri()).as_str(),
                    )
                    .set_body_bytes(leaf_der.clone()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/issuer"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(issuer_der.clone()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path(), "example.com");
        workspace.ensure_layout().unwrap();

        let (mut requester, endpoints) = test_requester(&server.uri());
        finalize(&mut requester, &endpoints, &workspace, b"fake-csr-der")
            .await
            .unwrap();

        let written = x509::parse_pem(
            &std::fs::read_to_string(workspace.cert_path()).unwrap(),
        )
        .unwrap();
        assert_eq!(written.subject_cn.as_deref(), Some("example.com"));

        let chain = std::fs::read_to_string(workspace.chain_path()).unwrap();
        assert!(chain.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[tokio::test]
    async fn finalize_requires_location_header() {
        let server = MockServer::start().await;
        mount_nonce(&server).await;
        Mock::given(method("POST"))
            .and(url_path("/acme/new-cert"))
            .respond_with(ResponseTemplate::new(201).insert_header("Replay-Nonce", "n2"))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path(), "example.com");
        workspace.ensure_layout().unwrap();

        let (mut requester, endpoints) = test_requester(&server.uri());
        let err = finalize(&mut requester, &endpoints, &workspace, b"csr")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Acme(AcmeError::MissingHeader("Location"))
        ));
    }

    #[tokio::test]
    async fn run_skips_inside_renewal_window() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("getssl.cfg"),
            "CHECK_REMOTE = false\nRENEW_ALLOW = 30\nACL = [\"/var/www/challenge\"]\n",
        )
        .unwrap();

        let workspace = Workspace::new(tmp.path(), "example.com");
        workspace.ensure_layout().unwrap();

        // Sixty days of validity left: strictly outside the window.
        let now = time::OffsetDateTime::now_utc();
        let (cert_pem, _) = self_signed("example.com", now - time::Duration::days(30), now + time::Duration::days(60));
        std::fs::write(workspace.cert_path(), cert_pem).unwrap();

        let config = base_config(tmp.path());
        let cleanup = CleanupRegistry::new();
        let outcome = run(&config, tmp.path(), "example.com", false, &cleanup)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::UpToDate);
        // No archive happened.
        assert!(workspace.cert_path().exists());
    }

    #[tokio::test]
    async fn ensure_csr_regenerates_on_name_mismatch() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path(), "example.com");
        workspace.ensure_layout().unwrap();

        let key_pem = generate_domain_key(KeyAlgorithm::Prime256v1, 0).unwrap();
        keys::write_key_pem(&workspace.key_path(), &key_pem).unwrap();

        // CSR for an outdated name set.
        let old_names = vec!["example.com".to_string(), "old.example.com".to_string()];
        let old = csr::build_csr(&key_pem, &old_names).unwrap();
        std::fs::write(workspace.csr_path(), &old.pem).unwrap();

        let new_names = vec!["example.com".to_string(), "www.example.com".to_string()];
        let der = ensure_csr(&workspace, &workspace.key_path(), &new_names).unwrap();

        let mut got = csr::csr_names(&der).unwrap();
        got.sort();
        assert_eq!(got, vec!["example.com", "www.example.com"]);

        // The on-disk CSR was rewritten too.
        let on_disk = std::fs::read(workspace.csr_path()).unwrap();
        assert!(csr::csr_matches(&on_disk, &new_names).unwrap());
    }

    #[tokio::test]
    async fn ensure_csr_keeps_matching_csr() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path(), "example.com");
        workspace.ensure_layout().unwrap();

        let key_pem = generate_domain_key(KeyAlgorithm::Prime256v1, 0).unwrap();
        keys::write_key_pem(&workspace.key_path(), &key_pem).unwrap();

        let names = vec!["example.com".to_string()];
        let built = csr::build_csr(&key_pem, &names).unwrap();
        std::fs::write(workspace.csr_path(), &built.pem).unwrap();
        let before = std::fs::read(workspace.csr_path()).unwrap();

        ensure_csr(&workspace, &workspace.key_path(), &names).unwrap();
        assert_eq!(std::fs::read(workspace.csr_path()).unwrap(), before);
    }

    #[test]
    fn concat_keeps_block_boundaries() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = tmp.path().join("a.pem");
        let b = tmp.path().join("b.pem");
        std::fs::write(&a, "-----BEGIN A-----\nx\n-----END A-----\n\n").unwrap();
        std::fs::write(&b, "-----BEGIN B-----\ny\n-----END B-----").unwrap();

        let joined = concat_files(&[&a, &b]).unwrap();
        assert_eq!(
            joined,
            "-----BEGIN A-----\nx\n-----END A-----\n-----BEGIN B-----\ny\n-----END B-----\n"
        );
    }

    #[test]
    fn csr_der_passthrough_and_pem_unwrap() {
        let der = vec![0x30, 0x82, 0x01, 0x02];
        assert_eq!(csr_der_bytes(&der).unwrap(), der);

        let pem_text = pem::encode(&pem::Pem::new("CERTIFICATE REQUEST", der.clone()));
        assert_eq!(csr_der_bytes(pem_text.as_bytes()).unwrap(), der);
    }

    #[test]
    fn read_cert_info_absent_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(read_cert_info(&tmp.path().join("absent.crt"))
            .unwrap()
            .is_none());
    }
}
