//! HTTP-01: place the key authorization where the identifier's web
//! server already serves `/.well-known/acme-challenge/`, prove it is
//! reachable, then let the CA verify.

use super::{ChallengeError, Orchestrator};
use crate::crypto::jws::key_authorization;
use crate::transport;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const SELF_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Authorize each identifier in turn: provision, self-check, notify,
/// poll, teardown. The token is removed from its challenge root on
/// success and on failure alike.
pub(super) async fn run(
    orch: &mut Orchestrator<'_>,
    names: &[String],
) -> Result<(), ChallengeError> {
    for (index, identifier) in names.iter().enumerate() {
        let authz = orch.new_authz(identifier).await?;
        let challenge = authz
            .http01()
            .ok_or_else(|| ChallengeError::MissingChallenge {
                identifier: identifier.clone(),
                challenge_type: "http-01",
            })?
            .clone();

        let acl = orch
            .config
            .acl_for(index)
            .ok_or_else(|| ChallengeError::MissingAclEntry {
                identifier: identifier.clone(),
                index,
            })?
            .to_string();

        let key_auth = key_authorization(&challenge.token, orch.requester.thumbprint());

        // Provision: token body under tmp, then out to the challenge
        // root (which may be remote).
        let token_file = orch.workspace.tmp_dir().join(&challenge.token);
        write_world_readable(&token_file, &key_auth)?;
        transport::place(
            "challenge token",
            &token_file,
            &format!(
                "{}/{}",
                acl.trim_end_matches('/'),
                challenge.token
            ),
        )
        .await?;
        info!(identifier, token = %challenge.token, "challenge token placed");

        let result = verify_and_notify(orch, identifier, &challenge, &key_auth).await;

        // Teardown regardless of outcome.
        if let Err(e) = transport::remove("challenge token", &acl, &challenge.token).await {
            warn!(identifier, error = %e, "failed to remove challenge token");
        }
        let _ = std::fs::remove_file(&token_file);

        result?;
    }
    Ok(())
}

async fn verify_and_notify(
    orch: &mut Orchestrator<'_>,
    identifier: &str,
    challenge: &crate::acme::types::ChallengeData,
    key_auth: &str,
) -> Result<(), ChallengeError> {
    if orch.config.skip_http_token_check {
        debug!(identifier, "self-check skipped by configuration");
    } else {
        let url = format!(
            "http://{identifier}/.well-known/acme-challenge/{}",
            challenge.token
        );
        verify_token_served(&url, key_auth)
            .await
            .map_err(|detail| ChallengeError::SelfCheck {
                identifier: identifier.to_string(),
                detail,
            })?;
        debug!(identifier, "self-check passed");
    }

    orch.notify_and_poll(identifier, challenge, key_auth).await
}

/// Fetch `url` and require the body to equal the key authorization.
/// Run before notifying the CA so a misplaced token fails fast, on our
/// side of the fence.
pub async fn verify_token_served(url: &str, expected: &str) -> Result<(), String> {
    let client = reqwest::Client::builder()
        .timeout(SELF_CHECK_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("GET {url}: {e}"))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| e.to_string())?;

    if !status.is_success() {
        return Err(format!("GET {url} returned status {status}"));
    }
    if body.trim_end() != expected {
        return Err(format!(
            "token at {url} does not match the key authorization"
        ));
    }
    Ok(())
}

/// The token must be readable by the web server user, so it gets an
/// explicit 0644 despite the run's 077 umask.
fn write_world_readable(path: &Path, content: &str) -> Result<(), ChallengeError> {
    let to_err = |e: std::io::Error| ChallengeError::Io {
        path: path.display().to_string(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(to_err)?;
    }
    std::fs::write(path, content).map_err(to_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).map_err(to_err)?;
    }
    Ok(())
}
