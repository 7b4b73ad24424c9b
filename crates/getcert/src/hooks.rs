//! External command hooks: DNS record add/delete and service reload.
//!
//! Hooks run through `sh -c` so operators can use shell syntax. The
//! reload command additionally understands the `ssh:<host>:<cmd>` form
//! and runs on the remote host. DNS teardown failures are logged, not
//! fatal - the certificate work has already succeeded or failed on its
//! own terms by then.

use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info};

const HOOK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook timed out: {0}")]
    Timeout(String),

    #[error("hook exited with status {code}: {command}")]
    Failed { code: i32, command: String },

    #[error("hook failed to spawn: {0}")]
    Io(#[from] std::io::Error),
}

/// Run `command` with `args` appended, shell-quoted.
pub async fn run_hook(command: &str, args: &[&str]) -> Result<(), HookError> {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg));
    }
    run_shell(&line).await
}

/// Run the reload command, locally or via `ssh:<host>:<cmd>`.
pub async fn run_reload(command: &str) -> Result<(), HookError> {
    if let Some(rest) = command.strip_prefix("ssh:") {
        if let Some((host, remote_cmd)) = rest.split_once(':') {
            info!(host, command = remote_cmd, "running remote reload");
            let mut child = Command::new("ssh")
                .arg(host)
                .arg(remote_cmd)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;
            return wait(&mut child, command).await;
        }
    }
    run_shell(command).await
}

/// Invoke the DNS delete hook for one identifier, demoting failure to
/// a log line. Teardown must never fail louder than that.
pub async fn run_dns_teardown(command: &str, identifier: &str) {
    if let Err(e) = run_hook(command, &[identifier]).await {
        error!(identifier, error = %e, "DNS teardown hook failed");
    }
}

async fn run_shell(line: &str) -> Result<(), HookError> {
    info!(command = line, "running hook");
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(line)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;
    wait(&mut child, line).await
}

async fn wait(child: &mut tokio::process::Child, command: &str) -> Result<(), HookError> {
    match timeout(HOOK_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(HookError::Failed {
            code: status.code().unwrap_or(-1),
            command: command.to_string(),
        }),
        Ok(Err(e)) => Err(HookError::Io(e)),
        Err(_) => {
            let _ = child.kill().await;
            Err(HookError::Timeout(command.to_string()))
        }
    }
}

/// Single-quote an argument for `sh -c`.
fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn quoting_survives_single_quotes() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn hook_receives_arguments_in_order() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let script = tmp.path().join("hook.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nprintf '%s %s' \"$1\" \"$2\" > '{}'\n", out.display()),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        run_hook(script.to_str().unwrap(), &["a.example.com", "tokenvalue"])
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "a.example.com tokenvalue"
        );
    }

    #[tokio::test]
    async fn failing_hook_reports_status() {
        let err = run_hook("exit 3", &[]).await.unwrap_err();
        assert!(matches!(err, HookError::Failed { code: 3, .. }));
    }

    #[tokio::test]
    async fn teardown_swallows_failure() {
        // Must not panic or error.
        run_dns_teardown("exit 1", "a.example.com").await;
    }

    #[tokio::test]
    async fn local_reload_runs() {
        run_reload("true").await.unwrap();
    }
}
