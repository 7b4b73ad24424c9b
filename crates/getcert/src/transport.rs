//! File transport: deliver an artifact to a local path or a remote
//! host via `ssh:<host>:<path>`.
//!
//! One `place` contract covers both deployment fan-out and the HTTP-01
//! challenge token, so the `.well-known/acme-challenge/` directory may
//! live on another machine.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

/// Generous ceiling for a single copy or remote shell invocation.
const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to copy {label} to {dest}: {source}")]
    Copy {
        label: String,
        dest: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to sync {label} to {dest}: {source}")]
    Sync {
        label: String,
        dest: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote transfer of {label} to {host}:{path} exited with status {status}")]
    RemoteStatus {
        label: String,
        host: String,
        path: String,
        status: i32,
    },

    #[error("remote transfer of {label} failed to spawn: {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote transfer of {label} timed out")]
    Timeout { label: String },
}

/// A parsed destination specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Empty spec: nothing to do.
    None,
    Local(PathBuf),
    Remote { host: String, path: String },
}

impl Destination {
    /// `""` is none, `ssh:<host>:<path>` is remote, anything else is a
    /// local path.
    pub fn parse(spec: &str) -> Destination {
        if spec.is_empty() {
            return Destination::None;
        }
        if let Some(rest) = spec.strip_prefix("ssh:") {
            if let Some((host, path)) = rest.split_once(':') {
                return Destination::Remote {
                    host: host.to_string(),
                    path: path.to_string(),
                };
            }
        }
        Destination::Local(PathBuf::from(spec))
    }

    /// The spec for a file named `name` inside this destination
    /// directory.
    pub fn join(&self, name: &str) -> Destination {
        match self {
            Destination::None => Destination::None,
            Destination::Local(dir) => Destination::Local(dir.join(name)),
            Destination::Remote { host, path } => Destination::Remote {
                host: host.clone(),
                path: format!("{}/{}", path.trim_end_matches('/'), name),
            },
        }
    }
}

/// Copy `src` to `dest_spec`. Local copies create missing parent
/// directories and land atomically (temp file, fsync, rename) so a
/// crash mid-write never leaves a truncated artifact at the serving
/// location. Remote copies go through `scp` after an `ssh mkdir -p`.
/// A non-zero transport status is fatal.
pub async fn place(label: &str, src: &Path, dest_spec: &str) -> Result<(), TransportError> {
    match Destination::parse(dest_spec) {
        Destination::None => Ok(()),
        Destination::Local(dest) => {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| TransportError::CreateDir {
                    path: parent.display().to_string(),
                    source: e,
                })?;
            }
            let content = std::fs::read(src).map_err(|e| TransportError::Copy {
                label: label.to_string(),
                dest: src.display().to_string(),
                source: e,
            })?;
            write_local_atomic(label, &dest, &content)?;
            info!(label, dest = %dest.display(), "placed");
            Ok(())
        }
        Destination::Remote { host, path } => {
            if let Some((dir, _)) = path.rsplit_once('/') {
                if !dir.is_empty() {
                    run_remote(label, &host, &format!("mkdir -p '{dir}'")).await?;
                }
            }
            debug!(label, host = %host, path = %path, "remote copy");
            let status = run_transport(
                label,
                Command::new("scp")
                    .arg("-q")
                    .arg(src)
                    .arg(format!("{host}:{path}")),
            )
            .await?;
            if status != 0 {
                return Err(TransportError::RemoteStatus {
                    label: label.to_string(),
                    host,
                    path,
                    status,
                });
            }
            info!(label, host = %host, path = %path, "placed");
            Ok(())
        }
    }
}

/// Remove the file a previous `place` of `name` into `dest_spec`
/// created. Used for challenge token teardown.
pub async fn remove(label: &str, dest_spec: &str, name: &str) -> Result<(), TransportError> {
    match Destination::parse(dest_spec).join(name) {
        Destination::None => Ok(()),
        Destination::Local(path) => {
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| TransportError::Copy {
                    label: label.to_string(),
                    dest: path.display().to_string(),
                    source: e,
                })?;
            }
            Ok(())
        }
        Destination::Remote { host, path } => {
            run_remote(label, &host, &format!("rm -f '{path}'")).await
        }
    }
}

/// Write `content` atomically: temp file in the same directory, fsync,
/// then rename over the target. The rename is atomic on POSIX, so
/// readers only ever see the old or the new file, never a partial one.
fn write_local_atomic(label: &str, dest: &Path, content: &[u8]) -> Result<(), TransportError> {
    use std::io::Write;

    let temp = dest.with_extension("tmp");
    let mut file = std::fs::File::create(&temp).map_err(|e| TransportError::Copy {
        label: label.to_string(),
        dest: temp.display().to_string(),
        source: e,
    })?;
    file.write_all(content).map_err(|e| TransportError::Copy {
        label: label.to_string(),
        dest: temp.display().to_string(),
        source: e,
    })?;
    file.sync_all().map_err(|e| TransportError::Sync {
        label: label.to_string(),
        dest: temp.display().to_string(),
        source: e,
    })?;
    std::fs::rename(&temp, dest).map_err(|e| TransportError::Rename {
        from: temp.display().to_string(),
        to: dest.display().to_string(),
        source: e,
    })
}

async fn run_remote(label: &str, host: &str, command: &str) -> Result<(), TransportError> {
    let status = run_transport(label, Command::new("ssh").arg(host).arg(command)).await?;
    if status != 0 {
        return Err(TransportError::RemoteStatus {
            label: label.to_string(),
            host: host.to_string(),
            path: command.to_string(),
            status,
        });
    }
    Ok(())
}

async fn run_transport(label: &str, command: &mut Command) -> Result<i32, TransportError> {
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match timeout(TRANSPORT_TIMEOUT, child).await {
        Ok(Ok(status)) => Ok(status.code().unwrap_or(-1)),
        Ok(Err(e)) => Err(TransportError::Spawn {
            label: label.to_string(),
            source: e,
        }),
        Err(_) => Err(TransportError::Timeout {
            label: label.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_empty_is_none() {
        assert_eq!(Destination::parse(""), Destination::None);
    }

    #[test]
    fn parse_ssh_spec() {
        assert_eq!(
            Destination::parse("ssh:web1:/etc/ssl/cert.pem"),
            Destination::Remote {
                host: "web1".to_string(),
                path: "/etc/ssl/cert.pem".to_string(),
            }
        );
    }

    #[test]
    fn parse_local_path() {
        assert_eq!(
            Destination::parse("/etc/ssl/cert.pem"),
            Destination::Local(PathBuf::from("/etc/ssl/cert.pem"))
        );
    }

    #[test]
    fn join_appends_file_name() {
        let remote = Destination::parse("ssh:web1:/srv/challenge/").join("tok123");
        assert_eq!(
            remote,
            Destination::Remote {
                host: "web1".to_string(),
                path: "/srv/challenge/tok123".to_string(),
            }
        );

        let local = Destination::parse("/srv/challenge").join("tok123");
        assert_eq!(local, Destination::Local(PathBuf::from("/srv/challenge/tok123")));
    }

    #[tokio::test]
    async fn place_empty_spec_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.txt");
        std::fs::write(&src, "data").unwrap();
        place("noop", &src, "").await.unwrap();
    }

    #[tokio::test]
    async fn place_local_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.txt");
        std::fs::write(&src, "payload").unwrap();

        let dest = tmp.path().join("a/b/c/dest.txt");
        place("test file", &src, dest.to_str().unwrap()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "payload");
    }

    #[tokio::test]
    async fn place_local_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.pem");
        std::fs::write(&src, "payload").unwrap();

        let dest = tmp.path().join("cert.pem");
        place("certificate", &src, dest.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "payload");
        assert!(!dest.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn place_local_overwrites_existing() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.pem");
        std::fs::write(&src, "new").unwrap();

        let dest = tmp.path().join("cert.pem");
        std::fs::write(&dest, "old").unwrap();

        place("certificate", &src, dest.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new");
    }

    #[tokio::test]
    async fn remove_local_token() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("acl");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("tok"), "x").unwrap();

        remove("token", dir.to_str().unwrap(), "tok").await.unwrap();
        assert!(!dir.join("tok").exists());

        // Removing an absent file stays quiet.
        remove("token", dir.to_str().unwrap(), "tok").await.unwrap();
    }
}
