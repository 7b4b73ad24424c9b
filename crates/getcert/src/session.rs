//! On-disk workspace and the cleanup guarantees of a run.
//!
//! A run owns `workDir/<domain>/tmp/` exclusively and removes it on
//! every exit path. Keys generated during the run must never be
//! world-readable, so the whole run executes under umask 077; the
//! process umask is restored on exit. Live DNS challenge records are
//! registered here so teardown happens even on abnormal exits.

use crate::crypto::x509::CertInfo;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to archive {path}: {source}")]
    Archive {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to list {path}: {source}")]
    List {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Per-domain workspace paths.
#[derive(Debug, Clone)]
pub struct Workspace {
    work_dir: PathBuf,
    domain: String,
}

impl Workspace {
    pub fn new(work_dir: &Path, domain: &str) -> Self {
        Workspace {
            work_dir: work_dir.to_path_buf(),
            domain: domain.to_string(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn domain_dir(&self) -> PathBuf {
        self.work_dir.join(&self.domain)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.domain_dir().join("tmp")
    }

    pub fn dns_spool_dir(&self) -> PathBuf {
        self.tmp_dir().join("dns_verify")
    }

    pub fn key_path(&self) -> PathBuf {
        self.domain_dir().join(format!("{}.key", self.domain))
    }

    pub fn csr_path(&self) -> PathBuf {
        self.domain_dir().join(format!("{}.csr", self.domain))
    }

    pub fn cert_path(&self) -> PathBuf {
        self.domain_dir().join(format!("{}.crt", self.domain))
    }

    pub fn chain_path(&self) -> PathBuf {
        self.domain_dir().join("chain.crt")
    }

    /// Create the workspace directories for this run.
    pub fn ensure_layout(&self) -> Result<(), SessionError> {
        for dir in [self.work_dir.clone(), self.domain_dir(), self.tmp_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| SessionError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Rename an about-to-be-replaced certificate file to
/// `<name>_<startDate>_<endDate>` (ISO dates) next to the original.
pub fn archive_file(path: &Path, info: &CertInfo) -> Result<Option<PathBuf>, SessionError> {
    if !path.exists() {
        return Ok(None);
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let archived = path.with_file_name(format!(
        "{}_{}_{}",
        name,
        info.not_before.format("%Y-%m-%d"),
        info.not_after.format("%Y-%m-%d")
    ));
    std::fs::rename(path, &archived).map_err(|e| SessionError::Archive {
        path: path.display().to_string(),
        source: e,
    })?;
    info!(from = %path.display(), to = %archived.display(), "archived");
    Ok(Some(archived))
}

/// Every direct child directory of the workspace - the iteration set
/// of all-domains mode. The workspace root's own files (global config,
/// account key) are not directories and fall out naturally; a domain
/// directory that is missing or misconfigured fails on its own run
/// without aborting the others.
pub fn domain_dirs(work_dir: &Path) -> Result<Vec<String>, SessionError> {
    let entries = std::fs::read_dir(work_dir).map_err(|e| SessionError::List {
        path: work_dir.display().to_string(),
        source: e,
    })?;

    let mut domains = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SessionError::List {
            path: work_dir.display().to_string(),
            source: e,
        })?;
        if entry.path().is_dir() {
            if let Some(name) = entry.path().file_name().and_then(|n| n.to_str()) {
                domains.push(name.to_string());
            }
        }
    }
    domains.sort();
    Ok(domains)
}

/// A DNS challenge record that is live on the operator's zone and must
/// be deleted before the process exits.
#[derive(Debug, Clone)]
struct LiveDnsRecord {
    identifier: String,
    del_command: String,
}

#[derive(Default)]
struct CleanupInner {
    tmp_dirs: Vec<PathBuf>,
    dns_records: Vec<LiveDnsRecord>,
    prev_umask: Option<u32>,
}

impl CleanupInner {
    /// Synchronous best-effort cleanup, shared by the async path and
    /// the last-resort Drop.
    fn run_sync(&mut self) {
        for record in self.dns_records.drain(..) {
            debug!(identifier = %record.identifier, "tearing down DNS record");
            let status = std::process::Command::new("sh")
                .arg("-c")
                .arg(format!(
                    "{} '{}'",
                    record.del_command,
                    record.identifier.replace('\'', r"'\''")
                ))
                .status();
            if let Err(e) = status {
                error!(identifier = %record.identifier, error = %e, "DNS teardown failed");
            }
        }

        for dir in self.tmp_dirs.drain(..) {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    warn!(path = %dir.display(), error = %e, "failed to remove temp dir");
                }
            }
        }

        if let Some(prev) = self.prev_umask.take() {
            #[cfg(unix)]
            unsafe {
                libc::umask(prev as libc::mode_t);
            }
            #[cfg(not(unix))]
            let _ = prev;
        }
    }
}

impl Drop for CleanupInner {
    fn drop(&mut self) {
        self.run_sync();
    }
}

/// Shared registry of everything a run must release: temp dirs, live
/// DNS records, the saved process umask. Cleanup is idempotent and
/// never fails louder than a log line.
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    inner: Arc<Mutex<CleanupInner>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tighten the process umask to 077, remembering the previous mask
    /// once.
    pub fn apply_umask(&self) {
        let mut inner = self.inner.lock().expect("cleanup lock");
        if inner.prev_umask.is_none() {
            #[cfg(unix)]
            {
                inner.prev_umask = Some(unsafe { libc::umask(0o077) } as u32);
            }
            #[cfg(not(unix))]
            {
                inner.prev_umask = Some(0);
            }
        }
    }

    pub fn register_tmp(&self, path: &Path) {
        let mut inner = self.inner.lock().expect("cleanup lock");
        if !inner.tmp_dirs.iter().any(|p| p == path) {
            inner.tmp_dirs.push(path.to_path_buf());
        }
    }

    pub fn register_dns(&self, identifier: &str, del_command: &str) {
        self.inner
            .lock()
            .expect("cleanup lock")
            .dns_records
            .push(LiveDnsRecord {
                identifier: identifier.to_string(),
                del_command: del_command.to_string(),
            });
    }

    /// Drop the registration after an orderly teardown already deleted
    /// the record.
    pub fn resolve_dns(&self, identifier: &str) {
        self.inner
            .lock()
            .expect("cleanup lock")
            .dns_records
            .retain(|r| r.identifier != identifier);
    }

    /// Release everything registered so far. Safe to call repeatedly;
    /// later registrations are picked up by later calls.
    pub async fn cleanup(&self) {
        // DNS teardown via the async hook runner; drain under the lock
        // first so a concurrent signal path cannot double-delete.
        let records: Vec<LiveDnsRecord> = {
            let mut inner = self.inner.lock().expect("cleanup lock");
            inner.dns_records.drain(..).collect()
        };
        for record in records {
            crate::hooks::run_dns_teardown(&record.del_command, &record.identifier).await;
        }

        self.inner.lock().expect("cleanup lock").run_sync();
    }
}
