//! Command line surface and top-level run dispatch.

use crate::config::{self, Config};
use crate::lifecycle::{self, RunOutcome};
use crate::session::CleanupRegistry;
use crate::{probe, session};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;

#[derive(Debug, Parser)]
#[command(name = "getcert")]
#[command(about = "Obtain and renew X.509 certificates from an ACME v1 CA")]
#[command(long_about = "Obtain and renew X.509 certificates from an ACME v1 CA.\n\n\
    NOTE: the default CA is the Let's Encrypt STAGING environment, which\n\
    issues certificates browsers do not trust. Set CA in getssl.cfg to the\n\
    production URL once the configuration works.")]
pub struct Cli {
    /// Verbose debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Create default configuration files and exit
    #[arg(short = 'c', long)]
    pub create: bool,

    /// Renew even when the certificate is not yet due
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Process every domain directory in the working dir
    #[arg(short = 'a', long)]
    pub all: bool,

    /// Only log errors
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Working directory holding account key and per-domain state
    #[arg(short = 'w', long = "working-dir")]
    pub working_dir: Option<PathBuf>,

    /// Primary domain to obtain a certificate for
    pub domain: Option<String>,
}

impl Cli {
    fn resolve_working_dir(&self) -> PathBuf {
        if let Some(dir) = &self.working_dir {
            return dir.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".getcert"),
            None => PathBuf::from(".getcert"),
        }
    }
}

fn init_tracing(debug: bool, quiet: bool) {
    let default_filter = if quiet {
        "error"
    } else if debug {
        "debug,hickory_resolver=info,rustls=info"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Parse arguments, run, clean up on every exit path.
pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.quiet);

    // Mode compatibility is checked before any filesystem work.
    if cli.all && cli.create {
        error!("--all cannot be combined with --create");
        return ExitCode::from(EXIT_ERROR);
    }
    if cli.all && cli.force {
        error!("--all cannot be combined with --force");
        return ExitCode::from(EXIT_ERROR);
    }
    if !cli.all && cli.domain.is_none() {
        error!("a domain is required unless --all is given");
        return ExitCode::from(EXIT_ERROR);
    }

    let work_dir = cli.resolve_working_dir();
    let cleanup = CleanupRegistry::new();
    cleanup.apply_umask();

    let code = tokio::select! {
        code = execute(&cli, &work_dir, &cleanup) => code,
        code = wait_for_signal() => code,
    };

    cleanup.cleanup().await;
    ExitCode::from(code)
}

/// SIGINT is a fatal abort; SIGTERM and SIGHUP are graceful stops.
/// All of them run the cleanup in [`run`].
async fn wait_for_signal() -> u8 {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return EXIT_ERROR;
            }
        };
        let mut hup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGHUP handler");
                return EXIT_ERROR;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cleaning up");
                EXIT_ERROR
            }
            _ = term.recv() => {
                info!("terminated, cleaning up");
                EXIT_SUCCESS
            }
            _ = hup.recv() => {
                info!("hangup, cleaning up");
                EXIT_SUCCESS
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        warn!("interrupted, cleaning up");
        EXIT_ERROR
    }
}

async fn execute(cli: &Cli, work_dir: &std::path::Path, cleanup: &CleanupRegistry) -> u8 {
    if cli.create {
        let domain = cli.domain.as_deref().expect("checked above");
        return match create_configs(work_dir, domain).await {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                error!(error = %e, "failed to create configuration");
                EXIT_ERROR
            }
        };
    }

    if cli.all {
        return match lifecycle::run_all(work_dir, cleanup).await {
            Ok(0) => EXIT_SUCCESS,
            Ok(failures) => {
                error!(failures, "some domains failed");
                EXIT_ERROR
            }
            Err(e) => {
                error!(error = %e, "all-domains run failed");
                EXIT_ERROR
            }
        };
    }

    let domain = cli.domain.as_deref().expect("checked above");
    let config = match Config::load(work_dir, domain) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            return EXIT_ERROR;
        }
    };

    match lifecycle::run(&config, work_dir, domain, cli.force, cleanup).await {
        Ok(RunOutcome::UpToDate) => {
            info!(domain, "certificate is up to date");
            EXIT_SUCCESS
        }
        Ok(RunOutcome::Repaired) => {
            info!(domain, "deployment repaired");
            EXIT_SUCCESS
        }
        Ok(RunOutcome::Issued) => EXIT_SUCCESS,
        Err(e) => {
            error!(domain, error = %e, "run failed");
            EXIT_ERROR
        }
    }
}

/// `-c`: materialize the config templates, seeding `SANS` from the
/// certificate the domain currently serves when reachable.
async fn create_configs(work_dir: &std::path::Path, domain: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(work_dir)?;

    if config::write_global_template(work_dir)? {
        info!(path = %work_dir.join(config::CONFIG_FILE_NAME).display(), "global config created");
    }

    let seeded = match probe::fetch_remote_leaf(domain, 443).await {
        Ok(info) => {
            info!(domain, sans = ?info.sans, "seeding SANS from served certificate");
            info.sans
        }
        Err(e) => {
            warn!(domain, error = %e, "no served certificate to seed SANS from");
            Vec::new()
        }
    };

    if config::write_domain_template(work_dir, domain, &seeded)? {
        info!(domain, "domain config created");
    }

    // Make sure the domain directory skeleton exists for the first run.
    session::Workspace::new(work_dir, domain).ensure_layout()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_all_flags() {
        let cli = Cli::try_parse_from([
            "getcert", "-d", "-f", "-q", "-w", "/tmp/ws", "example.com",
        ])
        .unwrap();
        assert!(cli.debug);
        assert!(cli.force);
        assert!(cli.quiet);
        assert_eq!(cli.working_dir, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cli.domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn domain_is_optional_for_parsing() {
        let cli = Cli::try_parse_from(["getcert", "-a"]).unwrap();
        assert!(cli.all);
        assert!(cli.domain.is_none());
    }

    #[test]
    fn long_flags_work() {
        let cli = Cli::try_parse_from([
            "getcert",
            "--create",
            "--working-dir",
            "/srv/acme",
            "example.com",
        ])
        .unwrap();
        assert!(cli.create);
        assert_eq!(cli.working_dir, Some(PathBuf::from("/srv/acme")));
    }

    #[test]
    fn help_mentions_staging() {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        let help = cmd.render_long_help().to_string();
        assert!(help.contains("STAGING"));
    }
}
