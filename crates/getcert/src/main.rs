use anyhow::Result;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Install the rustls crypto provider before any TLS work. Fallible
    // install avoids a panic when a provider is already present (tests
    // sharing a process).
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    Ok(getcert::cli::run().await)
}
