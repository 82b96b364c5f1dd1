//! taleweaver CLI entrypoint

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use taleweaver::cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr; stdout carries the JSON envelope
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Parse and execute CLI; a reported failure exits non-zero after cleanup
    let cli = Cli::parse();
    Ok(cli.execute().await?.into())
}
