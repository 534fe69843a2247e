use anyhow::Result;
use bizsync::cli::{Cli, CliState};
use clap::Parser;
use std::env;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize CLI state (loads config and persistence)
    let state = CliState::initialize(cli.config.as_deref())?;

    // Initialize logging based on config
    let default_directive = format!("bizsync={}", state.config.logging.level.to_lowercase());
    let env_override = env::var("RUST_LOG").unwrap_or_default();
    let combined_filter = if env_override.trim().is_empty() {
        default_directive.clone()
    } else if env_override.contains("bizsync") {
        env_override
    } else {
        format!("{},{}", env_override, default_directive)
    };

    tracing_subscriber::fmt()
        .with_env_filter(combined_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    // Ctrl-C stops a sync between records instead of killing it mid-write
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; cancelling");
            on_signal.cancel();
        }
    });

    let result = state.run(cli.command, cancel).await;
    state.persistence.checkpoint()?;
    result
}
