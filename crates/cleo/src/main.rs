use anyhow::{Context, Result};
use clap::Parser;
use cleo_config::paths::ProjectPaths;
use cleo_core::envelope::{DispatchRequest, Source};
use cleo_dispatch::{dispatch_with_retries, Dispatcher, RetryPolicy};

mod cli;
mod mcp_server;
mod output;

use cli::{Cli, Commands, RequestParts};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = std::env::current_dir().context("Failed to resolve working directory")?;
    let paths = ProjectPaths::resolve(&root);

    init_tracing(&paths);

    let dispatcher = Dispatcher::open(paths).context("Failed to open project store")?;

    let parts: RequestParts = match cli.command {
        Commands::Mcp => {
            mcp_server::run(dispatcher).await?;
            return Ok(());
        }
        Commands::Tasks { cmd } => cmd.into_parts(),
        Commands::Session { cmd } => cmd.into_parts(),
        Commands::Memory { cmd } => cmd.into_parts(),
        Commands::Check { cmd } => cmd.into_parts(),
        Commands::Pipeline { cmd } => cmd.into_parts(),
        Commands::Orchestrate { cmd } => cmd.into_parts(),
        Commands::Tools { cmd } => cmd.into_parts(),
        Commands::Admin { cmd } => cmd.into_parts(),
    };

    let request = DispatchRequest::new(
        parts.gateway,
        parts.domain,
        parts.operation,
        parts.params,
        Source::Cli,
    );

    let response = dispatch_with_retries(&dispatcher, request, &RetryPolicy::default()).await;

    let format = output::resolve_format(cli.json, cli.human);
    let exit_code = output::render(&response, format);
    std::process::exit(exit_code);
}

/// Tracing to stderr. `CLEO_DEBUG` forces debug; otherwise `RUST_LOG`
/// wins, then the configured level.
fn init_tracing(paths: &ProjectPaths) {
    let default_level = if cleo_config::paths::debug_enabled() {
        "debug".to_string()
    } else {
        cleo_config::Config::load(&paths.config_file())
            .map(|c| c.logging.level.as_filter().to_string())
            .unwrap_or_else(|_| "info".to_string())
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .ok();
}
