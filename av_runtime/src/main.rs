// av_runtime/src/main.rs

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use av_runtime::cli::Cli;
use av_runtime::settings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = settings::load(cli.config.as_deref())?;
    av_runtime::run(config, cli.duration).await
}
