//! `aigw` entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use aigw_cli::{Cli, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    run(cli).await
}
