//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// aigw - image generation gateway.
#[derive(Debug, Parser)]
#[command(name = "aigw", version, about)]
pub struct Cli {
    /// JSON settings file; defaults apply when omitted.
    #[arg(long, env = "AIGW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, overriding `server.host`.
    #[arg(long, env = "AIGW_HOST")]
    pub host: Option<String>,

    /// Listen port, overriding `server.port`.
    #[arg(long, env = "AIGW_PORT")]
    pub port: Option<u16>,
}
