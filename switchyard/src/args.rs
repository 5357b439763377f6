use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// The switchyard LLM gateway.
#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "SWITCHYARD_CONFIG", default_value = "switchyard.toml")]
    pub config: PathBuf,

    /// Listen address, overriding the configuration file.
    #[arg(short, long, env = "SWITCHYARD_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log level filter (error, warn, info, debug, trace).
    #[arg(long, env = "SWITCHYARD_LOG", default_value = "info")]
    pub log_filter: log::LevelFilter,
}
