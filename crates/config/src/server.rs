//! Gateway HTTP server settings.

use std::net::SocketAddr;

use serde::Deserialize;

fn default_request_timeout() -> u64 {
    300
}

fn default_llm_request_timeout() -> u64 {
    270
}

/// HTTP server settings for the gateway itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct ServerConfig {
    /// Address the gateway listens on. Defaults to `127.0.0.1:8034` when
    /// neither the config nor the CLI provide one.
    #[serde(default)]
    pub listen_address: Option<SocketAddr>,

    /// Total wall-clock budget for one inbound request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Budget for a single upstream attempt, in seconds. Also bounds detached
    /// streams that outlive the inbound connection during shutdown.
    #[serde(default = "default_llm_request_timeout")]
    pub llm_request_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            request_timeout: default_request_timeout(),
            llm_request_timeout: default_llm_request_timeout(),
        }
    }
}
