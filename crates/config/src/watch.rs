//! Configuration change fan-out settings.

use serde::Deserialize;
use url::Url;

fn default_redis_channel() -> String {
    "switchyard:config".to_string()
}

/// Which pub/sub backend distributes configuration change events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchBackend {
    /// In-process fan-out with per-subscriber mailboxes.
    #[default]
    Memory,
    /// Redis pub/sub, multiplexing one subscription across local subscribers.
    Redis,
}

/// Configuration change fan-out settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct WatchConfig {
    /// Selected backend.
    #[serde(default)]
    pub backend: WatchBackend,

    /// Redis connection URL. Required when the backend is `redis`.
    #[serde(default)]
    pub url: Option<Url>,

    /// Redis pub/sub channel name.
    #[serde(default = "default_redis_channel")]
    pub channel: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backend: WatchBackend::default(),
            url: None,
            channel: default_redis_channel(),
        }
    }
}
