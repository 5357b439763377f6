//! Switchyard configuration structures to map the switchyard.toml configuration.

#![deny(missing_docs)]

mod channel;
mod credentials;
mod dump;
mod headers;
mod loader;
mod server;
mod watch;

use std::path::Path;

pub use channel::{ChannelConfig, ChannelType, StreamMode};
pub use credentials::CredentialsConfig;
pub use dump::DumpConfig;
pub use headers::HeaderNamesConfig;
use indexmap::IndexMap;
pub use server::ServerConfig;
use serde::Deserialize;
pub use watch::{WatchBackend, WatchConfig};

/// Root configuration for the switchyard gateway.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct Config {
    /// HTTP server settings for the gateway itself.
    #[serde(default)]
    pub server: ServerConfig,

    /// Names of the optional inbound correlation headers.
    #[serde(default)]
    pub headers: HeaderNamesConfig,

    /// Debug dumper settings.
    #[serde(default)]
    pub dump: DumpConfig,

    /// Configuration change fan-out settings.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Named credential sets referenced by channels.
    #[serde(default)]
    pub credentials: IndexMap<String, CredentialsConfig>,

    /// Upstream provider channels, keyed by channel id.
    #[serde(default)]
    pub channels: IndexMap<String, ChannelConfig>,
}

impl Config {
    /// Load the configuration from a TOML file and validate it.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Whether any channel is configured.
    pub fn has_channels(&self) -> bool {
        !self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::{ChannelType, Config, StreamMode};

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.server.listen_address, None);
        assert_eq!(config.headers.trace_id, "AH-Trace-Id");
        assert_eq!(config.headers.thread_id, "AH-Thread-Id");
        assert_eq!(config.headers.request_id, "AH-Request-Id");
        assert!(!config.dump.enabled);
        assert!(config.channels.is_empty());
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn channel_with_credentials() {
        let config: Config = toml::from_str(indoc! {r#"
            [credentials.main]
            type = "static"
            api_key = "sk-test"

            [channels.openai-primary]
            type = "openai"
            base_url = "https://api.openai.com"
            credentials = "main"
            models = ["gpt-4", "gpt-4o"]
            tags = ["prod"]
            order = 1
        "#})
        .unwrap();

        let channel = &config.channels["openai-primary"];
        assert_eq!(channel.channel_type, ChannelType::OpenAi);
        assert_eq!(channel.base_url.as_deref(), Some("https://api.openai.com"));
        assert_eq!(channel.credentials.as_deref(), Some("main"));
        assert_eq!(channel.models, vec!["gpt-4", "gpt-4o"]);
        assert_eq!(channel.tags, vec!["prod"]);
        assert_eq!(channel.order, 1);
        assert_eq!(channel.stream_mode, StreamMode::Auto);
    }

    #[test]
    fn vertex_channel_requires_project_fields_to_parse() {
        let config: Config = toml::from_str(indoc! {r#"
            [channels.claude-vertex]
            type = "anthropic_gcp"
            credentials = "gcp"
            models = ["claude-sonnet-4"]
            project_id = "my-project"
            region = "europe-west1"
        "#})
        .unwrap();

        let channel = &config.channels["claude-vertex"];
        assert_eq!(channel.channel_type, ChannelType::AnthropicGcp);
        assert_eq!(channel.project_id.as_deref(), Some("my-project"));
        assert_eq!(channel.region.as_deref(), Some("europe-west1"));
    }
}
