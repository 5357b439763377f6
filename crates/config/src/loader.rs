//! Configuration loading and validation.

use std::path::Path;

use anyhow::{Context as _, bail};
use indoc::indoc;

use crate::{ChannelType, Config, WatchBackend};

pub(crate) fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let config: Config = toml::from_str(&content)?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> anyhow::Result<()> {
    if config.channels.is_empty() {
        bail!(indoc! {r#"
            No channels configured. Switchyard requires at least one upstream channel to function.

            Example configuration:

              [credentials.main]
              type = "static"
              api_key = "sk-..."

              [channels.openai]
              type = "openai"
              base_url = "https://api.openai.com"
              credentials = "main"
              models = ["gpt-4o"]
        "#});
    }

    for (id, channel) in &config.channels {
        if channel.models.is_empty() {
            bail!("channel '{id}' has an empty model list");
        }

        if let Some(credentials) = &channel.credentials
            && !config.credentials.contains_key(credentials)
        {
            bail!("channel '{id}' references unknown credentials '{credentials}'");
        }

        match channel.channel_type {
            ChannelType::AnthropicGcp | ChannelType::GeminiVertex => {
                if channel.project_id.is_none() {
                    bail!("channel '{id}' requires a project_id");
                }
                if channel.region.is_none() {
                    bail!("channel '{id}' requires a region");
                }
            }
            ChannelType::AnthropicAws => {
                if channel.region.is_none() {
                    bail!("channel '{id}' requires a region");
                }
            }
            _ => {}
        }
    }

    if config.watch.backend == WatchBackend::Redis && config.watch.url.is_none() {
        bail!("watch backend 'redis' requires a url");
    }

    Ok(())
}
