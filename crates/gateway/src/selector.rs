//! Channel selection.
//!
//! Given a unified request, the selector produces the ordered list of attempt
//! candidates the orchestrator will try. Candidate order is deterministic:
//! channel `order` ascending, then channel id.

use std::sync::{Arc, RwLock};

use config::ChannelConfig;
use itertools::Itertools;

use crate::{
    credentials::{CredentialProvider, CredentialStore},
    error::{GatewayError, GatewayResult},
    messages::unified::UnifiedRequest,
};

/// One (channel, credentials) pair the orchestrator may try.
#[derive(Clone)]
pub struct AttemptCandidate {
    pub channel_id: String,
    pub channel: ChannelConfig,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for AttemptCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptCandidate")
            .field("channel_id", &self.channel_id)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Context of one running attempt, handed to middleware and sinks.
#[derive(Clone)]
pub struct AttemptContext {
    pub channel_id: String,
    pub channel: ChannelConfig,
    pub credentials: Arc<dyn CredentialProvider>,
    pub attempt_index: usize,
    pub request_id: String,
    pub started_at: jiff::Timestamp,
}

pub trait ChannelSelector: Send + Sync {
    /// Ordered, non-empty candidate list for this request.
    ///
    /// Returns `InvalidModel` when no configured channel can serve it.
    fn candidates(&self, request: &UnifiedRequest) -> GatewayResult<Vec<AttemptCandidate>>;
}

/// Selector over the configured channel inventory.
///
/// The channel snapshot swaps atomically on configuration change; in-flight
/// requests keep the snapshot they started with.
pub(crate) struct ConfigSelector {
    channels: RwLock<Arc<Vec<(String, ChannelConfig)>>>,
    credentials: Arc<CredentialStore>,
}

impl ConfigSelector {
    pub fn new(
        channels: &indexmap::IndexMap<String, ChannelConfig>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            channels: RwLock::new(Arc::new(snapshot(channels))),
            credentials,
        }
    }

    /// Replace the channel inventory.
    pub fn swap_channels(&self, channels: &indexmap::IndexMap<String, ChannelConfig>) {
        let next = Arc::new(snapshot(channels));
        if let Ok(mut guard) = self.channels.write() {
            *guard = next;
        }
    }

    /// Every model any channel serves, for the model listing endpoint.
    pub fn all_models(&self) -> Vec<String> {
        let channels = self.channels.read().map(|guard| guard.clone()).unwrap_or_default();

        channels
            .iter()
            .flat_map(|(_, channel)| channel.models.iter().cloned())
            .unique()
            .sorted()
            .collect()
    }
}

fn snapshot(channels: &indexmap::IndexMap<String, ChannelConfig>) -> Vec<(String, ChannelConfig)> {
    channels
        .iter()
        .map(|(id, channel)| (id.clone(), channel.clone()))
        .collect()
}

fn admits_tools(channel: &ChannelConfig, request: &UnifiedRequest) -> bool {
    if request.has_google_native_tools() && !channel.channel_type.supports_google_native_tools() {
        return false;
    }

    if request.has_anthropic_native_tools() && !channel.channel_type.supports_anthropic_native_tools() {
        return false;
    }

    true
}

fn admits_tags(channel: &ChannelConfig, request: &UnifiedRequest) -> bool {
    if request.tags.is_empty() {
        return true;
    }

    request.tags.iter().any(|tag| channel.tags.contains(tag))
}

impl ChannelSelector for ConfigSelector {
    fn candidates(&self, request: &UnifiedRequest) -> GatewayResult<Vec<AttemptCandidate>> {
        let channels = self
            .channels
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| GatewayError::Internal("channel snapshot lock poisoned".to_string()))?;

        let mut candidates = Vec::new();

        for (id, channel) in channels
            .iter()
            .filter(|(_, channel)| channel.models.iter().any(|model| model == &request.model))
            .filter(|(_, channel)| admits_tools(channel, request))
            .filter(|(_, channel)| admits_tags(channel, request))
            .sorted_by(|(a_id, a), (b_id, b)| a.order.cmp(&b.order).then_with(|| a_id.cmp(b_id)))
        {
            candidates.push(AttemptCandidate {
                channel_id: id.clone(),
                channel: channel.clone(),
                credentials: self.credentials.for_channel(channel)?,
            });
        }

        if candidates.is_empty() {
            return Err(GatewayError::InvalidModel(request.model.clone()));
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;
    use crate::messages::unified::{ApiFormat, RequestType, UnifiedTool};

    fn selector(toml: &str) -> ConfigSelector {
        let channels: indexmap::IndexMap<String, ChannelConfig> = toml::from_str(toml).unwrap();
        let store = Arc::new(CredentialStore::from_config(&indexmap::IndexMap::new()).unwrap());
        ConfigSelector::new(&channels, store)
    }

    fn request(model: &str) -> UnifiedRequest {
        UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, model)
    }

    #[test]
    fn orders_by_order_then_id() {
        let selector = selector(indoc! {r#"
            [beta]
            type = "openai"
            models = ["gpt-4o"]
            order = 1

            [alpha]
            type = "openai"
            models = ["gpt-4o"]
            order = 1

            [fallback]
            type = "openai"
            models = ["gpt-4o"]
            order = 9
        "#});

        let candidates = selector.candidates(&request("gpt-4o")).unwrap();
        let ids: Vec<_> = candidates.iter().map(|candidate| candidate.channel_id.as_str()).collect();

        assert_eq!(ids, vec!["alpha", "beta", "fallback"]);
    }

    #[test]
    fn unknown_model_is_invalid_model() {
        let selector = selector(indoc! {r#"
            [openai]
            type = "openai"
            models = ["gpt-4o"]
        "#});

        let error = selector.candidates(&request("grok-4")).unwrap_err();
        assert!(matches!(error, GatewayError::InvalidModel(model) if model == "grok-4"));
    }

    #[test]
    fn google_native_tools_never_route_to_openai_channels() {
        let selector = selector(indoc! {r#"
            [openai]
            type = "openai"
            models = ["gpt-4o"]
        "#});

        let mut request = request("gpt-4o");
        request.tools = Some(vec![UnifiedTool::GoogleNative {
            name: "google_search".to_string(),
            config: json!({}),
        }]);

        let error = selector.candidates(&request).unwrap_err();
        assert!(matches!(error, GatewayError::InvalidModel(_)));
    }

    #[test]
    fn google_native_tools_route_to_gemini_channels() {
        let selector = selector(indoc! {r#"
            [gemini]
            type = "gemini"
            models = ["gemini-2.0-flash"]
        "#});

        let mut request = request("gemini-2.0-flash");
        request.tools = Some(vec![UnifiedTool::GoogleNative {
            name: "google_search".to_string(),
            config: json!({}),
        }]);

        let candidates = selector.candidates(&request).unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn request_tags_intersect_channel_tags() {
        let selector = selector(indoc! {r#"
            [eu]
            type = "openai"
            models = ["gpt-4o"]
            tags = ["eu"]

            [us]
            type = "openai"
            models = ["gpt-4o"]
            tags = ["us"]
        "#});

        let mut tagged = request("gpt-4o");
        tagged.tags = vec!["eu".to_string()];

        let candidates = selector.candidates(&tagged).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].channel_id, "eu");

        // No tag filter sees everything.
        let candidates = selector.candidates(&request("gpt-4o")).unwrap();
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn swap_channels_replaces_the_snapshot() {
        let selector = selector(indoc! {r#"
            [openai]
            type = "openai"
            models = ["gpt-4o"]
        "#});

        let replacement: indexmap::IndexMap<String, ChannelConfig> = toml::from_str(indoc! {r#"
            [claude]
            type = "anthropic"
            models = ["claude-sonnet-4"]
        "#})
        .unwrap();

        selector.swap_channels(&replacement);

        assert!(selector.candidates(&request("gpt-4o")).is_err());
        assert!(selector.candidates(&request("claude-sonnet-4")).is_ok());
    }
}
