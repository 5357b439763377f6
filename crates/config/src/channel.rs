//! Upstream channel configuration.

use serde::Deserialize;

/// One configured upstream provider endpoint.
///
/// A channel pairs a provider dialect (the `type`) with a base URL, a
/// credential reference and the list of models it serves. The gateway's
/// channel selector routes a request to the ordered set of channels whose
/// `models` contain the requested model.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct ChannelConfig {
    /// Provider family this channel speaks.
    #[serde(rename = "type")]
    pub channel_type: ChannelType,

    /// Base URL of the upstream endpoint.
    ///
    /// A trailing `#` marks the URL as raw: the provider's API version
    /// segment is not appended. Optional for channel types with fixed hosts
    /// (Bedrock, Vertex).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Name of the credential set in `[credentials.<name>]` to use.
    #[serde(default)]
    pub credentials: Option<String>,

    /// Models served by this channel. A request is only routed here when its
    /// model is in this list.
    pub models: Vec<String>,

    /// Free-form routing tags intersected with the request's tag filter.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Selection order. Lower values are tried first; ties break on channel id.
    #[serde(default)]
    pub order: i64,

    /// How the channel handles streaming relative to the client.
    #[serde(default)]
    pub stream_mode: StreamMode,

    /// GCP project id. Required for `anthropic_gcp` and `gemini_vertex`.
    #[serde(default)]
    pub project_id: Option<String>,

    /// Provider region. Required for `anthropic_aws`, `anthropic_gcp` and
    /// `gemini_vertex`.
    #[serde(default)]
    pub region: Option<String>,
}

/// Provider families the gateway can dispatch to.
///
/// The channel type selects the outbound transformer and determines which
/// native tool capabilities the channel admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Any OpenAI-compatible endpoint.
    OpenAi,
    /// xAI's OpenAI-compatible endpoint, with per-model parameter quirks.
    Xai,
    /// Alibaba Bailian's OpenAI-compatible endpoint, with stream quirks.
    Bailian,
    /// Native Anthropic Messages API.
    Anthropic,
    /// Anthropic models served through AWS Bedrock.
    AnthropicAws,
    /// Anthropic models served through GCP Vertex.
    AnthropicGcp,
    /// Google Gemini generateContent API.
    Gemini,
    /// Gemini served through GCP Vertex.
    GeminiVertex,
}

impl ChannelType {
    /// Whether channels of this type accept Google-native tools such as
    /// `google_search`.
    pub fn supports_google_native_tools(self) -> bool {
        matches!(self, Self::Gemini | Self::GeminiVertex)
    }

    /// Whether channels of this type accept Anthropic-native tools such as
    /// `web_search`.
    pub fn supports_anthropic_native_tools(self) -> bool {
        matches!(self, Self::Anthropic | Self::AnthropicAws | Self::AnthropicGcp)
    }

    /// The fixed API version segment appended during base URL normalization.
    pub fn api_version(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Xai | Self::Anthropic => "v1",
            Self::Bailian => "compatible-mode/v1",
            Self::AnthropicAws | Self::AnthropicGcp | Self::GeminiVertex => "v1",
            Self::Gemini => "v1beta",
        }
    }

    /// Stable identifier used in logs and trace records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Xai => "xai",
            Self::Bailian => "bailian",
            Self::Anthropic => "anthropic",
            Self::AnthropicAws => "anthropic_aws",
            Self::AnthropicGcp => "anthropic_gcp",
            Self::Gemini => "gemini",
            Self::GeminiVertex => "gemini_vertex",
        }
    }
}

/// Streaming posture of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Follow the client: stream upstream when the client streams.
    #[default]
    Auto,
    /// The upstream only supports streaming; non-streaming client requests
    /// are aggregated from the upstream stream.
    Always,
    /// The upstream does not stream; streaming client requests are satisfied
    /// from a synthesized single-chunk stream.
    Never,
}
