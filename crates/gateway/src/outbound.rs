//! Outbound transformers: the provider-facing half of each dialect adapter.
//!
//! An outbound transformer builds the provider HTTP request from a unified
//! request (URL, headers, body), parses provider responses and streams back
//! into the unified model, and owns its channel family's quirks (xAI field
//! stripping, the Bailian stream filter, Bedrock's event framing).

pub(crate) mod anthropic;
pub(crate) mod bailian;
pub(crate) mod bedrock;
pub(crate) mod gemini;
pub(crate) mod openai;
pub(crate) mod url;
pub(crate) mod xai;

use async_trait::async_trait;
use config::{ChannelConfig, ChannelType};

use crate::{
    credentials::CredentialProvider,
    error::GatewayResult,
    messages::unified::{UnifiedRequest, UnifiedResponse},
    streams::{EventStream, UnifiedStream},
    transport::{ProviderRequest, ProviderResponse},
};

/// Metadata key carrying the request-type routing hint from the request
/// build to the response decode of the same attempt.
pub(crate) const OUTBOUND_FORMAT_TYPE_KEY: &str = "outbound_format_type";

#[async_trait]
pub(crate) trait OutboundTransformer: Send + Sync {
    /// Name used in logs and trace records.
    fn name(&self) -> &'static str;

    /// Build the provider HTTP request. May stamp routing metadata on the
    /// unified request for `parse_response` to read.
    async fn build_request(
        &self,
        request: &mut UnifiedRequest,
        channel: &ChannelConfig,
        credentials: &dyn CredentialProvider,
    ) -> GatewayResult<ProviderRequest>;

    /// Parse a successful provider response into a unified response.
    fn parse_response(&self, request: &UnifiedRequest, response: &ProviderResponse) -> GatewayResult<UnifiedResponse>;

    /// Lift a provider event stream into unified chunks.
    ///
    /// Implementations must preserve event order and end with the
    /// [`UnifiedResponse::done`] sentinel.
    fn stream(&self, events: EventStream) -> UnifiedStream;

    /// Collapse an ordered chunk list into a complete unified response.
    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse>;
}

static OPENAI: openai::OpenAiOutbound = openai::OpenAiOutbound;
static XAI: xai::XaiOutbound = xai::XaiOutbound;
static BAILIAN: bailian::BailianOutbound = bailian::BailianOutbound;
static ANTHROPIC: anthropic::AnthropicOutbound = anthropic::AnthropicOutbound;
static ANTHROPIC_GCP: anthropic::AnthropicVertexOutbound = anthropic::AnthropicVertexOutbound;
static BEDROCK: bedrock::BedrockOutbound = bedrock::BedrockOutbound;
static GEMINI: gemini::GeminiOutbound = gemini::GeminiOutbound { vertex: false };
static GEMINI_VERTEX: gemini::GeminiOutbound = gemini::GeminiOutbound { vertex: true };

/// The outbound transformer for a channel type.
pub(crate) fn for_channel(channel_type: ChannelType) -> &'static dyn OutboundTransformer {
    match channel_type {
        ChannelType::OpenAi => &OPENAI,
        ChannelType::Xai => &XAI,
        ChannelType::Bailian => &BAILIAN,
        ChannelType::Anthropic => &ANTHROPIC,
        ChannelType::AnthropicAws => &BEDROCK,
        ChannelType::AnthropicGcp => &ANTHROPIC_GCP,
        ChannelType::Gemini => &GEMINI,
        ChannelType::GeminiVertex => &GEMINI_VERTEX,
    }
}

/// Attach credential headers and, where applicable, sign the finished
/// request. Signing runs last so every header participates.
pub(crate) async fn apply_credentials(
    request: &mut ProviderRequest,
    channel: &ChannelConfig,
    credentials: &dyn CredentialProvider,
) -> GatewayResult<()> {
    let material = credentials.headers_for(channel).await?;

    for (name, value) in material.headers.iter() {
        request.headers.insert(name.clone(), value.clone());
    }

    credentials.sign(request, channel)
}

/// Record the routing hint on the unified request.
pub(crate) fn stamp_format_type(request: &mut UnifiedRequest, format_type: &str) {
    request.transformer_metadata.insert(
        OUTBOUND_FORMAT_TYPE_KEY.to_string(),
        serde_json::Value::String(format_type.to_string()),
    );
}

/// Read back the routing hint stamped at build time.
pub(crate) fn stamped_format_type(request: &UnifiedRequest) -> Option<&str> {
    request
        .transformer_metadata
        .get(OUTBOUND_FORMAT_TYPE_KEY)
        .and_then(serde_json::Value::as_str)
}
