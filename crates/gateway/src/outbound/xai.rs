//! xAI outbound transformer.
//!
//! OpenAI-compatible, with per-model parameter restrictions: grok-4 accepts
//! no reasoning effort, penalties or stop sequences; grok-3 and grok-3-mini
//! accept no penalties or stop sequences. The stream additionally drops
//! chunks that carry no meaningful delta.

use async_trait::async_trait;
use config::ChannelConfig;
use futures::StreamExt;

use super::{OutboundTransformer, apply_credentials, openai::OpenAiOutbound};
use crate::{
    credentials::CredentialProvider,
    error::GatewayResult,
    messages::unified::{UnifiedRequest, UnifiedResponse, to_openai},
    streams::{EventStream, UnifiedStream},
    transport::{ProviderRequest, ProviderResponse},
};

pub(crate) struct XaiOutbound;

fn strip_unsupported_parameters(request: &mut UnifiedRequest) {
    let model = request.model.as_str();

    if model.starts_with("grok-4") {
        request.reasoning_effort = None;
        request.presence_penalty = None;
        request.frequency_penalty = None;
        request.stop = None;
    } else if model.starts_with("grok-3") {
        request.presence_penalty = None;
        request.frequency_penalty = None;
        request.stop = None;
    }
}

#[async_trait]
impl OutboundTransformer for XaiOutbound {
    fn name(&self) -> &'static str {
        "xai"
    }

    async fn build_request(
        &self,
        request: &mut UnifiedRequest,
        channel: &ChannelConfig,
        credentials: &dyn CredentialProvider,
    ) -> GatewayResult<ProviderRequest> {
        strip_unsupported_parameters(request);

        let mut provider_request = OpenAiOutbound.build_openai_request(request, channel)?;
        apply_credentials(&mut provider_request, channel, credentials).await?;
        Ok(provider_request)
    }

    fn parse_response(&self, request: &UnifiedRequest, response: &ProviderResponse) -> GatewayResult<UnifiedResponse> {
        super::openai::parse_openai_response(request, response)
    }

    fn stream(&self, events: EventStream) -> UnifiedStream {
        super::openai::openai_chunk_stream(events)
            .filter(|chunk| {
                let keep = match chunk {
                    Ok(chunk) => chunk.has_meaningful_delta(),
                    Err(_) => true,
                };
                async move { keep }
            })
            .boxed()
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        Ok(to_openai::aggregate_chunks(&chunks))
    }
}
