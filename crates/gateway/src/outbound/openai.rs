//! OpenAI-compatible outbound transformer.
//!
//! Serves plain OpenAI channels and is the base the xAI and Bailian
//! outbounds delegate to. One transformer covers chat, embeddings and
//! rerank: the request type chosen at build time is stamped on the unified
//! request as `outbound_format_type` and read back to pick the response
//! decoder.

use async_trait::async_trait;
use config::ChannelConfig;
use futures::StreamExt;
use http::{Method, header};

use super::{OutboundTransformer, apply_credentials, stamp_format_type, stamped_format_type, url::normalize_base_url};
use crate::{
    credentials::CredentialProvider,
    error::{GatewayError, GatewayResult},
    messages::{
        jina, openai,
        unified::{RequestType, UnifiedRequest, UnifiedResponse, to_openai},
    },
    streams::{EventStream, UnifiedStream},
    transport::{ProviderRequest, ProviderResponse},
};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com";

pub(crate) struct OpenAiOutbound;

impl OpenAiOutbound {
    pub(crate) fn build_openai_request(
        &self,
        request: &mut UnifiedRequest,
        channel: &ChannelConfig,
    ) -> GatewayResult<ProviderRequest> {
        let base = normalize_base_url(
            channel.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_API_URL),
            channel.channel_type.api_version(),
        );

        let (path, format_type, body) = match request.request_type {
            RequestType::Chat | RequestType::Responses => {
                let wire = openai::ChatCompletionRequest::from(request.clone());
                ("/chat/completions", "chat", serialize(&wire)?)
            }
            RequestType::Embedding => {
                let payload = request
                    .embedding
                    .clone()
                    .ok_or_else(|| GatewayError::InvalidRequest("missing embedding payload".to_string()))?;

                let wire = openai::EmbeddingsRequest {
                    model: request.model.clone(),
                    input: openai::StringOrArray::Many(payload.input),
                    encoding_format: payload.encoding_format,
                    dimensions: payload.dimensions,
                };
                ("/embeddings", "embedding", serialize(&wire)?)
            }
            RequestType::Rerank => {
                let payload = request
                    .rerank
                    .clone()
                    .ok_or_else(|| GatewayError::InvalidRequest("missing rerank payload".to_string()))?;

                let wire = jina::RerankRequest {
                    model: request.model.clone(),
                    query: payload.query,
                    documents: payload.documents.into_iter().map(jina::RerankDocument::Text).collect(),
                    top_n: payload.top_n,
                    return_documents: Some(payload.return_documents),
                };
                ("/rerank", "rerank", serialize(&wire)?)
            }
        };

        stamp_format_type(request, format_type);

        let mut provider_request = ProviderRequest {
            method: Method::POST,
            url: format!("{base}{path}"),
            headers: http::HeaderMap::new(),
            body,
            stream: request.is_streaming() && matches!(request.request_type, RequestType::Chat | RequestType::Responses),
        };

        provider_request
            .headers
            .insert(header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"));

        Ok(provider_request)
    }
}

fn serialize<T: serde::Serialize>(wire: &T) -> GatewayResult<Vec<u8>> {
    sonic_rs::to_vec(wire).map_err(|error| GatewayError::Internal(format!("failed to serialize request: {error}")))
}

#[async_trait]
impl OutboundTransformer for OpenAiOutbound {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn build_request(
        &self,
        request: &mut UnifiedRequest,
        channel: &ChannelConfig,
        credentials: &dyn CredentialProvider,
    ) -> GatewayResult<ProviderRequest> {
        let mut provider_request = self.build_openai_request(request, channel)?;
        apply_credentials(&mut provider_request, channel, credentials).await?;
        Ok(provider_request)
    }

    fn parse_response(&self, request: &UnifiedRequest, response: &ProviderResponse) -> GatewayResult<UnifiedResponse> {
        parse_openai_response(request, response)
    }

    fn stream(&self, events: EventStream) -> UnifiedStream {
        openai_chunk_stream(events)
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        Ok(to_openai::aggregate_chunks(&chunks))
    }
}

pub(crate) fn parse_openai_response(
    request: &UnifiedRequest,
    response: &ProviderResponse,
) -> GatewayResult<UnifiedResponse> {
    let format_type = stamped_format_type(request).unwrap_or("chat");

    match format_type {
        "embedding" | "rerank" => {
            let payload: serde_json::Value = sonic_rs::from_slice(&response.body).map_err(|error| {
                GatewayError::Internal(format!("failed to parse upstream {format_type} response: {error}"))
            })?;

            let mut unified = UnifiedResponse::empty(request.model.clone());
            unified.payload = Some(payload);
            Ok(unified)
        }
        _ => {
            let wire: openai::ChatCompletionResponse = sonic_rs::from_slice(&response.body)
                .map_err(|error| GatewayError::Internal(format!("failed to parse upstream response: {error}")))?;

            Ok(UnifiedResponse::from(wire))
        }
    }
}

/// Decode OpenAI-style SSE data frames into unified chunks, ending with the
/// done sentinel when the upstream sends `[DONE]` or closes.
pub(crate) fn openai_chunk_stream(events: EventStream) -> UnifiedStream {
    events
        .filter_map(|event| async move {
            match event {
                Ok(event) => {
                    if event.data.as_ref() == b"[DONE]" {
                        return Some(Ok(UnifiedResponse::done()));
                    }

                    match sonic_rs::from_slice::<openai::ChatCompletionChunk>(&event.data) {
                        Ok(chunk) => Some(Ok(UnifiedResponse::from(chunk))),
                        Err(error) => {
                            log::warn!("failed to parse upstream stream chunk: {error}");
                            None
                        }
                    }
                }
                Err(error) => Some(Err(error)),
            }
        })
        .boxed()
}
