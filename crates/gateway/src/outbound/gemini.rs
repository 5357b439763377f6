//! Gemini outbound transformer, covering both the generative language API
//! and Vertex.
//!
//! The model and action live in the URL path; streaming requests ask for
//! SSE framing via `alt=sse`.

use async_trait::async_trait;
use config::ChannelConfig;
use futures::StreamExt;
use http::{HeaderValue, Method, header};
use serde_json::json;

use super::{OutboundTransformer, apply_credentials, stamp_format_type, stamped_format_type, url::normalize_base_url};
use crate::{
    credentials::CredentialProvider,
    error::{GatewayError, GatewayResult},
    messages::{
        gemini, openai,
        unified::{RequestType, UnifiedRequest, UnifiedResponse, Usage, from_gemini, to_openai},
    },
    streams::{self, EventStream, UnifiedStream},
    transport::{ProviderRequest, ProviderResponse},
};

const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";

pub(crate) struct GeminiOutbound {
    pub vertex: bool,
}

impl GeminiOutbound {
    fn endpoint(&self, request: &UnifiedRequest, channel: &ChannelConfig, action: &str) -> GatewayResult<String> {
        if !self.vertex {
            let base = normalize_base_url(
                channel.base_url.as_deref().unwrap_or(DEFAULT_GEMINI_API_URL),
                channel.channel_type.api_version(),
            );

            return Ok(format!("{base}/models/{model}:{action}", model = request.model));
        }

        let project = channel
            .project_id
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("vertex channel is missing a project_id".to_string()))?;
        let region = channel
            .region
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("vertex channel is missing a region".to_string()))?;

        let host = match channel.base_url.as_deref() {
            Some(base) => normalize_base_url(base, channel.channel_type.api_version()),
            None => format!("https://{region}-aiplatform.googleapis.com/v1"),
        };

        Ok(format!(
            "{host}/projects/{project}/locations/{region}/publishers/google/models/{model}:{action}",
            model = request.model
        ))
    }
}

#[async_trait]
impl OutboundTransformer for GeminiOutbound {
    fn name(&self) -> &'static str {
        if self.vertex { "gemini_vertex" } else { "gemini" }
    }

    async fn build_request(
        &self,
        request: &mut UnifiedRequest,
        channel: &ChannelConfig,
        credentials: &dyn CredentialProvider,
    ) -> GatewayResult<ProviderRequest> {
        let (mut url, body, format_type) = match request.request_type {
            RequestType::Chat | RequestType::Responses => {
                let action = if request.is_streaming() {
                    "streamGenerateContent"
                } else {
                    "generateContent"
                };

                let url = self.endpoint(request, channel, action)?;
                let wire = gemini::GenerateContentRequest::from(request.clone());
                let body = sonic_rs::to_vec(&wire)
                    .map_err(|error| GatewayError::Internal(format!("failed to serialize request: {error}")))?;

                (url, body, "chat")
            }
            RequestType::Embedding => {
                let payload = request
                    .embedding
                    .clone()
                    .ok_or_else(|| GatewayError::InvalidRequest("missing embedding payload".to_string()))?;

                let url = self.endpoint(request, channel, "embedContent")?;
                let wire = gemini::EmbedContentRequest {
                    content: gemini::Content {
                        role: None,
                        parts: payload.input.into_iter().map(gemini::Part::text).collect(),
                    },
                    output_dimensionality: payload.dimensions,
                };
                let body = sonic_rs::to_vec(&wire)
                    .map_err(|error| GatewayError::Internal(format!("failed to serialize request: {error}")))?;

                (url, body, "embedding")
            }
            RequestType::Rerank => {
                return Err(GatewayError::InvalidRequest(
                    "rerank is not supported on Gemini channels".to_string(),
                ));
            }
        };

        if request.is_streaming() {
            url.push_str("?alt=sse");
        }

        stamp_format_type(request, format_type);

        let mut provider_request = ProviderRequest {
            method: Method::POST,
            url,
            headers: http::HeaderMap::new(),
            body,
            stream: request.is_streaming(),
        };

        provider_request
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        apply_credentials(&mut provider_request, channel, credentials).await?;

        Ok(provider_request)
    }

    fn parse_response(&self, request: &UnifiedRequest, response: &ProviderResponse) -> GatewayResult<UnifiedResponse> {
        match stamped_format_type(request) {
            Some("embedding") => {
                let wire: gemini::EmbedContentResponse = sonic_rs::from_slice(&response.body)
                    .map_err(|error| GatewayError::Internal(format!("failed to parse embedding response: {error}")))?;

                // Embedding payloads travel in the OpenAI list shape, which
                // is what the inbound side serves back.
                let payload = openai::EmbeddingsResponse {
                    object: "list".to_string(),
                    data: vec![openai::EmbeddingObject {
                        object: "embedding".to_string(),
                        index: 0,
                        embedding: json!(wire.embedding.values),
                    }],
                    model: request.model.clone(),
                    usage: Usage::default(),
                };

                let mut unified = UnifiedResponse::empty(request.model.clone());
                unified.payload = Some(serde_json::to_value(payload).map_err(|error| {
                    GatewayError::Internal(format!("failed to serialize embedding payload: {error}"))
                })?);

                Ok(unified)
            }
            _ => {
                let wire: gemini::GenerateContentResponse = sonic_rs::from_slice(&response.body)
                    .map_err(|error| GatewayError::Internal(format!("failed to parse upstream response: {error}")))?;

                let mut unified = UnifiedResponse::from(wire);
                if unified.model.is_empty() {
                    unified.model = request.model.clone();
                }

                Ok(unified)
            }
        }
    }

    fn stream(&self, events: EventStream) -> UnifiedStream {
        let parsed = events.filter_map(|event| async move {
            match event {
                Ok(event) => match sonic_rs::from_slice::<gemini::GenerateContentResponse>(&event.data) {
                    Ok(chunk) => Some(Ok(from_gemini::chunk_to_unified(chunk))),
                    Err(error) => {
                        log::warn!("failed to parse Gemini stream chunk: {error}");
                        None
                    }
                },
                Err(error) => Some(Err(error)),
            }
        });

        // Gemini streams end without a terminator; the sentinel is appended
        // unless the stream errored.
        streams::append(parsed, vec![UnifiedResponse::done()]).boxed()
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        Ok(to_openai::aggregate_chunks(&chunks))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::executor::block_on;
    use secrecy::SecretString;
    use serde_json::Value;

    use super::*;
    use crate::credentials::StaticKeyProvider;
    use crate::messages::unified::{ApiFormat, Role, UnifiedMessage};
    use crate::transport::StreamEvent;

    fn gemini_channel() -> ChannelConfig {
        toml::from_str(
            r#"
            type = "gemini"
            models = ["gemini-2.0-flash"]
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn build_encodes_model_and_action_in_the_path() {
        let outbound = GeminiOutbound { vertex: false };
        let credentials = StaticKeyProvider::new(SecretString::from("goog-key".to_string()));

        let mut request = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "gemini-2.0-flash");
        request.messages.push(UnifiedMessage::text(Role::User, "Hi"));

        let provider_request = outbound
            .build_request(&mut request, &gemini_channel(), &credentials)
            .await
            .unwrap();

        assert_eq!(
            provider_request.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(provider_request.headers.get("x-goog-api-key").unwrap(), "goog-key");

        let body: Value = serde_json::from_slice(&provider_request.body).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Hi");
        assert!(body.get("model").is_none());
    }

    #[tokio::test]
    async fn streaming_requests_use_sse_framing() {
        let outbound = GeminiOutbound { vertex: false };
        let credentials = StaticKeyProvider::new(SecretString::from("goog-key".to_string()));

        let mut request = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "gemini-2.0-flash");
        request.stream = Some(true);

        let provider_request = outbound
            .build_request(&mut request, &gemini_channel(), &credentials)
            .await
            .unwrap();

        assert!(provider_request.url.ends_with(":streamGenerateContent?alt=sse"));
        assert!(provider_request.stream);
    }

    #[tokio::test]
    async fn vertex_builds_the_publisher_path() {
        let outbound = GeminiOutbound { vertex: true };
        let credentials = StaticKeyProvider::new(SecretString::from("token".to_string()));

        let channel: ChannelConfig = toml::from_str(
            r#"
            type = "gemini_vertex"
            models = ["gemini-2.0-flash"]
            project_id = "my-project"
            region = "us-central1"
            "#,
        )
        .unwrap();

        let mut request = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "gemini-2.0-flash");

        let provider_request = outbound
            .build_request(&mut request, &channel, &credentials)
            .await
            .unwrap();

        assert_eq!(
            provider_request.url,
            "https://us-central1-aiplatform.googleapis.com/v1/projects/my-project/locations/us-central1/publishers/google/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn stream_appends_done_sentinel() {
        let outbound = GeminiOutbound { vertex: false };

        let chunk = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello"}]},
                "index": 0
            }]
        });

        let events: EventStream = futures::stream::iter(vec![Ok(StreamEvent {
            event: None,
            data: Bytes::from(chunk.to_string()),
        })])
        .boxed();

        let chunks: Vec<_> = block_on(outbound.stream(events).collect::<Vec<_>>());

        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0].as_ref().unwrap().choices[0]
                .delta
                .as_ref()
                .unwrap()
                .content
                .as_deref(),
            Some("Hello")
        );
        assert!(chunks[1].as_ref().unwrap().is_done);
    }

    #[test]
    fn embedding_responses_take_the_openai_shape() {
        let outbound = GeminiOutbound { vertex: false };

        let mut request = UnifiedRequest::new(RequestType::Embedding, ApiFormat::Embeddings, "text-embedding-004");
        stamp_format_type(&mut request, "embedding");

        let response = ProviderResponse {
            status: http::StatusCode::OK,
            headers: http::HeaderMap::new(),
            body: Bytes::from_static(br#"{"embedding": {"values": [0.1, 0.2]}}"#),
        };

        let unified = outbound.parse_response(&request, &response).unwrap();
        let payload = unified.payload.unwrap();

        assert_eq!(payload["object"], "list");
        assert_eq!(payload["data"][0]["embedding"][0], 0.1);
    }
}
