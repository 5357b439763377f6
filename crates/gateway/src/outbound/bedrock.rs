//! Anthropic-on-Bedrock outbound transformer.
//!
//! Bedrock serves the Messages dialect under its own envelope: the model id
//! moves into the URL, the body carries `anthropic_version`, requests are
//! SigV4-signed, and streaming responses arrive as AWS EventStream frames
//! whose payloads wrap base64-encoded Anthropic SSE events.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use config::ChannelConfig;
use futures::StreamExt;
use http::{HeaderValue, Method, header};
use serde_json::Value;

use super::{
    OutboundTransformer,
    anthropic::{event_stream_to_unified, parse_messages_response},
    apply_credentials,
    url::normalize_base_url,
};
use crate::{
    credentials::CredentialProvider,
    error::{GatewayError, GatewayResult},
    messages::{
        anthropic,
        unified::{UnifiedRequest, UnifiedResponse, to_openai},
    },
    streams::{EventStream, UnifiedStream},
    transport::{ProviderRequest, ProviderResponse, StreamEvent},
};

const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

pub(crate) struct BedrockOutbound;

#[async_trait]
impl OutboundTransformer for BedrockOutbound {
    fn name(&self) -> &'static str {
        "anthropic_aws"
    }

    async fn build_request(
        &self,
        request: &mut UnifiedRequest,
        channel: &ChannelConfig,
        credentials: &dyn CredentialProvider,
    ) -> GatewayResult<ProviderRequest> {
        let region = channel
            .region
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("bedrock channel is missing a region".to_string()))?;

        let host = match channel.base_url.as_deref() {
            Some(base) => normalize_base_url(base, channel.channel_type.api_version()),
            None => format!("https://bedrock-runtime.{region}.amazonaws.com"),
        };

        let action = if request.is_streaming() {
            "invoke-with-response-stream"
        } else {
            "invoke"
        };

        let url = format!("{host}/model/{model}/{action}", model = request.model);

        let wire = anthropic::MessagesRequest::from(request.clone());
        let mut body = serde_json::to_value(&wire)
            .map_err(|error| GatewayError::Internal(format!("failed to serialize request: {error}")))?;

        if let Value::Object(map) = &mut body {
            map.remove("model");
            map.remove("stream");
            map.insert(
                "anthropic_version".to_string(),
                Value::String(BEDROCK_ANTHROPIC_VERSION.to_string()),
            );
        }

        let mut provider_request = ProviderRequest {
            method: Method::POST,
            url,
            headers: http::HeaderMap::new(),
            body: serde_json::to_vec(&body)
                .map_err(|error| GatewayError::Internal(format!("failed to serialize request: {error}")))?,
            stream: request.is_streaming(),
        };

        provider_request
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if request.is_streaming() {
            provider_request.headers.insert(
                header::ACCEPT,
                HeaderValue::from_static("application/vnd.amazon.eventstream"),
            );
        }

        // SigV4 signing runs inside apply_credentials, after all headers are
        // in place.
        apply_credentials(&mut provider_request, channel, credentials).await?;

        Ok(provider_request)
    }

    fn parse_response(&self, _request: &UnifiedRequest, response: &ProviderResponse) -> GatewayResult<UnifiedResponse> {
        parse_messages_response(response)
    }

    fn stream(&self, events: EventStream) -> UnifiedStream {
        event_stream_to_unified(unwrap_bedrock_frames(events))
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        Ok(to_openai::aggregate_chunks(&chunks))
    }
}

/// Unwrap Bedrock's `{"bytes": "<base64>"}` chunk envelope into the
/// Anthropic SSE event it encodes.
fn unwrap_bedrock_frames(events: EventStream) -> EventStream {
    events
        .map(|event| {
            let event = event?;

            let envelope: Value = sonic_rs::from_slice(&event.data)
                .map_err(|error| GatewayError::StreamMidFault(format!("malformed Bedrock chunk: {error}")))?;

            let encoded = envelope
                .get("bytes")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::StreamMidFault("Bedrock chunk is missing its payload".to_string()))?;

            let decoded = BASE64
                .decode(encoded)
                .map_err(|error| GatewayError::StreamMidFault(format!("undecodable Bedrock chunk: {error}")))?;

            Ok(StreamEvent {
                event: event.event,
                data: Bytes::from(decoded),
            })
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use secrecy::SecretString;
    use serde_json::json;

    use super::*;
    use crate::credentials::sigv4::SigV4Provider;
    use crate::messages::unified::{ApiFormat, RequestType, Role, UnifiedMessage};

    fn channel() -> ChannelConfig {
        toml::from_str(
            r#"
            type = "anthropic_aws"
            models = ["anthropic.claude-sonnet-4"]
            region = "us-east-1"
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn build_signs_and_moves_the_model_into_the_url() {
        let outbound = BedrockOutbound;
        let credentials = SigV4Provider::new(
            SecretString::from("AKIAEXAMPLE".to_string()),
            SecretString::from("secret".to_string()),
            None,
        );

        let mut request = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "anthropic.claude-sonnet-4");
        request.messages.push(UnifiedMessage::text(Role::User, "Hi"));

        let provider_request = outbound
            .build_request(&mut request, &channel(), &credentials)
            .await
            .unwrap();

        assert_eq!(
            provider_request.url,
            "https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-sonnet-4/invoke"
        );

        let body: Value = serde_json::from_slice(&provider_request.body).unwrap();
        assert!(body.get("model").is_none());
        assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");

        assert!(provider_request.headers.contains_key("authorization"));
        assert!(provider_request.headers.contains_key("x-amz-date"));
    }

    #[test]
    fn frames_unwrap_to_anthropic_events() {
        let inner = json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}});
        let envelope = json!({"bytes": BASE64.encode(inner.to_string())});

        let events: EventStream = futures::stream::iter(vec![Ok(StreamEvent {
            event: Some("chunk".to_string()),
            data: Bytes::from(envelope.to_string()),
        })])
        .boxed();

        let unwrapped: Vec<_> = block_on(unwrap_bedrock_frames(events).collect::<Vec<_>>());

        let event = unwrapped[0].as_ref().unwrap();
        let value: Value = serde_json::from_slice(&event.data).unwrap();
        assert_eq!(value["delta"]["text"], "Hi");
    }

    #[test]
    fn malformed_frames_fault_the_stream() {
        let events: EventStream = futures::stream::iter(vec![Ok(StreamEvent {
            event: Some("chunk".to_string()),
            data: Bytes::from_static(b"not json"),
        })])
        .boxed();

        let unwrapped: Vec<_> = block_on(unwrap_bedrock_frames(events).collect::<Vec<_>>());

        assert!(matches!(
            unwrapped[0].as_ref().unwrap_err(),
            GatewayError::StreamMidFault(_)
        ));
    }
}
