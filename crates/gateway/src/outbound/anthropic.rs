//! Anthropic outbound transformers: native API and Vertex.
//!
//! Both speak the Messages dialect; they differ in URL shape, auth and the
//! body's version field. The SSE-to-unified stream adapter is shared with
//! the Bedrock outbound, which carries the same events in EventStream
//! frames.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use config::ChannelConfig;
use futures::StreamExt;
use http::{HeaderValue, Method, header};
use serde_json::{Value, json};

use super::{OutboundTransformer, apply_credentials, url::normalize_base_url};
use crate::{
    credentials::CredentialProvider,
    error::{GatewayError, GatewayResult},
    messages::{
        anthropic,
        unified::{
            FinishReason, FunctionDelta, Role, ToolCallDelta, UnifiedChoice, UnifiedDelta, UnifiedRequest,
            UnifiedResponse, Usage, from_anthropic, to_openai,
        },
    },
    streams::{EventStream, UnifiedStream},
    transport::{ProviderRequest, ProviderResponse},
};

const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

pub(crate) struct AnthropicOutbound;

#[async_trait]
impl OutboundTransformer for AnthropicOutbound {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn build_request(
        &self,
        request: &mut UnifiedRequest,
        channel: &ChannelConfig,
        credentials: &dyn CredentialProvider,
    ) -> GatewayResult<ProviderRequest> {
        let base = normalize_base_url(
            channel.base_url.as_deref().unwrap_or(DEFAULT_ANTHROPIC_API_URL),
            channel.channel_type.api_version(),
        );

        let wire = anthropic::MessagesRequest::from(request.clone());
        let body = sonic_rs::to_vec(&wire)
            .map_err(|error| GatewayError::Internal(format!("failed to serialize request: {error}")))?;

        let mut provider_request = ProviderRequest {
            method: Method::POST,
            url: format!("{base}/messages"),
            headers: http::HeaderMap::new(),
            body,
            stream: request.is_streaming(),
        };

        provider_request
            .headers
            .insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        provider_request
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        apply_credentials(&mut provider_request, channel, credentials).await?;

        Ok(provider_request)
    }

    fn parse_response(&self, _request: &UnifiedRequest, response: &ProviderResponse) -> GatewayResult<UnifiedResponse> {
        parse_messages_response(response)
    }

    fn stream(&self, events: EventStream) -> UnifiedStream {
        event_stream_to_unified(events)
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        Ok(to_openai::aggregate_chunks(&chunks))
    }
}

/// Anthropic models served through GCP Vertex.
///
/// The model moves from the body into the URL, and the body carries
/// `anthropic_version` instead.
pub(crate) struct AnthropicVertexOutbound;

#[async_trait]
impl OutboundTransformer for AnthropicVertexOutbound {
    fn name(&self) -> &'static str {
        "anthropic_gcp"
    }

    async fn build_request(
        &self,
        request: &mut UnifiedRequest,
        channel: &ChannelConfig,
        credentials: &dyn CredentialProvider,
    ) -> GatewayResult<ProviderRequest> {
        let project = channel
            .project_id
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("vertex channel is missing a project_id".to_string()))?;
        let region = channel
            .region
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("vertex channel is missing a region".to_string()))?;

        let action = if request.is_streaming() {
            "streamRawPredict"
        } else {
            "rawPredict"
        };

        let host = match channel.base_url.as_deref() {
            Some(base) => normalize_base_url(base, channel.channel_type.api_version()),
            None => format!("https://{region}-aiplatform.googleapis.com/v1"),
        };

        let url = format!(
            "{host}/projects/{project}/locations/{region}/publishers/anthropic/models/{model}:{action}",
            model = request.model
        );

        let wire = anthropic::MessagesRequest::from(request.clone());
        let mut body = serde_json::to_value(&wire)
            .map_err(|error| GatewayError::Internal(format!("failed to serialize request: {error}")))?;

        if let Value::Object(map) = &mut body {
            map.remove("model");
            map.insert(
                "anthropic_version".to_string(),
                Value::String(VERTEX_ANTHROPIC_VERSION.to_string()),
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

        apply_credentials(&mut provider_request, channel, credentials).await?;

        Ok(provider_request)
    }

    fn parse_response(&self, _request: &UnifiedRequest, response: &ProviderResponse) -> GatewayResult<UnifiedResponse> {
        parse_messages_response(response)
    }

    fn stream(&self, events: EventStream) -> UnifiedStream {
        event_stream_to_unified(events)
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        Ok(to_openai::aggregate_chunks(&chunks))
    }
}

pub(crate) fn parse_messages_response(response: &ProviderResponse) -> GatewayResult<UnifiedResponse> {
    let wire: anthropic::MessagesResponse = sonic_rs::from_slice(&response.body)
        .map_err(|error| GatewayError::Internal(format!("failed to parse upstream response: {error}")))?;

    Ok(UnifiedResponse::from(wire))
}

/// Decode Anthropic SSE events into unified chunks.
pub(crate) fn event_stream_to_unified(events: EventStream) -> UnifiedStream {
    let state = AdapterState {
        events,
        adapter: EventAdapter::default(),
        pending: VecDeque::new(),
        ended: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }

            if state.ended {
                return None;
            }

            match state.events.next().await {
                Some(Ok(event)) => {
                    let parsed: anthropic::StreamEvent = match sonic_rs::from_slice(&event.data) {
                        Ok(parsed) => parsed,
                        Err(error) => {
                            log::warn!("failed to parse upstream stream event: {error}");
                            continue;
                        }
                    };

                    state.pending.extend(state.adapter.on_event(parsed));
                }
                Some(Err(error)) => {
                    state.pending.push_back(Err(error));
                    state.ended = true;
                }
                None => {
                    state.ended = true;
                }
            }
        }
    })
    .boxed()
}

struct AdapterState {
    events: EventStream,
    adapter: EventAdapter,
    pending: VecDeque<GatewayResult<UnifiedResponse>>,
    ended: bool,
}

#[derive(Clone, Copy)]
enum BlockInfo {
    Text,
    Thinking,
    Tool { ordinal: u32 },
}

/// Folds the Anthropic event lifecycle into OpenAI-shaped deltas.
#[derive(Default)]
struct EventAdapter {
    id: String,
    model: String,
    created: i64,
    blocks: HashMap<u32, BlockInfo>,
    next_tool_ordinal: u32,
    input_tokens: u32,
}

impl EventAdapter {
    fn on_event(&mut self, event: anthropic::StreamEvent) -> Vec<GatewayResult<UnifiedResponse>> {
        match event {
            anthropic::StreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                self.created = jiff::Timestamp::now().as_second();
                self.input_tokens = message.usage.input_tokens;

                vec![Ok(self.chunk(
                    UnifiedDelta {
                        role: Some(Role::Assistant),
                        ..Default::default()
                    },
                    None,
                    None,
                ))]
            }
            anthropic::StreamEvent::ContentBlockStart { index, content_block } => match content_block {
                anthropic::ContentBlock::ToolUse { id, name, .. } => {
                    let ordinal = self.next_tool_ordinal;
                    self.next_tool_ordinal += 1;
                    self.blocks.insert(index, BlockInfo::Tool { ordinal });

                    vec![Ok(self.chunk(
                        UnifiedDelta {
                            tool_calls: Some(vec![ToolCallDelta {
                                index: ordinal,
                                id: Some(id),
                                call_type: Some("function".to_string()),
                                function: Some(FunctionDelta {
                                    name: Some(name),
                                    arguments: Some(String::new()),
                                }),
                            }]),
                            ..Default::default()
                        },
                        None,
                        None,
                    ))]
                }
                anthropic::ContentBlock::Thinking { .. } => {
                    self.blocks.insert(index, BlockInfo::Thinking);
                    Vec::new()
                }
                _ => {
                    self.blocks.insert(index, BlockInfo::Text);
                    Vec::new()
                }
            },
            anthropic::StreamEvent::ContentBlockDelta { index, delta } => {
                let unified_delta = match delta {
                    anthropic::BlockDelta::TextDelta { text } => UnifiedDelta {
                        content: Some(text),
                        ..Default::default()
                    },
                    anthropic::BlockDelta::ThinkingDelta { thinking } => UnifiedDelta {
                        reasoning_content: Some(thinking),
                        ..Default::default()
                    },
                    anthropic::BlockDelta::SignatureDelta { signature } => UnifiedDelta {
                        reasoning_signature: Some(signature),
                        ..Default::default()
                    },
                    anthropic::BlockDelta::InputJsonDelta { partial_json } => {
                        let Some(BlockInfo::Tool { ordinal }) = self.blocks.get(&index).copied() else {
                            return Vec::new();
                        };

                        UnifiedDelta {
                            tool_calls: Some(vec![ToolCallDelta {
                                index: ordinal,
                                id: None,
                                call_type: None,
                                function: Some(FunctionDelta {
                                    name: None,
                                    arguments: Some(partial_json),
                                }),
                            }]),
                            ..Default::default()
                        }
                    }
                };

                vec![Ok(self.chunk(unified_delta, None, None))]
            }
            anthropic::StreamEvent::ContentBlockStop { .. } | anthropic::StreamEvent::Ping => Vec::new(),
            anthropic::StreamEvent::MessageDelta { delta, usage } => {
                let finish = delta
                    .stop_reason
                    .map(from_anthropic::finish_reason_from_stop)
                    .unwrap_or(FinishReason::Stop);

                let usage = usage.map(|usage| Usage {
                    prompt_tokens: self.input_tokens.max(usage.input_tokens),
                    completion_tokens: usage.output_tokens,
                    total_tokens: self.input_tokens.max(usage.input_tokens) + usage.output_tokens,
                    ..Default::default()
                });

                vec![Ok(self.chunk(UnifiedDelta::default(), Some(finish), usage))]
            }
            anthropic::StreamEvent::MessageStop => vec![Ok(UnifiedResponse::done())],
            anthropic::StreamEvent::Error { error } => vec![Err(GatewayError::StreamMidFault(format!(
                "{}: {}",
                error.error_type, error.message
            )))],
        }
    }

    fn chunk(&self, delta: UnifiedDelta, finish: Option<FinishReason>, usage: Option<Usage>) -> UnifiedResponse {
        UnifiedResponse {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            service_tier: None,
            system_fingerprint: None,
            choices: vec![UnifiedChoice {
                index: 0,
                message: None,
                delta: Some(delta),
                finish_reason: finish,
                logprobs: None,
            }],
            usage,
            payload: None,
            is_done: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::executor::block_on;
    use secrecy::SecretString;
    use serde_json::json;

    use super::*;
    use crate::credentials::StaticKeyProvider;
    use crate::messages::unified::{ApiFormat, RequestType, UnifiedMessage};
    use crate::transport::StreamEvent;

    fn sse(event: Value) -> GatewayResult<StreamEvent> {
        Ok(StreamEvent {
            event: event["type"].as_str().map(str::to_string),
            data: Bytes::from(event.to_string()),
        })
    }

    #[tokio::test]
    async fn build_targets_the_messages_endpoint() {
        let outbound = AnthropicOutbound;
        let channel: ChannelConfig = toml::from_str(
            r#"
            type = "anthropic"
            models = ["gpt-4"]
            "#,
        )
        .unwrap();
        let credentials = StaticKeyProvider::new(SecretString::from("sk-ant-test".to_string()));

        let mut request = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "gpt-4");
        request
            .messages
            .push(UnifiedMessage::text(Role::User, "Hello, how are you?"));
        request.temperature = Some(0.7);

        let provider_request = outbound
            .build_request(&mut request, &channel, &credentials)
            .await
            .unwrap();

        assert_eq!(provider_request.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(provider_request.headers.get("x-api-key").unwrap(), "sk-ant-test");
        assert_eq!(provider_request.headers.get("anthropic-version").unwrap(), "2023-06-01");

        let body: Value = serde_json::from_slice(&provider_request.body).unwrap();
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["messages"][0]["content"], "Hello, how are you?");
    }

    #[tokio::test]
    async fn vertex_moves_the_model_into_the_url() {
        let outbound = AnthropicVertexOutbound;
        let channel: ChannelConfig = toml::from_str(
            r#"
            type = "anthropic_gcp"
            models = ["claude-sonnet-4"]
            project_id = "my-project"
            region = "europe-west1"
            "#,
        )
        .unwrap();
        let credentials = StaticKeyProvider::new(SecretString::from("token".to_string()));

        let mut request = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "claude-sonnet-4");
        request.stream = Some(true);

        let provider_request = outbound
            .build_request(&mut request, &channel, &credentials)
            .await
            .unwrap();

        assert_eq!(
            provider_request.url,
            "https://europe-west1-aiplatform.googleapis.com/v1/projects/my-project/locations/europe-west1/publishers/anthropic/models/claude-sonnet-4:streamRawPredict"
        );

        let body: Value = serde_json::from_slice(&provider_request.body).unwrap();
        assert!(body.get("model").is_none());
        assert_eq!(body["anthropic_version"], "vertex-2023-10-16");
    }

    #[test]
    fn event_stream_folds_into_unified_chunks() {
        let events: EventStream = futures::stream::iter(vec![
            sse(json!({
                "type": "message_start",
                "message": {
                    "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                    "model": "claude-sonnet-4", "usage": {"input_tokens": 10, "output_tokens": 0}
                }
            })),
            sse(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})),
            sse(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}})),
            sse(json!({"type": "content_block_stop", "index": 0})),
            sse(json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn"},
                "usage": {"input_tokens": 10, "output_tokens": 2}
            })),
            sse(json!({"type": "message_stop"})),
        ])
        .boxed();

        let chunks: Vec<_> = block_on(event_stream_to_unified(events).collect::<Vec<_>>())
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(chunks.len(), 4);

        assert_eq!(chunks[0].choices[0].delta.as_ref().unwrap().role, Some(Role::Assistant));
        assert_eq!(chunks[1].choices[0].delta.as_ref().unwrap().content.as_deref(), Some("Hi"));

        let finish = &chunks[2];
        assert_eq!(finish.choices[0].finish_reason, Some(FinishReason::Stop));
        let usage = finish.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 12);

        assert!(chunks[3].is_done);
    }

    #[test]
    fn tool_use_blocks_become_tool_call_deltas() {
        let events: EventStream = futures::stream::iter(vec![
            sse(json!({
                "type": "message_start",
                "message": {
                    "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                    "model": "claude-sonnet-4", "usage": {"input_tokens": 4, "output_tokens": 0}
                }
            })),
            sse(json!({
                "type": "content_block_start", "index": 0,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "read", "input": {}}
            })),
            sse(json!({
                "type": "content_block_delta", "index": 0,
                "delta": {"type": "input_json_delta", "partial_json": "{\"path\":\"/\"}"}
            })),
            sse(json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"input_tokens": 4, "output_tokens": 8}})),
            sse(json!({"type": "message_stop"})),
        ])
        .boxed();

        let chunks: Vec<_> = block_on(event_stream_to_unified(events).collect::<Vec<_>>())
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let start_delta = chunks[1].choices[0].delta.as_ref().unwrap();
        let call = &start_delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id.as_deref(), Some("toolu_1"));
        assert_eq!(call.function.as_ref().unwrap().name.as_deref(), Some("read"));

        let args_delta = chunks[2].choices[0].delta.as_ref().unwrap();
        let call = &args_delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(
            call.function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"path\":\"/\"}")
        );

        assert_eq!(chunks[3].choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn error_events_become_stream_faults() {
        let events: EventStream = futures::stream::iter(vec![sse(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "try later"}
        }))])
        .boxed();

        let chunks: Vec<_> = block_on(event_stream_to_unified(events).collect::<Vec<_>>());

        assert_eq!(chunks.len(), 1);
        assert!(matches!(
            chunks[0].as_ref().unwrap_err(),
            GatewayError::StreamMidFault(message) if message.contains("overloaded_error")
        ));
    }
}
