//! Anthropic Messages inbound transformer.
//!
//! The streaming side rebuilds the named SSE event sequence
//! (`message_start`, `content_block_start/delta/stop`, `message_delta`,
//! `message_stop`) from unified deltas. Thinking text and signatures are
//! first-class here: they stream as `thinking_delta` and `signature_delta`
//! on a thinking block.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use futures::StreamExt;
use http::StatusCode;
use serde_json::{Value, json};

use super::{InboundTransformer, require_json_body};
use crate::{
    error::{GatewayError, GatewayResult},
    messages::{
        anthropic,
        unified::{
            ApiFormat, RawRequest, UnifiedRequest, UnifiedResponse,
            to_anthropic::{stop_reason_from_finish, usage_to_anthropic},
            to_openai,
        },
    },
    streams::{ByteStream, UnifiedStream, sse_event},
};

pub(crate) struct AnthropicInbound;

impl InboundTransformer for AnthropicInbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::Anthropic
    }

    fn parse_request(&self, raw: &RawRequest) -> GatewayResult<UnifiedRequest> {
        require_json_body(raw)?;

        let request: anthropic::MessagesRequest = sonic_rs::from_slice(&raw.body)
            .map_err(|error| GatewayError::InvalidRequest(format!("malformed messages request: {error}")))?;

        if request.model.is_empty() {
            return Err(GatewayError::InvalidRequest("model is required".to_string()));
        }

        let mut unified = UnifiedRequest::from(request);
        unified.raw = raw.clone();

        Ok(unified)
    }

    fn response_body(&self, response: &UnifiedResponse) -> GatewayResult<Value> {
        let wire = anthropic::MessagesResponse::from(response.clone());

        serde_json::to_value(wire)
            .map_err(|error| GatewayError::Internal(format!("failed to serialize response: {error}")))
    }

    fn stream(&self, chunks: UnifiedStream, _request: &UnifiedRequest) -> ByteStream {
        let state = StreamState {
            chunks,
            sse: SseBuilder::default(),
            pending: VecDeque::new(),
            ended: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Some((frame, state));
                }

                if state.ended {
                    return None;
                }

                match state.chunks.next().await {
                    Some(Ok(chunk)) => state.pending.extend(state.sse.frames_for(&chunk)),
                    Some(Err(error)) => {
                        state.pending.push_back(error_frame(&error));
                        state.ended = true;
                    }
                    None => {
                        state.pending.extend(state.sse.finish());
                        state.ended = true;
                    }
                }
            }
        })
        .boxed()
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        Ok(to_openai::aggregate_chunks(&chunks))
    }

    fn error_body(&self, error: &GatewayError) -> (StatusCode, Value) {
        let envelope = anthropic::ErrorResponse {
            response_type: "error".to_string(),
            error: anthropic::ErrorDetails {
                error_type: anthropic_error_type(error).to_string(),
                message: error.client_message(),
            },
        };

        let body = serde_json::to_value(envelope)
            .unwrap_or_else(|_| json!({"type": "error", "error": {"type": "api_error", "message": "serialization failed"}}));

        (error.status_code(), body)
    }
}

fn anthropic_error_type(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::InvalidRequest(_) | GatewayError::InvalidModel(_) => "invalid_request_error",
        GatewayError::Unauthorized(_) => "authentication_error",
        GatewayError::Forbidden(_) => "permission_error",
        GatewayError::RateLimited { .. } => "rate_limit_error",
        GatewayError::UpstreamTemporary { .. } => "overloaded_error",
        _ => "api_error",
    }
}

fn error_frame(error: &GatewayError) -> GatewayResult<Bytes> {
    let event = anthropic::StreamEvent::Error {
        error: anthropic::ErrorDetails {
            error_type: anthropic_error_type(error).to_string(),
            message: error.client_message(),
        },
    };

    sse_event(event.event_name(), &event)
}

struct StreamState {
    chunks: UnifiedStream,
    sse: SseBuilder,
    pending: VecDeque<GatewayResult<Bytes>>,
    ended: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

/// Incremental reconstruction of the Anthropic event sequence.
#[derive(Default)]
struct SseBuilder {
    started: bool,
    finished: bool,
    next_block: u32,
    open_block: Option<(u32, BlockKind)>,
    tool_blocks: HashMap<u32, u32>,
    usage: Option<anthropic::AnthropicUsage>,
    stop_reason: Option<anthropic::StopReason>,
}

impl SseBuilder {
    fn frames_for(&mut self, chunk: &UnifiedResponse) -> Vec<GatewayResult<Bytes>> {
        if self.finished {
            return Vec::new();
        }

        if chunk.is_done {
            return self.finish();
        }

        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage_to_anthropic(usage));
        }

        if !chunk.has_meaningful_delta() {
            return Vec::new();
        }

        let mut frames = Vec::new();

        if !self.started {
            self.started = true;
            frames.push(self.message_start(chunk));
        }

        let Some(choice) = chunk.choices.iter().find(|choice| choice.index == 0) else {
            return frames;
        };

        if let Some(delta) = &choice.delta {
            if let Some(thinking) = &delta.reasoning_content
                && !thinking.is_empty()
            {
                self.ensure_block(BlockKind::Thinking, &mut frames);
                frames.push(self.block_delta(anthropic::BlockDelta::ThinkingDelta {
                    thinking: thinking.clone(),
                }));
            }

            if let Some(signature) = &delta.reasoning_signature {
                self.ensure_block(BlockKind::Thinking, &mut frames);
                frames.push(self.block_delta(anthropic::BlockDelta::SignatureDelta {
                    signature: signature.clone(),
                }));
            }

            if let Some(text) = &delta.content
                && !text.is_empty()
            {
                self.ensure_block(BlockKind::Text, &mut frames);
                frames.push(self.block_delta(anthropic::BlockDelta::TextDelta { text: text.clone() }));
            }

            for call in delta.tool_calls.iter().flatten() {
                let starts_new = call.id.is_some()
                    || call
                        .function
                        .as_ref()
                        .is_some_and(|function| function.name.is_some());

                if starts_new && !self.tool_blocks.contains_key(&call.index) {
                    self.close_open_block(&mut frames);

                    let index = self.next_block;
                    self.next_block += 1;
                    self.tool_blocks.insert(call.index, index);
                    self.open_block = Some((index, BlockKind::ToolUse));

                    let event = anthropic::StreamEvent::ContentBlockStart {
                        index,
                        content_block: anthropic::ContentBlock::ToolUse {
                            id: call.id.clone().unwrap_or_else(|| format!("toolu_{}", call.index)),
                            name: call
                                .function
                                .as_ref()
                                .and_then(|function| function.name.clone())
                                .unwrap_or_default(),
                            input: json!({}),
                        },
                    };
                    frames.push(sse_event(event.event_name(), &event));
                }

                let arguments = call
                    .function
                    .as_ref()
                    .and_then(|function| function.arguments.clone())
                    .unwrap_or_default();

                if !arguments.is_empty()
                    && let Some(&index) = self.tool_blocks.get(&call.index)
                {
                    let event = anthropic::StreamEvent::ContentBlockDelta {
                        index,
                        delta: anthropic::BlockDelta::InputJsonDelta {
                            partial_json: arguments,
                        },
                    };
                    frames.push(sse_event(event.event_name(), &event));
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.stop_reason = Some(stop_reason_from_finish(reason));
            frames.extend(self.finish());
        }

        frames
    }

    /// Close any open block and emit `message_delta` + `message_stop`.
    fn finish(&mut self) -> Vec<GatewayResult<Bytes>> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut frames = Vec::new();

        if !self.started {
            // A stream that never produced content still gets a valid
            // event sequence.
            self.started = true;
            frames.push(self.message_start(&UnifiedResponse::empty("")));
        }

        self.close_open_block(&mut frames);

        let event = anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDelta {
                stop_reason: Some(self.stop_reason.unwrap_or(anthropic::StopReason::EndTurn)),
                stop_sequence: None,
            },
            usage: self.usage.take(),
        };
        frames.push(sse_event(event.event_name(), &event));

        let stop = anthropic::StreamEvent::MessageStop;
        frames.push(sse_event(stop.event_name(), &stop));

        frames
    }

    fn message_start(&self, chunk: &UnifiedResponse) -> GatewayResult<Bytes> {
        let id = if chunk.id.is_empty() {
            format!("msg_{}", uuid::Uuid::new_v4().simple())
        } else {
            chunk.id.clone()
        };

        let event = anthropic::StreamEvent::MessageStart {
            message: Box::new(anthropic::MessagesResponse {
                id,
                response_type: "message".to_string(),
                role: anthropic::AnthropicRole::Assistant,
                content: Vec::new(),
                model: chunk.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: anthropic::AnthropicUsage::default(),
            }),
        };

        sse_event(event.event_name(), &event)
    }

    fn ensure_block(&mut self, kind: BlockKind, frames: &mut Vec<GatewayResult<Bytes>>) {
        if let Some((_, open)) = self.open_block
            && open == kind
        {
            return;
        }

        self.close_open_block(frames);

        let index = self.next_block;
        self.next_block += 1;
        self.open_block = Some((index, kind));

        let content_block = match kind {
            BlockKind::Text => anthropic::ContentBlock::Text { text: String::new() },
            BlockKind::Thinking => anthropic::ContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
            // Tool blocks are opened with their id and name inline.
            BlockKind::ToolUse => anthropic::ContentBlock::ToolUse {
                id: String::new(),
                name: String::new(),
                input: json!({}),
            },
        };

        let event = anthropic::StreamEvent::ContentBlockStart { index, content_block };
        frames.push(sse_event(event.event_name(), &event));
    }

    fn close_open_block(&mut self, frames: &mut Vec<GatewayResult<Bytes>>) {
        if let Some((index, _)) = self.open_block.take() {
            let event = anthropic::StreamEvent::ContentBlockStop { index };
            frames.push(sse_event(event.event_name(), &event));
        }
    }

    fn block_delta(&self, delta: anthropic::BlockDelta) -> GatewayResult<Bytes> {
        let index = self.open_block.map(|(index, _)| index).unwrap_or_default();
        let event = anthropic::StreamEvent::ContentBlockDelta { index, delta };
        sse_event(event.event_name(), &event)
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::messages::unified::{
        FinishReason, FunctionDelta, RequestType, ToolCallDelta, UnifiedChoice, UnifiedDelta, Usage,
    };

    fn delta_chunk(delta: UnifiedDelta, finish: Option<FinishReason>) -> UnifiedResponse {
        let mut chunk = UnifiedResponse::empty("claude-sonnet-4");
        chunk.id = "msg_test".to_string();
        chunk.choices.push(UnifiedChoice {
            index: 0,
            delta: Some(delta),
            finish_reason: finish,
            ..Default::default()
        });
        chunk
    }

    fn event_names(frames: &[GatewayResult<Bytes>]) -> Vec<String> {
        frames
            .iter()
            .map(|frame| {
                let text = String::from_utf8(frame.as_ref().unwrap().to_vec()).unwrap();
                text.lines()
                    .next()
                    .unwrap()
                    .strip_prefix("event: ")
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    fn run_stream(chunks: Vec<UnifiedResponse>) -> Vec<GatewayResult<Bytes>> {
        let inbound = AnthropicInbound;
        let request = UnifiedRequest::new(RequestType::Chat, ApiFormat::Anthropic, "claude-sonnet-4");
        let stream: UnifiedStream = futures::stream::iter(chunks.into_iter().map(Ok)).boxed();
        block_on(inbound.stream(stream, &request).collect::<Vec<_>>())
    }

    #[test]
    fn text_stream_produces_canonical_event_sequence() {
        let frames = run_stream(vec![
            delta_chunk(
                UnifiedDelta {
                    content: Some("Hel".to_string()),
                    ..Default::default()
                },
                None,
            ),
            delta_chunk(
                UnifiedDelta {
                    content: Some("lo".to_string()),
                    ..Default::default()
                },
                None,
            ),
            delta_chunk(UnifiedDelta::default(), Some(FinishReason::Stop)),
        ]);

        assert_eq!(
            event_names(&frames),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn thinking_then_text_opens_two_blocks() {
        let frames = run_stream(vec![
            delta_chunk(
                UnifiedDelta {
                    reasoning_content: Some("hmm".to_string()),
                    ..Default::default()
                },
                None,
            ),
            delta_chunk(
                UnifiedDelta {
                    reasoning_signature: Some("EqQ".to_string()),
                    ..Default::default()
                },
                None,
            ),
            delta_chunk(
                UnifiedDelta {
                    content: Some("Answer".to_string()),
                    ..Default::default()
                },
                None,
            ),
            delta_chunk(UnifiedDelta::default(), Some(FinishReason::Stop)),
        ]);

        let names = event_names(&frames);
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        // The signature travels as a signature_delta on the thinking block.
        let signature_frame = String::from_utf8(frames[3].as_ref().unwrap().to_vec()).unwrap();
        assert!(signature_frame.contains("signature_delta"));
        assert!(signature_frame.contains("\"index\":0"));
    }

    #[test]
    fn tool_call_stream_emits_tool_use_block() {
        let frames = run_stream(vec![
            delta_chunk(
                UnifiedDelta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: Some("toolu_1".to_string()),
                        call_type: Some("function".to_string()),
                        function: Some(FunctionDelta {
                            name: Some("read".to_string()),
                            arguments: None,
                        }),
                    }]),
                    ..Default::default()
                },
                None,
            ),
            delta_chunk(
                UnifiedDelta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: None,
                        call_type: None,
                        function: Some(FunctionDelta {
                            name: None,
                            arguments: Some("{\"path\":\"/\"}".to_string()),
                        }),
                    }]),
                    ..Default::default()
                },
                None,
            ),
            delta_chunk(UnifiedDelta::default(), Some(FinishReason::ToolCalls)),
        ]);

        let names = event_names(&frames);
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let start = String::from_utf8(frames[1].as_ref().unwrap().to_vec()).unwrap();
        assert!(start.contains("tool_use"));
        assert!(start.contains("toolu_1"));

        let delta = String::from_utf8(frames[2].as_ref().unwrap().to_vec()).unwrap();
        assert!(delta.contains("input_json_delta"));

        let message_delta = String::from_utf8(frames[4].as_ref().unwrap().to_vec()).unwrap();
        assert!(message_delta.contains("tool_use"));
    }

    #[test]
    fn usage_rides_the_message_delta() {
        let mut usage_chunk = UnifiedResponse::empty("claude-sonnet-4");
        usage_chunk.usage = Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 4,
            total_tokens: 14,
            ..Default::default()
        });

        let frames = run_stream(vec![
            delta_chunk(
                UnifiedDelta {
                    content: Some("Hi".to_string()),
                    ..Default::default()
                },
                None,
            ),
            usage_chunk,
            delta_chunk(UnifiedDelta::default(), Some(FinishReason::Stop)),
        ]);

        let message_delta = frames
            .iter()
            .map(|frame| String::from_utf8(frame.as_ref().unwrap().to_vec()).unwrap())
            .find(|text| text.starts_with("event: message_delta"))
            .unwrap();

        assert!(message_delta.contains("\"output_tokens\":4"));
    }

    #[test]
    fn error_mid_stream_surfaces_as_error_event() {
        let inbound = AnthropicInbound;
        let request = UnifiedRequest::new(RequestType::Chat, ApiFormat::Anthropic, "claude-sonnet-4");

        let stream: UnifiedStream = futures::stream::iter(vec![
            Ok(delta_chunk(
                UnifiedDelta {
                    content: Some("Hi".to_string()),
                    ..Default::default()
                },
                None,
            )),
            Err(GatewayError::StreamMidFault("connection reset".to_string())),
        ])
        .boxed();

        let frames: Vec<_> = block_on(inbound.stream(stream, &request).collect::<Vec<_>>());
        let last = String::from_utf8(frames.last().unwrap().as_ref().unwrap().to_vec()).unwrap();

        assert!(last.starts_with("event: error"));
        assert!(last.contains("api_error"));
    }

    #[test]
    fn error_envelope_shape() {
        let inbound = AnthropicInbound;
        let (status, body) = inbound.error_body(&GatewayError::InvalidModel("x".to_string()));

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }
}
