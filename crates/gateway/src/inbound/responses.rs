//! OpenAI Responses inbound transformer.
//!
//! Translates the Responses surface onto the same unified model the chat
//! dialect uses: `input` items become messages, flattened tools become
//! function tools, and the streaming side emits the Responses event family
//! (`response.created`, `response.output_text.delta`,
//! `response.function_call_arguments.delta`, `response.completed`).

use std::collections::VecDeque;

use bytes::Bytes;
use futures::StreamExt;
use http::StatusCode;
use serde_json::{Value, json};

use super::{InboundTransformer, openai::openai_error_body, require_json_body};
use crate::{
    error::{GatewayError, GatewayResult},
    messages::{
        openai::responses,
        unified::{
            ApiFormat, FunctionCall, MessageContent, RawRequest, RequestType, Role, ToolCall, UnifiedMessage,
            UnifiedRequest, UnifiedResponse, UnifiedTool, Usage, to_openai,
        },
    },
    streams::{ByteStream, UnifiedStream},
};

pub(crate) struct ResponsesInbound;

impl InboundTransformer for ResponsesInbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::OpenAiResponses
    }

    fn parse_request(&self, raw: &RawRequest) -> GatewayResult<UnifiedRequest> {
        require_json_body(raw)?;

        let request: responses::ResponsesRequest = sonic_rs::from_slice(&raw.body)
            .map_err(|error| GatewayError::InvalidRequest(format!("malformed responses request: {error}")))?;

        if request.model.is_empty() {
            return Err(GatewayError::InvalidRequest("model is required".to_string()));
        }

        let mut unified = UnifiedRequest::new(RequestType::Responses, ApiFormat::OpenAiResponses, request.model);

        if let Some(instructions) = request.instructions {
            unified.messages.push(UnifiedMessage::text(Role::System, instructions));
        }

        match request.input {
            responses::ResponsesInput::Text(text) => {
                unified.messages.push(UnifiedMessage::text(Role::User, text));
            }
            responses::ResponsesInput::Items(items) => {
                for item in items {
                    convert_item(item, &mut unified.messages);
                }
            }
        }

        unified.tools = request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| UnifiedTool::Function {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.parameters,
                })
                .collect()
        });
        unified.tool_choice = request.tool_choice;
        unified.stream = request.stream;
        unified.temperature = request.temperature;
        unified.top_p = request.top_p;
        unified.max_tokens = request.max_output_tokens;
        unified.reasoning_effort = request.reasoning.and_then(|reasoning| reasoning.effort);
        unified.raw = raw.clone();

        Ok(unified)
    }

    fn response_body(&self, response: &UnifiedResponse) -> GatewayResult<Value> {
        let wire = response_from_unified(response);

        serde_json::to_value(wire)
            .map_err(|error| GatewayError::Internal(format!("failed to serialize response: {error}")))
    }

    fn stream(&self, chunks: UnifiedStream, _request: &UnifiedRequest) -> ByteStream {
        let state = StreamState {
            chunks,
            pending: VecDeque::new(),
            collected: Vec::new(),
            started: false,
            completed: false,
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
                    Some(Ok(chunk)) => state.on_chunk(chunk),
                    Some(Err(error)) => {
                        state.pending.push_back(event_frame("error", &openai_error_body(&error)));
                        state.ended = true;
                    }
                    None => {
                        state.complete();
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
        (error.status_code(), openai_error_body(error))
    }
}

fn convert_item(item: responses::InputItem, messages: &mut Vec<UnifiedMessage>) {
    match item {
        responses::InputItem::Message { role, content } => {
            let role = match role.as_str() {
                "system" | "developer" => Role::System,
                "assistant" => Role::Assistant,
                _ => Role::User,
            };

            let text = match content {
                responses::ItemContent::Text(text) => text,
                responses::ItemContent::Parts(parts) => parts
                    .into_iter()
                    .map(|part| match part {
                        responses::ItemContentPart::InputText { text }
                        | responses::ItemContentPart::OutputText { text } => text,
                        responses::ItemContentPart::InputImage { .. } => String::new(),
                    })
                    .collect(),
            };

            messages.push(UnifiedMessage::text(role, text));
        }
        responses::InputItem::FunctionCall {
            call_id,
            name,
            arguments,
        } => messages.push(UnifiedMessage {
            role: Role::Assistant,
            content: MessageContent::Text(String::new()),
            tool_calls: Some(vec![ToolCall {
                index: 0,
                id: call_id,
                call_type: "function".to_string(),
                function: FunctionCall { name, arguments },
            }]),
            tool_call_id: None,
        }),
        responses::InputItem::FunctionCallOutput { call_id, output } => messages.push(UnifiedMessage {
            role: Role::Tool,
            content: MessageContent::Text(output),
            tool_calls: None,
            tool_call_id: Some(call_id),
        }),
    }
}

fn response_from_unified(response: &UnifiedResponse) -> responses::ResponsesResponse {
    let mut output = Vec::new();

    if let Some(choice) = response.choices.first() {
        if let Some(message) = &choice.message {
            for call in message.tool_calls.iter().flatten() {
                output.push(responses::OutputItem::FunctionCall {
                    id: format!("fc_{}", call.id),
                    call_id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                    status: "completed".to_string(),
                });
            }

            let text = message.text_content();
            if !text.is_empty() {
                output.push(responses::OutputItem::Message {
                    id: format!("msg_{}", response.id),
                    role: "assistant".to_string(),
                    status: "completed".to_string(),
                    content: vec![responses::OutputContent::OutputText {
                        text,
                        annotations: Vec::new(),
                    }],
                });
            }
        }
    }

    responses::ResponsesResponse {
        id: if response.id.is_empty() {
            format!("resp_{}", uuid::Uuid::new_v4().simple())
        } else {
            response.id.clone()
        },
        object: "response".to_string(),
        created_at: response.created,
        model: response.model.clone(),
        status: "completed".to_string(),
        output,
        usage: response.usage.as_ref().map(usage_to_responses),
    }
}

fn usage_to_responses(usage: &Usage) -> responses::ResponsesUsage {
    responses::ResponsesUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

fn event_frame(name: &str, payload: &Value) -> GatewayResult<Bytes> {
    crate::streams::sse_event(name, payload)
}

struct StreamState {
    chunks: UnifiedStream,
    pending: VecDeque<GatewayResult<Bytes>>,
    collected: Vec<UnifiedResponse>,
    started: bool,
    completed: bool,
    ended: bool,
}

impl StreamState {
    fn on_chunk(&mut self, chunk: UnifiedResponse) {
        if chunk.is_done {
            self.complete();
            self.ended = true;
            return;
        }

        if !chunk.has_meaningful_delta() {
            return;
        }

        if !self.started {
            self.started = true;
            let skeleton = json!({
                "type": "response.created",
                "response": {
                    "id": chunk.id,
                    "object": "response",
                    "status": "in_progress",
                    "model": chunk.model,
                }
            });
            self.pending.push_back(event_frame("response.created", &skeleton));
        }

        for choice in &chunk.choices {
            let Some(delta) = &choice.delta else { continue };

            if let Some(text) = &delta.content
                && !text.is_empty()
            {
                let event = json!({
                    "type": "response.output_text.delta",
                    "delta": text,
                });
                self.pending.push_back(event_frame("response.output_text.delta", &event));
            }

            for call in delta.tool_calls.iter().flatten() {
                if let Some(arguments) = call.function.as_ref().and_then(|function| function.arguments.as_ref())
                    && !arguments.is_empty()
                {
                    let event = json!({
                        "type": "response.function_call_arguments.delta",
                        "delta": arguments,
                    });
                    self.pending
                        .push_back(event_frame("response.function_call_arguments.delta", &event));
                }
            }
        }

        let finished = chunk.choices.iter().any(|choice| choice.finish_reason.is_some());
        self.collected.push(chunk);

        if finished {
            self.complete();
        }
    }

    fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;

        let aggregated = to_openai::aggregate_chunks(&self.collected);
        let response = response_from_unified(&aggregated);

        match serde_json::to_value(&response) {
            Ok(body) => {
                let event = json!({
                    "type": "response.completed",
                    "response": body,
                });
                self.pending.push_back(event_frame("response.completed", &event));
            }
            Err(error) => self.pending.push_back(Err(GatewayError::Internal(format!(
                "failed to serialize completed response: {error}"
            )))),
        }
    }
}
