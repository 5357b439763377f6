//! Conversions from the unified model into Anthropic wire types.

use serde_json::Value;

use super::{
    ContentPart, FinishReason, ImageSource, MessageContent, Role, UnifiedMessage, UnifiedRequest, UnifiedResponse,
    UnifiedTool, Usage,
};
use crate::messages::anthropic;

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Parse a tool-call argument string into a JSON value.
///
/// Invalid JSON is preserved as a string so the upstream sees what the model
/// produced; empty input becomes an empty object.
pub(crate) fn parse_argument_string(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

impl From<UnifiedRequest> for anthropic::MessagesRequest {
    fn from(request: UnifiedRequest) -> Self {
        let mut system_text = String::new();
        let mut messages: Vec<anthropic::AnthropicMessage> = Vec::new();

        for message in request.messages {
            match message.role {
                Role::System => {
                    if !system_text.is_empty() {
                        system_text.push('\n');
                    }
                    system_text.push_str(&message.text_content());
                }
                Role::User => messages.push(anthropic::AnthropicMessage {
                    role: anthropic::AnthropicRole::User,
                    content: convert_content(message),
                }),
                Role::Assistant => messages.push(anthropic::AnthropicMessage {
                    role: anthropic::AnthropicRole::Assistant,
                    content: convert_assistant_content(message),
                }),
                Role::Tool => messages.push(anthropic::AnthropicMessage {
                    role: anthropic::AnthropicRole::User,
                    content: convert_tool_result(message),
                }),
            }
        }

        let tools = request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| match tool {
                    UnifiedTool::Function {
                        name,
                        description,
                        parameters,
                    } => anthropic::AnthropicTool {
                        name,
                        tool_type: None,
                        description,
                        input_schema: Some(parameters),
                        config: serde_json::Map::new(),
                    },
                    UnifiedTool::AnthropicNative { name, config } | UnifiedTool::GoogleNative { name, config } => {
                        let config = match config {
                            Value::Object(map) => map,
                            _ => serde_json::Map::new(),
                        };
                        let name_field = config
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or(&name)
                            .to_string();

                        anthropic::AnthropicTool {
                            name: name_field,
                            tool_type: Some(name),
                            description: None,
                            input_schema: None,
                            config,
                        }
                    }
                })
                .collect()
        });

        Self {
            model: request.model,
            messages,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: (!system_text.is_empty()).then_some(anthropic::SystemPrompt::Text(system_text)),
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            stop_sequences: request.stop,
            stream: request.stream,
            tools,
            tool_choice: request.tool_choice,
            thinking: None,
            metadata: None,
        }
    }
}

fn convert_content(message: UnifiedMessage) -> anthropic::AnthropicContent {
    match message.content {
        MessageContent::Text(text) => anthropic::AnthropicContent::Text(text),
        MessageContent::Parts(parts) => {
            let blocks = parts.into_iter().filter_map(convert_part).collect();
            anthropic::AnthropicContent::Blocks(blocks)
        }
    }
}

fn convert_part(part: ContentPart) -> Option<anthropic::ContentBlock> {
    match part {
        ContentPart::Text { text } => Some(anthropic::ContentBlock::Text { text }),
        ContentPart::Image { source } => Some(anthropic::ContentBlock::Image {
            source: match source {
                ImageSource::Base64 { media_type, data } => anthropic::ImageSource::Base64 { media_type, data },
                ImageSource::Url { url } => anthropic::ImageSource::Url { url },
            },
        }),
        ContentPart::Thinking { text, signature } => Some(anthropic::ContentBlock::Thinking {
            thinking: text,
            signature,
        }),
        ContentPart::ToolUse { id, name, arguments } => Some(anthropic::ContentBlock::ToolUse {
            id,
            name,
            input: parse_argument_string(&arguments),
        }),
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(anthropic::ContentBlock::ToolResult {
            tool_use_id,
            content: Some(anthropic::ToolResultContent::Text(content)),
            is_error,
        }),
        // Anthropic has no audio input block.
        ContentPart::Audio { .. } => None,
    }
}

fn convert_assistant_content(message: UnifiedMessage) -> anthropic::AnthropicContent {
    let mut blocks = Vec::new();

    match message.content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                blocks.push(anthropic::ContentBlock::Text { text });
            }
        }
        MessageContent::Parts(parts) => {
            blocks.extend(parts.into_iter().filter_map(convert_part));
        }
    }

    for call in message.tool_calls.into_iter().flatten() {
        blocks.push(anthropic::ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input: parse_argument_string(&call.function.arguments),
        });
    }

    anthropic::AnthropicContent::Blocks(blocks)
}

fn convert_tool_result(message: UnifiedMessage) -> anthropic::AnthropicContent {
    let tool_use_id = message.tool_call_id.clone().unwrap_or_default();

    let block = match &message.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .find_map(|part| match part {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(anthropic::ContentBlock::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: Some(anthropic::ToolResultContent::Text(content.clone())),
                    is_error: *is_error,
                }),
                _ => None,
            })
            .unwrap_or(anthropic::ContentBlock::ToolResult {
                tool_use_id,
                content: Some(anthropic::ToolResultContent::Text(message.text_content())),
                is_error: None,
            }),
        MessageContent::Text(text) => anthropic::ContentBlock::ToolResult {
            tool_use_id,
            content: Some(anthropic::ToolResultContent::Text(text.clone())),
            is_error: None,
        },
    };

    anthropic::AnthropicContent::Blocks(vec![block])
}

pub(crate) fn stop_reason_from_finish(reason: FinishReason) -> anthropic::StopReason {
    match reason {
        FinishReason::Stop => anthropic::StopReason::EndTurn,
        FinishReason::Length => anthropic::StopReason::MaxTokens,
        FinishReason::ToolCalls => anthropic::StopReason::ToolUse,
        FinishReason::ContentFilter => anthropic::StopReason::Refusal,
    }
}

pub(crate) fn usage_to_anthropic(usage: &Usage) -> anthropic::AnthropicUsage {
    anthropic::AnthropicUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: usage
            .prompt_tokens_details
            .as_ref()
            .and_then(|details| details.cached_tokens),
    }
}

impl From<UnifiedResponse> for anthropic::MessagesResponse {
    fn from(response: UnifiedResponse) -> Self {
        let mut content = Vec::new();
        let mut stop_reason = None;

        if let Some(choice) = response.choices.into_iter().next() {
            stop_reason = choice.finish_reason.map(stop_reason_from_finish);

            if let Some(message) = choice.message {
                match &message.content {
                    MessageContent::Text(text) => {
                        if !text.is_empty() {
                            content.push(anthropic::ContentBlock::Text { text: text.clone() });
                        }
                    }
                    MessageContent::Parts(parts) => {
                        for part in parts.clone() {
                            if let Some(block) = convert_part(part) {
                                content.push(block);
                            }
                        }
                    }
                }

                for call in message.tool_calls.into_iter().flatten() {
                    content.push(anthropic::ContentBlock::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input: parse_argument_string(&call.function.arguments),
                    });
                }
            }
        }

        Self {
            id: response.id,
            response_type: "message".to_string(),
            role: anthropic::AnthropicRole::Assistant,
            content,
            model: response.model,
            stop_reason,
            stop_sequence: None,
            usage: response
                .usage
                .as_ref()
                .map(usage_to_anthropic)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use serde_json::json;

    use super::*;
    use crate::messages::unified::{ApiFormat, FunctionCall, RequestType, ToolCall, UnifiedChoice};

    #[test]
    fn parse_argument_string_handles_invalid_json() {
        let raw = r#"{"command": "echo "hello""}"#;
        let value = parse_argument_string(raw);
        assert!(matches!(value, Value::String(text) if text == raw));
    }

    #[test]
    fn parse_argument_string_handles_empty_string() {
        assert_eq!(parse_argument_string(""), json!({}));
    }

    #[test]
    fn system_messages_collapse_into_system_field() {
        let mut unified = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "gpt-4");
        unified.messages.push(UnifiedMessage::text(Role::System, "Be brief."));
        unified
            .messages
            .push(UnifiedMessage::text(Role::User, "Hello, how are you?"));
        unified.temperature = Some(0.7);

        let wire = anthropic::MessagesRequest::from(unified);

        assert_eq!(wire.system.unwrap().as_text(), "Be brief.");
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.max_tokens, DEFAULT_MAX_TOKENS);

        let json = serde_json::to_value(&wire.messages[0]).unwrap();
        assert_eq!(json, json!({"role": "user", "content": "Hello, how are you?"}));
    }

    #[test]
    fn assistant_tool_calls_become_tool_use_blocks() {
        let mut unified = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "gpt-4");
        unified.messages.push(UnifiedMessage {
            role: Role::Assistant,
            content: MessageContent::Text("Let me check.".to_string()),
            tool_calls: Some(vec![ToolCall {
                index: 0,
                id: "call_1".to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: "read".to_string(),
                    arguments: "{\"path\": \"/\"}".to_string(),
                },
            }]),
            tool_call_id: None,
        });

        let wire = anthropic::MessagesRequest::from(unified);
        let json = serde_json::to_value(&wire.messages[0]).unwrap();

        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "tool_use");
        assert_eq!(json["content"][1]["input"], json!({"path": "/"}));
    }

    #[test]
    fn tool_messages_become_tool_result_blocks() {
        let mut unified = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "gpt-4");
        unified.messages.push(UnifiedMessage {
            role: Role::Tool,
            content: MessageContent::Text("42".to_string()),
            tool_calls: None,
            tool_call_id: Some("call_1".to_string()),
        });

        let wire = anthropic::MessagesRequest::from(unified);
        let json = serde_json::to_value(&wire.messages[0]).unwrap();

        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "tool_result");
        assert_eq!(json["content"][0]["tool_use_id"], "call_1");
        assert_eq!(json["content"][0]["content"], "42");
    }

    #[test]
    fn response_conversion_emits_message_shape() {
        let mut response = UnifiedResponse::empty("claude-sonnet-4");
        response.id = "msg_1".to_string();
        response.choices.push(UnifiedChoice {
            index: 0,
            message: Some(UnifiedMessage::text(Role::Assistant, "Hi there.")),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        });
        response.usage = Some(Usage {
            prompt_tokens: 5,
            completion_tokens: 7,
            total_tokens: 12,
            ..Default::default()
        });

        let wire = anthropic::MessagesResponse::from(response);

        assert_eq!(wire.response_type, "message");
        assert_eq!(wire.stop_reason, Some(anthropic::StopReason::EndTurn));
        assert_eq!(wire.usage.input_tokens, 5);
        assert_eq!(wire.usage.output_tokens, 7);
    }
}
