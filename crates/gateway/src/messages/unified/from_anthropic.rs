//! Conversions from Anthropic wire types into the unified model.

use serde_json::Value;

use super::{
    ApiFormat, ContentPart, FinishReason, FunctionCall, ImageSource, MessageContent, RequestType, Role, ToolCall,
    UnifiedChoice, UnifiedMessage, UnifiedRequest, UnifiedResponse, UnifiedTool, Usage,
};
use crate::messages::anthropic;

impl From<anthropic::MessagesRequest> for UnifiedRequest {
    fn from(request: anthropic::MessagesRequest) -> Self {
        let mut unified = UnifiedRequest::new(RequestType::Chat, ApiFormat::Anthropic, request.model);

        if let Some(system) = request.system {
            unified.messages.push(UnifiedMessage::text(Role::System, system.as_text()));
        }

        for message in request.messages {
            convert_message(message, &mut unified.messages);
        }

        unified.tools = convert_tools(request.tools);
        unified.tool_choice = request.tool_choice;
        unified.stream = request.stream;
        unified.temperature = request.temperature;
        unified.top_p = request.top_p;
        unified.top_k = request.top_k;
        unified.max_tokens = Some(request.max_tokens);
        unified.stop = request.stop_sequences;

        unified
    }
}

/// Flatten one Anthropic message into unified messages.
///
/// Tool results embedded in user messages become separate tool-role messages
/// so the OpenAI-family outbounds can serialize them natively.
fn convert_message(message: anthropic::AnthropicMessage, output: &mut Vec<UnifiedMessage>) {
    let role = match message.role {
        anthropic::AnthropicRole::User => Role::User,
        anthropic::AnthropicRole::Assistant => Role::Assistant,
    };

    let blocks = match message.content {
        anthropic::AnthropicContent::Text(text) => {
            output.push(UnifiedMessage::text(role, text));
            return;
        }
        anthropic::AnthropicContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block {
            anthropic::ContentBlock::Text { text } => parts.push(ContentPart::Text { text }),
            anthropic::ContentBlock::Image { source } => parts.push(ContentPart::Image {
                source: match source {
                    anthropic::ImageSource::Base64 { media_type, data } => ImageSource::Base64 { media_type, data },
                    anthropic::ImageSource::Url { url } => ImageSource::Url { url },
                },
            }),
            anthropic::ContentBlock::Thinking { thinking, signature } => parts.push(ContentPart::Thinking {
                text: thinking,
                signature,
            }),
            anthropic::ContentBlock::ToolUse { id, name, input } => {
                let arguments = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string());
                tool_calls.push(ToolCall {
                    index: tool_calls.len() as u32,
                    id,
                    call_type: "function".to_string(),
                    function: FunctionCall { name, arguments },
                });
            }
            anthropic::ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                output.push(UnifiedMessage {
                    role: Role::Tool,
                    content: MessageContent::Parts(vec![ContentPart::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: content.map(|content| content.as_text()).unwrap_or_default(),
                        is_error,
                    }]),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                });
            }
        }
    }

    if parts.is_empty() && tool_calls.is_empty() {
        return;
    }

    output.push(UnifiedMessage {
        role,
        content: MessageContent::Parts(parts),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });
}

fn convert_tools(tools: Option<Vec<anthropic::AnthropicTool>>) -> Option<Vec<UnifiedTool>> {
    let tools = tools?;

    if tools.is_empty() {
        return None;
    }

    let converted = tools
        .into_iter()
        .map(|tool| match (tool.tool_type, tool.input_schema) {
            (None, schema) | (Some(_), schema @ Some(_)) => UnifiedTool::Function {
                name: tool.name,
                description: tool.description,
                parameters: schema.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            },
            (Some(tool_type), None) => UnifiedTool::AnthropicNative {
                name: tool_type,
                config: Value::Object(tool.config),
            },
        })
        .collect();

    Some(converted)
}

pub(crate) fn finish_reason_from_stop(reason: anthropic::StopReason) -> FinishReason {
    match reason {
        anthropic::StopReason::EndTurn | anthropic::StopReason::StopSequence => FinishReason::Stop,
        anthropic::StopReason::MaxTokens => FinishReason::Length,
        anthropic::StopReason::ToolUse => FinishReason::ToolCalls,
        anthropic::StopReason::Refusal => FinishReason::ContentFilter,
    }
}

pub(crate) fn usage_from_anthropic(usage: &anthropic::AnthropicUsage) -> Usage {
    Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
        prompt_tokens_details: usage.cache_read_input_tokens.map(|cached| super::PromptTokensDetails {
            cached_tokens: Some(cached),
        }),
        completion_tokens_details: None,
    }
}

impl From<anthropic::MessagesResponse> for UnifiedResponse {
    fn from(response: anthropic::MessagesResponse) -> Self {
        let mut parts = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        for block in response.content {
            match block {
                anthropic::ContentBlock::Text { text } => parts.push(ContentPart::Text { text }),
                anthropic::ContentBlock::Thinking { thinking, signature } => parts.push(ContentPart::Thinking {
                    text: thinking,
                    signature,
                }),
                anthropic::ContentBlock::ToolUse { id, name, input } => {
                    let arguments = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string());
                    tool_calls.push(ToolCall {
                        index: tool_calls.len() as u32,
                        id,
                        call_type: "function".to_string(),
                        function: FunctionCall { name, arguments },
                    });
                }
                anthropic::ContentBlock::Image { .. } | anthropic::ContentBlock::ToolResult { .. } => {}
            }
        }

        let message = UnifiedMessage {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        };

        let usage = usage_from_anthropic(&response.usage);

        Self {
            id: response.id,
            object: "chat.completion".to_string(),
            created: jiff::Timestamp::now().as_second(),
            model: response.model,
            service_tier: None,
            system_fingerprint: None,
            choices: vec![UnifiedChoice {
                index: 0,
                message: Some(message),
                delta: None,
                finish_reason: response.stop_reason.map(finish_reason_from_stop),
                logprobs: None,
            }],
            usage: Some(usage),
            payload: None,
            is_done: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn system_prompt_becomes_leading_system_message() {
        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1024,
            "system": "Be brief.",
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .unwrap();

        let unified = UnifiedRequest::from(request);

        assert_eq!(unified.messages.len(), 2);
        assert_eq!(unified.messages[0].role, Role::System);
        assert_eq!(unified.messages[0].text_content(), "Be brief.");
        assert_eq!(unified.max_tokens, Some(1024));
    }

    #[test]
    fn tool_result_blocks_become_tool_messages() {
        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "42"},
                    {"type": "text", "text": "What does that mean?"}
                ]
            }]
        }))
        .unwrap();

        let unified = UnifiedRequest::from(request);

        assert_eq!(unified.messages[0].role, Role::Tool);
        assert_eq!(unified.messages[0].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(unified.messages[1].role, Role::User);
        assert_eq!(unified.messages[1].text_content(), "What does that mean?");
    }

    #[test]
    fn native_tools_are_detected() {
        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 512,
            "messages": [],
            "tools": [
                {"name": "lookup", "input_schema": {"type": "object"}},
                {"name": "web_search", "type": "web_search_20250305", "max_uses": 3}
            ]
        }))
        .unwrap();

        let unified = UnifiedRequest::from(request);
        let tools = unified.tools.as_deref().unwrap();

        assert!(matches!(&tools[0], UnifiedTool::Function { name, .. } if name == "lookup"));
        assert!(matches!(
            &tools[1],
            UnifiedTool::AnthropicNative { name, config } if name == "web_search_20250305" && config["max_uses"] == 3
        ));
        assert!(unified.has_anthropic_native_tools());
    }

    #[test]
    fn response_maps_tool_use_and_usage() {
        let response: anthropic::MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4",
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "read", "input": {"path": "/"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 20}
        }))
        .unwrap();

        let unified = UnifiedResponse::from(response);
        let choice = &unified.choices[0];

        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));

        let message = choice.message.as_ref().unwrap();
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.arguments, "{\"path\":\"/\"}");

        let usage = unified.usage.as_ref().unwrap();
        assert_eq!(usage.total_tokens, 30);
    }
}
