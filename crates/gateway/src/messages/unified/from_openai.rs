//! Conversions from OpenAI wire types into the unified model.

use serde_json::Value;

use super::{
    ApiFormat, ContentPart, FinishReason, FunctionCall, FunctionDelta, ImageSource, MessageContent, RequestType, Role,
    StreamOptions, ToolCall, ToolCallDelta, UnifiedChoice, UnifiedDelta, UnifiedMessage, UnifiedRequest,
    UnifiedResponse, UnifiedTool,
};
use crate::messages::openai;

const GOOGLE_NATIVE_TOOLS: &[&str] = &["google_search", "google_search_retrieval", "code_execution", "url_context"];

impl From<openai::ChatCompletionRequest> for UnifiedRequest {
    fn from(request: openai::ChatCompletionRequest) -> Self {
        let mut unified = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, request.model);

        unified.messages = request.messages.into_iter().map(UnifiedMessage::from).collect();
        unified.tools = convert_tools(request.tools);
        unified.tool_choice = request.tool_choice;
        unified.stream = request.stream;
        unified.stream_options = request.stream_options.map(|options| StreamOptions {
            include_usage: options.include_usage,
        });
        unified.temperature = request.temperature;
        unified.top_p = request.top_p;
        unified.max_tokens = request.max_completion_tokens.or(request.max_tokens);
        unified.stop = request.stop.map(openai::StringOrArray::into_vec);
        unified.presence_penalty = request.presence_penalty;
        unified.frequency_penalty = request.frequency_penalty;
        unified.reasoning_effort = request.reasoning_effort;

        unified
    }
}

fn convert_tools(tools: Option<Vec<openai::Tool>>) -> Option<Vec<UnifiedTool>> {
    let tools = tools?;

    if tools.is_empty() {
        return None;
    }

    let converted = tools
        .into_iter()
        .map(|tool| match (tool.tool_type.as_str(), tool.function) {
            ("function", Some(function)) => UnifiedTool::Function {
                name: function.name,
                description: function.description,
                parameters: function.parameters,
            },
            (native, _) if GOOGLE_NATIVE_TOOLS.contains(&native) => UnifiedTool::GoogleNative {
                name: native.to_string(),
                config: Value::Object(tool.config),
            },
            (native, _) => UnifiedTool::AnthropicNative {
                name: native.to_string(),
                config: Value::Object(tool.config),
            },
        })
        .collect();

    Some(converted)
}

impl From<openai::ChatMessage> for UnifiedMessage {
    fn from(message: openai::ChatMessage) -> Self {
        let role = match message.role {
            openai::ChatRole::System | openai::ChatRole::Developer => Role::System,
            openai::ChatRole::User => Role::User,
            openai::ChatRole::Assistant => Role::Assistant,
            openai::ChatRole::Tool => Role::Tool,
        };

        let content = match message.content {
            Some(openai::MessageContent::Text(text)) => MessageContent::Text(text),
            Some(openai::MessageContent::Parts(parts)) => {
                MessageContent::Parts(parts.into_iter().map(ContentPart::from).collect())
            }
            None => MessageContent::Text(String::new()),
        };

        let tool_calls = message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .enumerate()
                .map(|(position, call)| ToolCall {
                    index: call.index.unwrap_or(position as u32),
                    id: call.id,
                    call_type: call.call_type,
                    function: FunctionCall {
                        name: call.function.name,
                        arguments: call.function.arguments,
                    },
                })
                .collect()
        });

        Self {
            role,
            content,
            tool_calls,
            tool_call_id: message.tool_call_id,
        }
    }
}

impl From<openai::ContentPart> for ContentPart {
    fn from(part: openai::ContentPart) -> Self {
        match part {
            openai::ContentPart::Text { text } => Self::Text { text },
            openai::ContentPart::ImageUrl { image_url } => Self::Image {
                source: image_source_from_url(image_url.url),
            },
            openai::ContentPart::InputAudio { input_audio } => Self::Audio {
                data: input_audio.data,
                format: input_audio.format,
            },
        }
    }
}

/// Split a `data:` URL into its media type and payload; anything else stays a
/// reference.
fn image_source_from_url(url: String) -> ImageSource {
    let Some(rest) = url.strip_prefix("data:") else {
        return ImageSource::Url { url };
    };

    match rest.split_once(";base64,") {
        Some((media_type, data)) => ImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        },
        None => ImageSource::Url { url },
    }
}

pub(crate) fn finish_reason_from_str(reason: &str) -> Option<FinishReason> {
    match reason {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" | "function_call" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

impl From<openai::ChatCompletionResponse> for UnifiedResponse {
    fn from(response: openai::ChatCompletionResponse) -> Self {
        let choices = response
            .choices
            .into_iter()
            .map(|choice| {
                let finish_reason = choice.finish_reason.as_deref().and_then(finish_reason_from_str);
                let mut message = UnifiedMessage::from(choice.message);
                message.role = Role::Assistant;

                UnifiedChoice {
                    index: choice.index,
                    message: Some(message),
                    delta: None,
                    finish_reason,
                    logprobs: choice.logprobs,
                }
            })
            .collect();

        Self {
            id: response.id,
            object: response.object,
            created: response.created,
            model: response.model,
            service_tier: response.service_tier,
            system_fingerprint: response.system_fingerprint,
            choices,
            usage: response.usage,
            payload: None,
            is_done: false,
        }
    }
}

impl From<openai::ChatCompletionChunk> for UnifiedResponse {
    fn from(chunk: openai::ChatCompletionChunk) -> Self {
        let choices = chunk
            .choices
            .into_iter()
            .map(|choice| UnifiedChoice {
                index: choice.index,
                message: None,
                delta: Some(UnifiedDelta::from(choice.delta)),
                finish_reason: choice.finish_reason.as_deref().and_then(finish_reason_from_str),
                logprobs: choice.logprobs,
            })
            .collect();

        Self {
            id: chunk.id,
            object: chunk.object,
            created: chunk.created,
            model: chunk.model,
            service_tier: chunk.service_tier,
            system_fingerprint: chunk.system_fingerprint,
            choices,
            usage: chunk.usage,
            payload: None,
            is_done: false,
        }
    }
}

impl From<openai::ChunkDelta> for UnifiedDelta {
    fn from(delta: openai::ChunkDelta) -> Self {
        let role = delta.role.map(|role| match role {
            openai::ChatRole::Assistant => Role::Assistant,
            openai::ChatRole::System | openai::ChatRole::Developer => Role::System,
            openai::ChatRole::User => Role::User,
            openai::ChatRole::Tool => Role::Tool,
        });

        let tool_calls = delta.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    call_type: call.call_type,
                    function: call.function.map(|function| FunctionDelta {
                        name: function.name,
                        arguments: function.arguments,
                    }),
                })
                .collect()
        });

        Self {
            role,
            content: delta.content,
            reasoning_content: delta.reasoning_content,
            reasoning_signature: delta.reasoning_signature,
            refusal: delta.refusal,
            tool_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use serde_json::json;

    use crate::messages::unified::{ApiFormat, ImageSource, MessageContent, Role, UnifiedRequest, UnifiedTool};

    fn parse(body: serde_json::Value) -> UnifiedRequest {
        let request: crate::messages::openai::ChatCompletionRequest = serde_json::from_value(body).unwrap();
        UnifiedRequest::from(request)
    }

    #[test]
    fn basic_request() {
        let unified = parse(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello, how are you?"}],
            "temperature": 0.7
        }));

        assert_eq!(unified.api_format, ApiFormat::OpenAiChat);
        assert_eq!(unified.model, "gpt-4");
        assert_eq!(unified.messages[0].role, Role::User);
        assert_eq!(unified.messages[0].text_content(), "Hello, how are you?");
        assert!((unified.temperature.unwrap() - 0.7).abs() < 0.0001);
    }

    #[test]
    fn max_completion_tokens_wins_over_legacy_field() {
        let unified = parse(json!({
            "model": "gpt-4",
            "messages": [],
            "max_tokens": 100,
            "max_completion_tokens": 200
        }));

        assert_eq!(unified.max_tokens, Some(200));
    }

    #[test]
    fn data_url_becomes_inline_image() {
        let unified = parse(json!({
            "model": "gpt-4o",
            "messages": [{
                "role": "user",
                "content": [{
                    "type": "image_url",
                    "image_url": {"url": "data:image/png;base64,iVBORw0KGgo="}
                }]
            }]
        }));

        let MessageContent::Parts(parts) = &unified.messages[0].content else {
            panic!("expected parts");
        };
        let crate::messages::unified::ContentPart::Image { source } = &parts[0] else {
            panic!("expected image part");
        };
        assert!(
            matches!(source, ImageSource::Base64 { media_type, data } if media_type == "image/png" && data == "iVBORw0KGgo=")
        );
    }

    #[test]
    fn google_search_tool_is_native() {
        let unified = parse(json!({
            "model": "gpt-4o",
            "messages": [],
            "tools": [{"type": "google_search"}]
        }));

        assert!(matches!(
            unified.tools.as_deref(),
            Some([UnifiedTool::GoogleNative { name, .. }]) if name == "google_search"
        ));
        assert!(unified.has_google_native_tools());
    }

    #[test]
    fn tool_call_indexes_fall_back_to_position() {
        let unified = parse(json!({
            "model": "gpt-4",
            "messages": [{
                "role": "assistant",
                "content": null,
                "tool_calls": [
                    {"id": "call_a", "type": "function", "function": {"name": "f", "arguments": "{}"}},
                    {"id": "call_b", "type": "function", "function": {"name": "g", "arguments": "{}"}}
                ]
            }]
        }));

        let calls = unified.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[1].index, 1);
    }
}
