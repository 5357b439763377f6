//! Conversions from Gemini wire types into the unified model.
//!
//! Gemini has no tool-call ids; deterministic `call_<n>` ids are minted in
//! document order and `functionResponse` parts are correlated back by
//! function name.

use std::collections::HashMap;

use super::{
    ApiFormat, ContentPart, FinishReason, FunctionCall, FunctionDelta, ImageSource, MessageContent, RequestType, Role,
    ToolCall, ToolCallDelta, UnifiedChoice, UnifiedDelta, UnifiedMessage, UnifiedRequest, UnifiedResponse,
    UnifiedTool, Usage,
};
use crate::messages::gemini;

impl From<gemini::GenerateContentRequest> for UnifiedRequest {
    fn from(request: gemini::GenerateContentRequest) -> Self {
        let mut unified = UnifiedRequest::new(RequestType::Chat, ApiFormat::Gemini, String::new());

        if let Some(instruction) = request.system_instruction {
            let text: String = instruction.parts.iter().filter_map(|part| part.text.as_deref()).collect();
            if !text.is_empty() {
                unified.messages.push(UnifiedMessage::text(Role::System, text));
            }
        }

        let mut minted_ids: HashMap<String, String> = HashMap::new();
        let mut next_call = 0usize;

        for content in request.contents {
            convert_content(content, &mut unified.messages, &mut minted_ids, &mut next_call);
        }

        if let Some(config) = request.generation_config {
            unified.temperature = config.temperature;
            unified.top_p = config.top_p;
            unified.top_k = config.top_k;
            unified.max_tokens = config.max_output_tokens;
            unified.stop = config.stop_sequences;
        }

        unified.tools = convert_tools(request.tools);
        unified.tool_choice = request.tool_config;

        unified
    }
}

fn convert_content(
    content: gemini::Content,
    output: &mut Vec<UnifiedMessage>,
    minted_ids: &mut HashMap<String, String>,
    next_call: &mut usize,
) {
    let role = match content.role.as_deref() {
        Some("model") => Role::Assistant,
        _ => Role::User,
    };

    let mut parts = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for part in content.parts {
        if let Some(text) = part.text {
            if part.thought.unwrap_or(false) {
                parts.push(ContentPart::Thinking { text, signature: None });
            } else {
                parts.push(ContentPart::Text { text });
            }
        } else if let Some(inline) = part.inline_data {
            parts.push(ContentPart::Image {
                source: ImageSource::Base64 {
                    media_type: inline.mime_type,
                    data: inline.data,
                },
            });
        } else if let Some(call) = part.function_call {
            let id = format!("call_{next_call}");
            *next_call += 1;
            minted_ids.insert(call.name.clone(), id.clone());

            let arguments = serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string());
            tool_calls.push(ToolCall {
                index: tool_calls.len() as u32,
                id,
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: call.name,
                    arguments,
                },
            });
        } else if let Some(response) = part.function_response {
            let tool_call_id = minted_ids
                .get(&response.name)
                .cloned()
                .unwrap_or_else(|| response.name.clone());
            let content = serde_json::to_string(&response.response).unwrap_or_default();

            output.push(UnifiedMessage {
                role: Role::Tool,
                content: MessageContent::Parts(vec![ContentPart::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content,
                    is_error: None,
                }]),
                tool_calls: None,
                tool_call_id: Some(tool_call_id),
            });
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

fn convert_tools(tools: Option<Vec<gemini::GeminiTool>>) -> Option<Vec<UnifiedTool>> {
    let tools = tools?;
    let mut converted = Vec::new();

    for tool in tools {
        for declaration in tool.function_declarations.into_iter().flatten() {
            converted.push(UnifiedTool::Function {
                name: declaration.name,
                description: declaration.description,
                parameters: declaration
                    .parameters
                    .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            });
        }

        if let Some(config) = tool.google_search {
            converted.push(UnifiedTool::GoogleNative {
                name: "google_search".to_string(),
                config,
            });
        }

        if let Some(config) = tool.code_execution {
            converted.push(UnifiedTool::GoogleNative {
                name: "code_execution".to_string(),
                config,
            });
        }

        if let Some(config) = tool.url_context {
            converted.push(UnifiedTool::GoogleNative {
                name: "url_context".to_string(),
                config,
            });
        }
    }

    (!converted.is_empty()).then_some(converted)
}

pub(crate) fn finish_reason_from_gemini(reason: &str, has_tool_calls: bool) -> FinishReason {
    if has_tool_calls {
        return FinishReason::ToolCalls;
    }

    match reason {
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

pub(crate) fn usage_from_metadata(metadata: &gemini::UsageMetadata) -> Usage {
    Usage {
        prompt_tokens: metadata.prompt_token_count,
        completion_tokens: metadata.candidates_token_count,
        total_tokens: metadata.total_token_count,
        prompt_tokens_details: metadata.cached_content_token_count.map(|cached| super::PromptTokensDetails {
            cached_tokens: Some(cached),
        }),
        completion_tokens_details: metadata.thoughts_token_count.map(|thoughts| {
            super::CompletionTokensDetails {
                reasoning_tokens: Some(thoughts),
            }
        }),
    }
}

impl From<gemini::GenerateContentResponse> for UnifiedResponse {
    fn from(response: gemini::GenerateContentResponse) -> Self {
        let usage = response.usage_metadata.as_ref().map(usage_from_metadata);
        let model = response.model_version.clone().unwrap_or_default();

        let choices = response
            .candidates
            .into_iter()
            .map(|candidate| {
                let mut parts = Vec::new();
                let mut tool_calls: Vec<ToolCall> = Vec::new();

                for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
                    if let Some(text) = part.text {
                        if part.thought.unwrap_or(false) {
                            parts.push(ContentPart::Thinking { text, signature: None });
                        } else {
                            parts.push(ContentPart::Text { text });
                        }
                    } else if let Some(call) = part.function_call {
                        let arguments = serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string());
                        tool_calls.push(ToolCall {
                            index: tool_calls.len() as u32,
                            id: format!("call_{}", tool_calls.len()),
                            call_type: "function".to_string(),
                            function: FunctionCall {
                                name: call.name,
                                arguments,
                            },
                        });
                    }
                }

                let finish_reason = candidate
                    .finish_reason
                    .as_deref()
                    .map(|reason| finish_reason_from_gemini(reason, !tool_calls.is_empty()));

                UnifiedChoice {
                    index: candidate.index,
                    message: Some(UnifiedMessage {
                        role: Role::Assistant,
                        content: MessageContent::Parts(parts),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    }),
                    delta: None,
                    finish_reason,
                    logprobs: None,
                }
            })
            .collect();

        Self {
            id: response.response_id.unwrap_or_default(),
            object: "chat.completion".to_string(),
            created: jiff::Timestamp::now().as_second(),
            model,
            service_tier: None,
            system_fingerprint: None,
            choices,
            usage,
            payload: None,
            is_done: false,
        }
    }
}

/// Convert one streaming chunk into delta form.
pub(crate) fn chunk_to_unified(response: gemini::GenerateContentResponse) -> UnifiedResponse {
    let usage = response.usage_metadata.as_ref().map(usage_from_metadata);
    let model = response.model_version.clone().unwrap_or_default();

    let choices = response
        .candidates
        .into_iter()
        .map(|candidate| {
            let mut content = String::new();
            let mut reasoning = String::new();
            let mut tool_calls: Vec<ToolCallDelta> = Vec::new();

            for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
                if let Some(text) = part.text {
                    if part.thought.unwrap_or(false) {
                        reasoning.push_str(&text);
                    } else {
                        content.push_str(&text);
                    }
                } else if let Some(call) = part.function_call {
                    let arguments = serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string());
                    tool_calls.push(ToolCallDelta {
                        index: tool_calls.len() as u32,
                        id: Some(format!("call_{}", tool_calls.len())),
                        call_type: Some("function".to_string()),
                        function: Some(FunctionDelta {
                            name: Some(call.name),
                            arguments: Some(arguments),
                        }),
                    });
                }
            }

            let finish_reason = candidate
                .finish_reason
                .as_deref()
                .map(|reason| finish_reason_from_gemini(reason, !tool_calls.is_empty()));

            UnifiedChoice {
                index: candidate.index,
                message: None,
                delta: Some(UnifiedDelta {
                    role: Some(Role::Assistant),
                    content: (!content.is_empty()).then_some(content),
                    reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                    reasoning_signature: None,
                    refusal: None,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                }),
                finish_reason,
                logprobs: None,
            }
        })
        .collect();

    UnifiedResponse {
        id: response.response_id.unwrap_or_default(),
        object: "chat.completion.chunk".to_string(),
        created: jiff::Timestamp::now().as_second(),
        model,
        service_tier: None,
        system_fingerprint: None,
        choices,
        usage,
        payload: None,
        is_done: false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn contents_convert_to_messages() {
        let request: gemini::GenerateContentRequest = serde_json::from_value(json!({
            "systemInstruction": {"parts": [{"text": "Be brief."}]},
            "contents": [
                {"role": "user", "parts": [{"text": "Explain quantum physics."}]}
            ]
        }))
        .unwrap();

        let unified = UnifiedRequest::from(request);

        assert_eq!(unified.messages.len(), 2);
        assert_eq!(unified.messages[0].role, Role::System);
        assert_eq!(unified.messages[1].role, Role::User);
        assert_eq!(unified.messages[1].text_content(), "Explain quantum physics.");
    }

    #[test]
    fn function_responses_correlate_with_minted_ids() {
        let request: gemini::GenerateContentRequest = serde_json::from_value(json!({
            "contents": [
                {"role": "model", "parts": [{"functionCall": {"name": "read", "args": {"path": "/"}}}]},
                {"role": "user", "parts": [{"functionResponse": {"name": "read", "response": {"content": "ok"}}}]}
            ]
        }))
        .unwrap();

        let unified = UnifiedRequest::from(request);

        let assistant = &unified.messages[0];
        let call_id = &assistant.tool_calls.as_ref().unwrap()[0].id;
        assert_eq!(call_id, "call_0");

        let tool = &unified.messages[1];
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_0"));
    }

    #[test]
    fn safety_finish_maps_to_content_filter() {
        assert_eq!(finish_reason_from_gemini("SAFETY", false), FinishReason::ContentFilter);
        assert_eq!(finish_reason_from_gemini("STOP", false), FinishReason::Stop);
        assert_eq!(finish_reason_from_gemini("STOP", true), FinishReason::ToolCalls);
    }

    #[test]
    fn response_usage_maps_token_counts() {
        let response: gemini::GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello"}]},
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {
                "promptTokenCount": 4,
                "candidatesTokenCount": 2,
                "totalTokenCount": 6
            }
        }))
        .unwrap();

        let unified = UnifiedResponse::from(response);

        assert_eq!(unified.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(unified.usage.as_ref().unwrap().total_tokens, 6);
        assert_eq!(
            unified.choices[0].message.as_ref().unwrap().text_content(),
            "Hello"
        );
    }
}
