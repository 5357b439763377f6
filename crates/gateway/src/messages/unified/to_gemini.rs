//! Conversions from the unified model into Gemini wire types.

use std::collections::HashMap;

use serde_json::Value;

use super::{
    ContentPart, FinishReason, ImageSource, MessageContent, Role, UnifiedMessage, UnifiedRequest, UnifiedResponse,
    UnifiedTool, Usage, to_anthropic::parse_argument_string,
};
use crate::messages::gemini;

impl From<UnifiedRequest> for gemini::GenerateContentRequest {
    fn from(request: UnifiedRequest) -> Self {
        let mut system_text = String::new();
        let mut contents: Vec<gemini::Content> = Vec::new();

        // functionResponse parts carry the function name, not the call id;
        // remember which name each id belongs to.
        let mut call_names: HashMap<String, String> = HashMap::new();

        for message in &request.messages {
            for call in message.tool_calls.iter().flatten() {
                call_names.insert(call.id.clone(), call.function.name.clone());
            }
        }

        for message in request.messages {
            match message.role {
                Role::System => {
                    if !system_text.is_empty() {
                        system_text.push('\n');
                    }
                    system_text.push_str(&message.text_content());
                }
                Role::User => contents.push(gemini::Content {
                    role: Some("user".to_string()),
                    parts: convert_parts(message),
                }),
                Role::Assistant => contents.push(gemini::Content {
                    role: Some("model".to_string()),
                    parts: convert_assistant_parts(message),
                }),
                Role::Tool => contents.push(gemini::Content {
                    role: Some("user".to_string()),
                    parts: convert_tool_result_parts(message, &call_names),
                }),
            }
        }

        let generation_config = gemini::GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop,
            candidate_count: None,
        };

        let has_config = generation_config.temperature.is_some()
            || generation_config.top_p.is_some()
            || generation_config.top_k.is_some()
            || generation_config.max_output_tokens.is_some()
            || generation_config.stop_sequences.is_some();

        Self {
            contents,
            system_instruction: (!system_text.is_empty()).then(|| gemini::Content {
                role: None,
                parts: vec![gemini::Part::text(system_text)],
            }),
            generation_config: has_config.then_some(generation_config),
            tools: convert_tools(request.tools),
            tool_config: request.tool_choice,
            safety_settings: None,
        }
    }
}

fn convert_parts(message: UnifiedMessage) -> Vec<gemini::Part> {
    match message.content {
        MessageContent::Text(text) => vec![gemini::Part::text(text)],
        MessageContent::Parts(parts) => parts.into_iter().filter_map(convert_part).collect(),
    }
}

fn convert_part(part: ContentPart) -> Option<gemini::Part> {
    match part {
        ContentPart::Text { text } => Some(gemini::Part::text(text)),
        ContentPart::Thinking { text, .. } => Some(gemini::Part {
            text: Some(text),
            thought: Some(true),
            ..Default::default()
        }),
        ContentPart::Image { source } => match source {
            ImageSource::Base64 { media_type, data } => Some(gemini::Part {
                inline_data: Some(gemini::InlineData {
                    mime_type: media_type,
                    data,
                }),
                ..Default::default()
            }),
            // Gemini only accepts inline payloads.
            ImageSource::Url { .. } => None,
        },
        ContentPart::ToolUse { name, arguments, .. } => Some(gemini::Part {
            function_call: Some(gemini::GeminiFunctionCall {
                name,
                args: parse_argument_string(&arguments),
            }),
            ..Default::default()
        }),
        ContentPart::ToolResult { .. } | ContentPart::Audio { .. } => None,
    }
}

fn convert_assistant_parts(message: UnifiedMessage) -> Vec<gemini::Part> {
    let mut parts = convert_parts(UnifiedMessage {
        tool_calls: None,
        ..message.clone()
    });

    for call in message.tool_calls.into_iter().flatten() {
        parts.push(gemini::Part {
            function_call: Some(gemini::GeminiFunctionCall {
                name: call.function.name,
                args: parse_argument_string(&call.function.arguments),
            }),
            ..Default::default()
        });
    }

    parts
}

fn convert_tool_result_parts(message: UnifiedMessage, call_names: &HashMap<String, String>) -> Vec<gemini::Part> {
    let call_id = message.tool_call_id.clone().unwrap_or_default();
    let name = call_names.get(&call_id).cloned().unwrap_or(call_id);
    let text = match &message.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .find_map(|part| match part {
                ContentPart::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap_or_else(|| message.text_content()),
    };

    // functionResponse.response must be an object.
    let response = match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => value,
        Ok(value) => serde_json::json!({ "result": value }),
        Err(_) => serde_json::json!({ "result": text }),
    };

    vec![gemini::Part {
        function_response: Some(gemini::GeminiFunctionResponse { name, response }),
        ..Default::default()
    }]
}

fn convert_tools(tools: Option<Vec<UnifiedTool>>) -> Option<Vec<gemini::GeminiTool>> {
    let tools = tools?;

    let mut declarations = Vec::new();
    let mut entries = Vec::new();

    for tool in tools {
        match tool {
            UnifiedTool::Function {
                name,
                description,
                parameters,
            } => declarations.push(gemini::FunctionDeclaration {
                name,
                description,
                parameters: Some(parameters),
            }),
            UnifiedTool::GoogleNative { name, config } => {
                let mut entry = gemini::GeminiTool::default();
                match name.as_str() {
                    "code_execution" => entry.code_execution = Some(config),
                    "url_context" => entry.url_context = Some(config),
                    _ => entry.google_search = Some(config),
                }
                entries.push(entry);
            }
            // Anthropic-native tools are not routable here; the selector
            // rejects such requests before serialization.
            UnifiedTool::AnthropicNative { .. } => {}
        }
    }

    if !declarations.is_empty() {
        entries.push(gemini::GeminiTool {
            function_declarations: Some(declarations),
            ..Default::default()
        });
    }

    (!entries.is_empty()).then_some(entries)
}

fn gemini_finish_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ToolCalls => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ContentFilter => "SAFETY",
    }
}

pub(crate) fn usage_to_metadata(usage: &Usage) -> gemini::UsageMetadata {
    gemini::UsageMetadata {
        prompt_token_count: usage.prompt_tokens,
        candidates_token_count: usage.completion_tokens,
        total_token_count: usage.total_tokens,
        cached_content_token_count: usage
            .prompt_tokens_details
            .as_ref()
            .and_then(|details| details.cached_tokens),
        thoughts_token_count: usage
            .completion_tokens_details
            .as_ref()
            .and_then(|details| details.reasoning_tokens),
    }
}

impl From<UnifiedResponse> for gemini::GenerateContentResponse {
    fn from(response: UnifiedResponse) -> Self {
        let usage_metadata = response.usage.as_ref().map(usage_to_metadata);
        let model_version = (!response.model.is_empty()).then(|| response.model.clone());
        let response_id = (!response.id.is_empty()).then(|| response.id.clone());

        let candidates = response
            .choices
            .into_iter()
            .map(|choice| {
                let mut parts = Vec::new();

                if let Some(message) = choice.message {
                    match message.content {
                        MessageContent::Text(text) => {
                            if !text.is_empty() {
                                parts.push(gemini::Part::text(text));
                            }
                        }
                        MessageContent::Parts(content_parts) => {
                            parts.extend(content_parts.into_iter().filter_map(convert_part));
                        }
                    }

                    for call in message.tool_calls.into_iter().flatten() {
                        parts.push(gemini::Part {
                            function_call: Some(gemini::GeminiFunctionCall {
                                name: call.function.name,
                                args: parse_argument_string(&call.function.arguments),
                            }),
                            ..Default::default()
                        });
                    }
                }

                gemini::Candidate {
                    content: Some(gemini::Content {
                        role: Some("model".to_string()),
                        parts,
                    }),
                    finish_reason: choice.finish_reason.map(|reason| gemini_finish_reason(reason).to_string()),
                    index: choice.index,
                }
            })
            .collect();

        Self {
            candidates,
            usage_metadata,
            model_version,
            response_id,
        }
    }
}

/// Convert one unified stream chunk into a Gemini streaming chunk.
pub(crate) fn chunk_from_unified(chunk: &UnifiedResponse) -> gemini::GenerateContentResponse {
    let candidates = chunk
        .choices
        .iter()
        .map(|choice| {
            let mut parts = Vec::new();

            if let Some(delta) = &choice.delta {
                if let Some(text) = &delta.reasoning_content {
                    parts.push(gemini::Part {
                        text: Some(text.clone()),
                        thought: Some(true),
                        ..Default::default()
                    });
                }

                if let Some(text) = &delta.content {
                    parts.push(gemini::Part::text(text.clone()));
                }

                for call in delta.tool_calls.iter().flatten() {
                    let Some(function) = &call.function else { continue };
                    let Some(name) = &function.name else { continue };

                    parts.push(gemini::Part {
                        function_call: Some(gemini::GeminiFunctionCall {
                            name: name.clone(),
                            args: parse_argument_string(function.arguments.as_deref().unwrap_or("")),
                        }),
                        ..Default::default()
                    });
                }
            }

            gemini::Candidate {
                content: Some(gemini::Content {
                    role: Some("model".to_string()),
                    parts,
                }),
                finish_reason: choice.finish_reason.map(|reason| gemini_finish_reason(reason).to_string()),
                index: choice.index,
            }
        })
        .collect();

    gemini::GenerateContentResponse {
        candidates,
        usage_metadata: chunk.usage.as_ref().map(usage_to_metadata),
        model_version: (!chunk.model.is_empty()).then(|| chunk.model.clone()),
        response_id: (!chunk.id.is_empty()).then(|| chunk.id.clone()),
    }
}
