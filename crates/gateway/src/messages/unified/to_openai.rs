//! Conversions from the unified model into OpenAI wire types.

use serde_json::Value;

use super::{
    ContentPart, FinishReason, ImageSource, MessageContent, Role, UnifiedChoice, UnifiedDelta, UnifiedMessage,
    UnifiedRequest, UnifiedResponse, UnifiedTool,
};
use crate::messages::openai;

impl From<UnifiedRequest> for openai::ChatCompletionRequest {
    fn from(request: UnifiedRequest) -> Self {
        let messages = request.messages.into_iter().map(openai::ChatMessage::from).collect();

        let tools = request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| match tool {
                    UnifiedTool::Function {
                        name,
                        description,
                        parameters,
                    } => openai::Tool {
                        tool_type: "function".to_string(),
                        function: Some(openai::FunctionDefinition {
                            name,
                            description,
                            parameters,
                            strict: None,
                        }),
                        config: serde_json::Map::new(),
                    },
                    UnifiedTool::GoogleNative { name, config } | UnifiedTool::AnthropicNative { name, config } => {
                        openai::Tool {
                            tool_type: name,
                            function: None,
                            config: match config {
                                Value::Object(map) => map,
                                _ => serde_json::Map::new(),
                            },
                        }
                    }
                })
                .collect()
        });

        Self {
            model: request.model,
            messages,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            max_completion_tokens: None,
            stop: request.stop.map(openai::StringOrArray::Many),
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
            reasoning_effort: request.reasoning_effort,
            stream: request.stream,
            stream_options: request.stream_options.map(|options| openai::StreamOptions {
                include_usage: options.include_usage,
            }),
            tools,
            tool_choice: request.tool_choice,
            parallel_tool_calls: None,
            user: None,
        }
    }
}

impl From<UnifiedMessage> for openai::ChatMessage {
    fn from(message: UnifiedMessage) -> Self {
        let role = match message.role {
            Role::System => openai::ChatRole::System,
            Role::User => openai::ChatRole::User,
            Role::Assistant => openai::ChatRole::Assistant,
            Role::Tool => openai::ChatRole::Tool,
        };

        // Thinking parts travel in the side-channel reasoning_content field
        // rather than the content array.
        let mut reasoning_content = None;

        let content = match message.content {
            MessageContent::Text(text) => Some(openai::MessageContent::Text(text)),
            MessageContent::Parts(parts) => {
                let mut converted = Vec::new();

                for part in parts {
                    match part {
                        ContentPart::Text { text } => converted.push(openai::ContentPart::Text { text }),
                        ContentPart::Image { source } => converted.push(openai::ContentPart::ImageUrl {
                            image_url: openai::ImageUrl {
                                url: image_url_from_source(source),
                                detail: None,
                            },
                        }),
                        ContentPart::Audio { data, format } => converted.push(openai::ContentPart::InputAudio {
                            input_audio: openai::InputAudio { data, format },
                        }),
                        ContentPart::Thinking { text, .. } => {
                            reasoning_content.get_or_insert_with(String::new).push_str(&text);
                        }
                        // Tool interactions are carried by the dedicated
                        // message fields in the OpenAI dialect.
                        ContentPart::ToolUse { .. } | ContentPart::ToolResult { .. } => {}
                    }
                }

                Some(openai::MessageContent::Parts(converted))
            }
        };

        let tool_calls = message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| openai::ToolCall {
                    index: Some(call.index),
                    id: call.id,
                    call_type: call.call_type,
                    function: openai::FunctionCall {
                        name: call.function.name,
                        arguments: call.function.arguments,
                    },
                })
                .collect()
        });

        Self {
            role,
            content,
            reasoning_content,
            refusal: None,
            tool_calls,
            tool_call_id: message.tool_call_id,
            name: None,
        }
    }
}

fn image_url_from_source(source: ImageSource) -> String {
    match source {
        ImageSource::Url { url } => url,
        ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
    }
}

impl From<UnifiedResponse> for openai::ChatCompletionResponse {
    fn from(response: UnifiedResponse) -> Self {
        let choices = response
            .choices
            .into_iter()
            .map(|choice| {
                let message = choice
                    .message
                    .map(openai::ChatMessage::from)
                    .unwrap_or_else(|| openai::ChatMessage {
                        role: openai::ChatRole::Assistant,
                        content: Some(openai::MessageContent::Text(String::new())),
                        reasoning_content: None,
                        refusal: None,
                        tool_calls: None,
                        tool_call_id: None,
                        name: None,
                    });

                openai::ResponseChoice {
                    index: choice.index,
                    message,
                    finish_reason: choice.finish_reason.map(|reason| reason.as_str().to_string()),
                    logprobs: choice.logprobs,
                }
            })
            .collect();

        Self {
            id: response.id,
            object: "chat.completion".to_string(),
            created: response.created,
            model: response.model,
            service_tier: response.service_tier,
            system_fingerprint: response.system_fingerprint,
            choices,
            usage: response.usage,
        }
    }
}

/// Build one SSE chunk body from a unified stream chunk.
pub(crate) fn chunk_from_unified(chunk: &UnifiedResponse) -> openai::ChatCompletionChunk {
    let choices = chunk
        .choices
        .iter()
        .map(|choice| openai::ChunkChoice {
            index: choice.index,
            delta: choice.delta.clone().map(delta_to_openai).unwrap_or_default(),
            finish_reason: choice.finish_reason.map(|reason| reason.as_str().to_string()),
            logprobs: choice.logprobs.clone(),
        })
        .collect();

    openai::ChatCompletionChunk {
        id: chunk.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: chunk.created,
        model: chunk.model.clone(),
        service_tier: chunk.service_tier.clone(),
        system_fingerprint: chunk.system_fingerprint.clone(),
        choices,
        usage: chunk.usage.clone(),
    }
}

fn delta_to_openai(delta: UnifiedDelta) -> openai::ChunkDelta {
    let tool_calls = delta.tool_calls.map(|calls| {
        calls
            .into_iter()
            .map(|call| openai::ToolCallChunk {
                index: call.index,
                id: call.id,
                call_type: call.call_type,
                function: call.function.map(|function| openai::FunctionCallChunk {
                    name: function.name,
                    arguments: function.arguments,
                }),
            })
            .collect()
    });

    openai::ChunkDelta {
        role: delta.role.map(|role| match role {
            Role::Assistant => openai::ChatRole::Assistant,
            Role::System => openai::ChatRole::System,
            Role::User => openai::ChatRole::User,
            Role::Tool => openai::ChatRole::Tool,
        }),
        content: delta.content,
        reasoning_content: delta.reasoning_content,
        reasoning_signature: delta.reasoning_signature,
        refusal: delta.refusal,
        tool_calls,
    }
}

/// Aggregate an ordered chunk list into a complete response.
///
/// Tool-call argument fragments are concatenated per `{choice, tool}` key;
/// the last finish reason and usage win.
pub(crate) fn aggregate_chunks(chunks: &[UnifiedResponse]) -> UnifiedResponse {
    let mut response = UnifiedResponse::empty("");
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<super::ToolCall> = Vec::new();
    let mut finish_reason = None;

    for chunk in chunks {
        if chunk.is_done {
            continue;
        }

        if response.id.is_empty() && !chunk.id.is_empty() {
            response.id = chunk.id.clone();
            response.created = chunk.created;
            response.model = chunk.model.clone();
            response.service_tier = chunk.service_tier.clone();
            response.system_fingerprint = chunk.system_fingerprint.clone();
        }

        if let Some(usage) = &chunk.usage {
            response.usage = Some(usage.clone());
        }

        for choice in &chunk.choices {
            if choice.index != 0 {
                continue;
            }

            if let Some(reason) = choice.finish_reason {
                finish_reason = Some(reason);
            }

            let Some(delta) = &choice.delta else { continue };

            if let Some(text) = &delta.content {
                content.push_str(text);
            }

            if let Some(text) = &delta.reasoning_content {
                reasoning.push_str(text);
            }

            for call in delta.tool_calls.iter().flatten() {
                let slot = tool_calls.iter_mut().find(|existing| existing.index == call.index);

                match slot {
                    Some(existing) => {
                        if let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.as_deref()) {
                            existing.function.arguments.push_str(arguments);
                        }
                    }
                    None => tool_calls.push(super::ToolCall {
                        index: call.index,
                        id: call.id.clone().unwrap_or_default(),
                        call_type: call.call_type.clone().unwrap_or_else(|| "function".to_string()),
                        function: super::FunctionCall {
                            name: call
                                .function
                                .as_ref()
                                .and_then(|f| f.name.clone())
                                .unwrap_or_default(),
                            arguments: call
                                .function
                                .as_ref()
                                .and_then(|f| f.arguments.clone())
                                .unwrap_or_default(),
                        },
                    }),
                }
            }
        }
    }

    let message_content = if reasoning.is_empty() {
        MessageContent::Text(content)
    } else {
        MessageContent::Parts(vec![
            ContentPart::Thinking {
                text: reasoning,
                signature: None,
            },
            ContentPart::Text { text: content },
        ])
    };

    response.object = "chat.completion".to_string();
    response.choices = vec![UnifiedChoice {
        index: 0,
        message: Some(UnifiedMessage {
            role: Role::Assistant,
            content: message_content,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        }),
        delta: None,
        finish_reason: finish_reason.or(Some(FinishReason::Stop)),
        logprobs: None,
    }];

    response
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::messages::unified::{
        ApiFormat, FunctionDelta, RequestType, ToolCallDelta, UnifiedChoice, UnifiedDelta, Usage,
    };

    #[test]
    fn request_round_trip_preserves_echoing_fields() {
        let mut unified = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "gpt-4");
        unified.messages.push(UnifiedMessage::text(Role::User, "Hello"));
        unified.temperature = Some(0.7);
        unified.stream = Some(true);

        let wire = openai::ChatCompletionRequest::from(unified);
        let reparsed = UnifiedRequest::from(wire);

        assert_eq!(reparsed.model, "gpt-4");
        assert_eq!(reparsed.messages[0].text_content(), "Hello");
        assert!((reparsed.temperature.unwrap() - 0.7).abs() < 0.0001);
        assert_eq!(reparsed.stream, Some(true));
    }

    #[test]
    fn thinking_parts_become_reasoning_content() {
        let message = UnifiedMessage {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![
                ContentPart::Thinking {
                    text: "step by step".to_string(),
                    signature: Some("sig".to_string()),
                },
                ContentPart::Text {
                    text: "The answer is 4.".to_string(),
                },
            ]),
            tool_calls: None,
            tool_call_id: None,
        };

        let wire = openai::ChatMessage::from(message);

        assert_eq!(wire.reasoning_content.as_deref(), Some("step by step"));
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["content"], json!([{"type": "text", "text": "The answer is 4."}]));
    }

    #[test]
    fn aggregate_concatenates_text_and_tool_arguments() {
        let mut chunks = Vec::new();

        let mut first = UnifiedResponse::empty("gpt-4");
        first.id = "chatcmpl-1".to_string();
        first.created = 100;
        first.choices.push(UnifiedChoice {
            index: 0,
            delta: Some(UnifiedDelta {
                content: Some("Hel".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        chunks.push(first);

        let mut second = UnifiedResponse::empty("gpt-4");
        second.choices.push(UnifiedChoice {
            index: 0,
            delta: Some(UnifiedDelta {
                content: Some("lo".to_string()),
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: Some("call_1".to_string()),
                    call_type: Some("function".to_string()),
                    function: Some(FunctionDelta {
                        name: Some("read".to_string()),
                        arguments: Some("{\"path\":".to_string()),
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
        chunks.push(second);

        let mut third = UnifiedResponse::empty("gpt-4");
        third.usage = Some(Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
            ..Default::default()
        });
        third.choices.push(UnifiedChoice {
            index: 0,
            delta: Some(UnifiedDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    call_type: None,
                    function: Some(FunctionDelta {
                        name: None,
                        arguments: Some("\"/\"}".to_string()),
                    }),
                }]),
                ..Default::default()
            }),
            finish_reason: Some(FinishReason::ToolCalls),
            ..Default::default()
        });
        chunks.push(third);

        let aggregated = aggregate_chunks(&chunks);

        assert_eq!(aggregated.id, "chatcmpl-1");
        let message = aggregated.choices[0].message.as_ref().unwrap();
        assert_eq!(message.text_content(), "Hello");

        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.arguments, "{\"path\":\"/\"}");
        assert_eq!(aggregated.choices[0].finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(aggregated.usage.as_ref().unwrap().total_tokens, 3);
    }
}
