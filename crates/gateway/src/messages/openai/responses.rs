//! OpenAI Responses API wire types.
//!
//! Covers the `POST /v1/responses` surface the gateway translates: text and
//! function-call items, the `input` string-or-items shape, and the streaming
//! event envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /v1/responses` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,

    pub input: ResponsesInput,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
}

/// The `input` field: a bare string or a list of items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Items(Vec<InputItem>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        role: String,
        content: ItemContent,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemContent {
    Text(String),
    Parts(Vec<ItemContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemContentPart {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
}

/// Responses-dialect tool definition: flattened, no `function` wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesTool {
    #[serde(rename = "type")]
    pub tool_type: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
}

/// `POST /v1/responses` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    pub id: String,
    pub object: String,
    pub created_at: i64,
    pub model: String,
    pub status: String,
    pub output: Vec<OutputItem>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        id: String,
        role: String,
        status: String,
        content: Vec<OutputContent>,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
        status: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText { text: String, annotations: Vec<Value> },
    Refusal { refusal: String },
}

/// Responses-dialect usage block (`input_tokens`, not `prompt_tokens`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use serde_json::json;

    use super::*;

    #[test]
    fn input_accepts_bare_string() {
        let request: ResponsesRequest =
            serde_json::from_value(json!({"model": "gpt-4o", "input": "Hello"})).unwrap();

        assert!(matches!(request.input, ResponsesInput::Text(ref text) if text == "Hello"));
    }

    #[test]
    fn input_accepts_items() {
        let request: ResponsesRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "input": [
                {"type": "message", "role": "user", "content": "Hi"},
                {"type": "function_call_output", "call_id": "call_1", "output": "42"}
            ]
        }))
        .unwrap();

        let ResponsesInput::Items(items) = request.input else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], InputItem::FunctionCallOutput { call_id, .. } if call_id == "call_1"));
    }

    #[test]
    fn output_item_round_trips() {
        let item = OutputItem::Message {
            id: "msg_1".to_string(),
            role: "assistant".to_string(),
            status: "completed".to_string(),
            content: vec![OutputContent::OutputText {
                text: "Hello!".to_string(),
                annotations: vec![],
            }],
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["content"][0]["type"], "output_text");
    }
}
