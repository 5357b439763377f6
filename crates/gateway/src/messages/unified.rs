//! Protocol-agnostic unified types for LLM requests, responses and stream
//! chunks.
//!
//! Every inbound dialect parses into [`UnifiedRequest`], every outbound
//! transformer serializes from it, and the reverse path flows through
//! [`UnifiedResponse`]. The conversion flow:
//!
//! ```text
//! Dialect request → UnifiedRequest → provider wire format
//! provider response → UnifiedResponse → dialect response
//! ```
//!
//! Stream chunks reuse [`UnifiedResponse`] with `delta` populated instead of
//! `message`; the end of a stream is marked by the [`UnifiedResponse::done`]
//! sentinel rather than a dialect-specific terminator.

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) mod from_anthropic;
pub(crate) mod from_gemini;
pub(crate) mod from_openai;
pub(crate) mod to_anthropic;
pub(crate) mod to_gemini;
pub(crate) mod to_openai;

/// What kind of operation the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Chat,
    Responses,
    Embedding,
    Rerank,
}

/// The inbound dialect a request arrived in.
///
/// Preserved on the unified request so the response path serializes with the
/// same transformer that parsed the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFormat {
    OpenAiChat,
    OpenAiResponses,
    Anthropic,
    Gemini,
    Embeddings,
    Rerank,
}

/// The original HTTP envelope, kept for transformers that need to re-parse.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The pivot representation all dialects convert through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRequest {
    pub request_type: RequestType,
    pub api_format: ApiFormat,

    /// Provider-opaque model identifier.
    pub model: String,

    pub messages: Vec<UnifiedMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<UnifiedTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// OpenAI reasoning effort ("low", "medium", "high").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    /// Payload for embedding requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingPayload>,

    /// Payload for rerank requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank: Option<RerankPayload>,

    /// Channel tag filter extracted from the inbound headers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Routing hints stamped by transformers, keyed by well-known names such
    /// as `outbound_format_type`.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub transformer_metadata: serde_json::Map<String, Value>,

    /// The original HTTP envelope. Not serialized.
    #[serde(skip)]
    pub raw: RawRequest,
}

impl UnifiedRequest {
    pub fn new(request_type: RequestType, api_format: ApiFormat, model: impl Into<String>) -> Self {
        Self {
            request_type,
            api_format,
            model: model.into(),
            messages: Vec::new(),
            tools: None,
            tool_choice: None,
            stream: None,
            stream_options: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stop: None,
            presence_penalty: None,
            frequency_penalty: None,
            reasoning_effort: None,
            embedding: None,
            rerank: None,
            tags: Vec::new(),
            transformer_metadata: serde_json::Map::new(),
            raw: RawRequest::default(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Whether the client asked for usage accounting on the final stream chunk.
    pub fn wants_stream_usage(&self) -> bool {
        self.stream_options
            .as_ref()
            .map(|options| options.include_usage)
            .unwrap_or(false)
    }

    /// Whether any tool on the request is native to Google channels.
    pub fn has_google_native_tools(&self) -> bool {
        self.tools
            .iter()
            .flatten()
            .any(|tool| matches!(tool, UnifiedTool::GoogleNative { .. }))
    }

    /// Whether any tool on the request is native to Anthropic channels.
    pub fn has_anthropic_native_tools(&self) -> bool {
        self.tools
            .iter()
            .flatten()
            .any(|tool| matches!(tool, UnifiedTool::AnthropicNative { .. }))
    }
}

/// Streaming options mirrored from the OpenAI dialect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

/// Payload of an embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingPayload {
    pub input: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

/// Payload of a rerank request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankPayload {
    pub query: String,
    pub documents: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_n: Option<u32>,

    #[serde(default)]
    pub return_documents: bool,
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedMessage {
    pub role: Role,
    pub content: MessageContent,

    /// Tool calls on assistant messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// On tool messages, the id of the call this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl UnifiedMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Concatenated plain text of this message, ignoring non-text parts.
    pub fn text_content(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Message content: either one string or an ordered list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Typed content parts for multi-modal and tool-carrying messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    Audio {
        /// Base64 audio data.
        data: String,
        format: String,
    },
    ToolUse {
        id: String,
        name: String,
        /// Arguments as a JSON string, accreting across stream chunks.
        arguments: String,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        text: String,
        /// Opaque provider signature over the thinking block.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

/// Image data, inline or by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// A tool definition on the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnifiedTool {
    /// A JSON-schema function tool, portable across all channels.
    Function {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        parameters: Value,
    },
    /// A Google-native tool (`google_search`, `code_execution`, ...), only
    /// routable to `gemini`/`gemini_vertex` channels.
    GoogleNative { name: String, config: Value },
    /// An Anthropic-native tool (`web_search`, computer use, ...), only
    /// routable to Anthropic-family channels.
    AnthropicNative { name: String, config: Value },
}

/// A completed tool call on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub index: u32,
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
}

/// Unified response, used both for complete responses and stream chunks.
///
/// Complete responses populate `choices[].message`; chunks populate
/// `choices[].delta`. The [`UnifiedResponse::done`] sentinel carries neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,

    pub choices: Vec<UnifiedChoice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Payload of a non-chat response (embedding vectors, rerank results),
    /// already in the provider-neutral shape of the request type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// End-of-stream sentinel marker.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_done: bool,
}

impl UnifiedResponse {
    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            object: String::new(),
            created: 0,
            model: model.into(),
            service_tier: None,
            system_fingerprint: None,
            choices: Vec::new(),
            usage: None,
            payload: None,
            is_done: false,
        }
    }

    /// The end-of-stream sentinel.
    pub fn done() -> Self {
        Self {
            is_done: true,
            ..Self::empty("")
        }
    }

    /// Whether this chunk carries anything a client needs to see.
    ///
    /// A chunk qualifies when any choice has a finish reason or a delta with
    /// at least one populated field, or when it carries usage. The sentinel
    /// always qualifies.
    pub fn has_meaningful_delta(&self) -> bool {
        if self.is_done || self.usage.is_some() {
            return true;
        }

        self.choices.iter().any(|choice| {
            if choice.finish_reason.is_some() || choice.message.is_some() {
                return true;
            }

            choice.delta.as_ref().is_some_and(|delta| {
                delta.role.is_some()
                    || delta.content.as_deref().is_some_and(|content| !content.is_empty())
                    || delta.reasoning_content.is_some()
                    || delta.reasoning_signature.is_some()
                    || delta.refusal.is_some()
                    || delta.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
            })
        })
    }

}

/// One response choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedChoice {
    pub index: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<UnifiedMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<UnifiedDelta>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Value>,
}

/// Incremental update for one choice in a stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Opaque signature over a thinking block, an Anthropic-originated
    /// artifact. Signature-only chunks are suppressed on OpenAI-family
    /// inbound paths and emitted as `signature_delta` on the Anthropic path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_signature: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

impl UnifiedDelta {
    /// Whether the delta's only populated field is the reasoning signature.
    pub fn is_signature_only(&self) -> bool {
        self.reasoning_signature.is_some()
            && self.role.is_none()
            && self.content.is_none()
            && self.reasoning_content.is_none()
            && self.refusal.is_none()
            && self.tool_calls.is_none()
    }
}

/// Incremental tool-call update keyed by `{choice_index, tool_index}`.
///
/// `arguments` fragments are strictly append-only across chunks for a given
/// key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
        }
    }
}

/// Token usage accounting, passed through from the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionTokensDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_delta(delta: UnifiedDelta) -> UnifiedResponse {
        let mut chunk = UnifiedResponse::empty("test-model");
        chunk.choices.push(UnifiedChoice {
            index: 0,
            delta: Some(delta),
            ..Default::default()
        });
        chunk
    }

    #[test]
    fn empty_chunk_is_not_meaningful() {
        let chunk = chunk_with_delta(UnifiedDelta::default());
        assert!(!chunk.has_meaningful_delta());

        let chunk = chunk_with_delta(UnifiedDelta {
            content: Some(String::new()),
            ..Default::default()
        });
        assert!(!chunk.has_meaningful_delta());
    }

    #[test]
    fn content_and_finish_are_meaningful() {
        let chunk = chunk_with_delta(UnifiedDelta {
            content: Some("hello".to_string()),
            ..Default::default()
        });
        assert!(chunk.has_meaningful_delta());

        let mut chunk = UnifiedResponse::empty("test-model");
        chunk.choices.push(UnifiedChoice {
            index: 0,
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        });
        assert!(chunk.has_meaningful_delta());
    }

    #[test]
    fn done_sentinel_is_meaningful() {
        assert!(UnifiedResponse::done().has_meaningful_delta());
    }

    #[test]
    fn signature_only_detection() {
        let delta = UnifiedDelta {
            reasoning_signature: Some("sig".to_string()),
            ..Default::default()
        };
        assert!(delta.is_signature_only());

        let delta = UnifiedDelta {
            reasoning_signature: Some("sig".to_string()),
            content: Some("text".to_string()),
            ..Default::default()
        };
        assert!(!delta.is_signature_only());
    }

    #[test]
    fn native_tool_detection() {
        let mut request = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "gpt-4o");
        assert!(!request.has_google_native_tools());

        request.tools = Some(vec![UnifiedTool::GoogleNative {
            name: "google_search".to_string(),
            config: serde_json::json!({}),
        }]);
        assert!(request.has_google_native_tools());
        assert!(!request.has_anthropic_native_tools());
    }
}
