//! Inbound transformers: the client-facing half of each dialect adapter.
//!
//! An inbound transformer parses a vendor request body into the unified
//! model, serializes unified responses and stream chunks back into that
//! vendor's wire format, and renders errors in the vendor's envelope. The
//! transformer that parsed a request always serializes its response; the
//! unified request records which one that was in `api_format`.

pub(crate) mod anthropic;
pub(crate) mod gemini;
pub(crate) mod jina;
pub(crate) mod openai;
pub(crate) mod responses;

use http::StatusCode;
use serde_json::Value;

use crate::{
    error::{GatewayError, GatewayResult},
    messages::unified::{ApiFormat, RawRequest, UnifiedRequest, UnifiedResponse},
    streams::{ByteStream, UnifiedStream},
};

pub(crate) trait InboundTransformer: Send + Sync {
    fn api_format(&self) -> ApiFormat;

    /// Parse the raw HTTP envelope into a unified request.
    fn parse_request(&self, raw: &RawRequest) -> GatewayResult<UnifiedRequest>;

    /// Serialize a complete unified response into the dialect's body.
    fn response_body(&self, response: &UnifiedResponse) -> GatewayResult<Value>;

    /// Serialize a unified chunk stream into wire bytes.
    fn stream(&self, chunks: UnifiedStream, request: &UnifiedRequest) -> ByteStream;

    /// Collapse an ordered chunk list into a complete unified response.
    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse>;

    /// Render an error in the dialect's envelope.
    fn error_body(&self, error: &GatewayError) -> (StatusCode, Value);

    /// Content type of the streaming response.
    fn stream_content_type(&self) -> &'static str {
        "text/event-stream"
    }
}

static OPENAI_CHAT: openai::OpenAiChatInbound = openai::OpenAiChatInbound;
static OPENAI_RESPONSES: responses::ResponsesInbound = responses::ResponsesInbound;
static ANTHROPIC: anthropic::AnthropicInbound = anthropic::AnthropicInbound;
static GEMINI: gemini::GeminiInbound = gemini::GeminiInbound;
static EMBEDDINGS: jina::EmbeddingsInbound = jina::EmbeddingsInbound;
static RERANK: jina::RerankInbound = jina::RerankInbound;

/// Pick the inbound transformer for a mounted path.
pub(crate) fn dispatch(path: &str) -> Option<&'static dyn InboundTransformer> {
    match path {
        "/v1/chat/completions" => Some(&OPENAI_CHAT),
        "/v1/responses" => Some(&OPENAI_RESPONSES),
        "/v1/embeddings" | "/jina/v1/embeddings" => Some(&EMBEDDINGS),
        "/v1/rerank" | "/jina/v1/rerank" => Some(&RERANK),
        "/anthropic/v1/messages" => Some(&ANTHROPIC),
        _ if path.starts_with("/gemini/") => Some(&GEMINI),
        _ => None,
    }
}

/// Resolve the transformer that created a unified request.
pub(crate) fn by_format(format: ApiFormat) -> &'static dyn InboundTransformer {
    match format {
        ApiFormat::OpenAiChat => &OPENAI_CHAT,
        ApiFormat::OpenAiResponses => &OPENAI_RESPONSES,
        ApiFormat::Anthropic => &ANTHROPIC,
        ApiFormat::Gemini => &GEMINI,
        ApiFormat::Embeddings => &EMBEDDINGS,
        ApiFormat::Rerank => &RERANK,
    }
}

/// Shared body checks: JSON content type, non-empty body.
pub(crate) fn require_json_body(raw: &RawRequest) -> GatewayResult<()> {
    let content_type = raw
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if !content_type.starts_with("application/json") {
        return Err(GatewayError::InvalidRequest(format!(
            "unsupported content type '{content_type}', expected application/json"
        )));
    }

    if raw.body.is_empty() {
        return Err(GatewayError::InvalidRequest("request body is empty".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_covers_all_mounted_paths() {
        assert_eq!(dispatch("/v1/chat/completions").unwrap().api_format(), ApiFormat::OpenAiChat);
        assert_eq!(dispatch("/v1/responses").unwrap().api_format(), ApiFormat::OpenAiResponses);
        assert_eq!(dispatch("/v1/embeddings").unwrap().api_format(), ApiFormat::Embeddings);
        assert_eq!(dispatch("/jina/v1/rerank").unwrap().api_format(), ApiFormat::Rerank);
        assert_eq!(dispatch("/anthropic/v1/messages").unwrap().api_format(), ApiFormat::Anthropic);
        assert_eq!(
            dispatch("/gemini/v1beta/models/gemini-pro:generateContent").unwrap().api_format(),
            ApiFormat::Gemini
        );
        assert!(dispatch("/v2/other").is_none());
    }

    #[test]
    fn json_body_requirements() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, "application/json".parse().unwrap());

        let empty_body = RawRequest {
            headers: headers.clone(),
            ..RawRequest::default()
        };
        assert!(require_json_body(&empty_body).is_err());

        let valid = RawRequest {
            headers,
            body: bytes::Bytes::from_static(b"{}"),
            ..RawRequest::default()
        };
        assert!(require_json_body(&valid).is_ok());

        let mut plain_headers = http::HeaderMap::new();
        plain_headers.insert(http::header::CONTENT_TYPE, "text/plain".parse().unwrap());

        let wrong_type = RawRequest {
            headers: plain_headers,
            body: bytes::Bytes::from_static(b"{}"),
            ..RawRequest::default()
        };
        assert!(require_json_body(&wrong_type).is_err());
    }
}
