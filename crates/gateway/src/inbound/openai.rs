//! OpenAI Chat Completions inbound transformer.

use futures::StreamExt;
use http::StatusCode;
use serde_json::{Value, json};

use super::{InboundTransformer, require_json_body};
use crate::{
    error::{GatewayError, GatewayResult},
    messages::{
        openai,
        unified::{ApiFormat, RawRequest, UnifiedRequest, UnifiedResponse, to_openai},
    },
    middleware::client_wants_usage,
    streams::{ByteStream, UnifiedStream, sse_data, sse_done},
};

pub(crate) struct OpenAiChatInbound;

impl InboundTransformer for OpenAiChatInbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::OpenAiChat
    }

    fn parse_request(&self, raw: &RawRequest) -> GatewayResult<UnifiedRequest> {
        require_json_body(raw)?;

        let request: openai::ChatCompletionRequest = sonic_rs::from_slice(&raw.body)
            .map_err(|error| GatewayError::InvalidRequest(format!("malformed chat completion request: {error}")))?;

        if request.model.is_empty() {
            return Err(GatewayError::InvalidRequest("model is required".to_string()));
        }

        let mut unified = UnifiedRequest::from(request);
        unified.raw = raw.clone();

        Ok(unified)
    }

    fn response_body(&self, response: &UnifiedResponse) -> GatewayResult<Value> {
        let wire = openai::ChatCompletionResponse::from(response.clone());

        serde_json::to_value(wire)
            .map_err(|error| GatewayError::Internal(format!("failed to serialize response: {error}")))
    }

    fn stream(&self, chunks: UnifiedStream, request: &UnifiedRequest) -> ByteStream {
        let include_usage = client_wants_usage(request);

        chunks
            .filter_map(move |item| async move {
                match item {
                    Ok(chunk) => frame_chunk(&chunk, include_usage).transpose(),
                    Err(error) => Some(Ok(error_frame(&error))),
                }
            })
            .chain(futures::stream::once(async { Ok(sse_done()) }))
            .boxed()
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        Ok(to_openai::aggregate_chunks(&chunks))
    }

    fn error_body(&self, error: &GatewayError) -> (StatusCode, Value) {
        (error.status_code(), openai_error_body(error))
    }
}

/// Serialize one unified chunk into an SSE frame.
///
/// The `[DONE]` sentinel handles itself; signature-only chunks (an
/// Anthropic-originated artifact) are suppressed on this path, as are
/// usage-only chunks when the client did not opt in.
fn frame_chunk(chunk: &UnifiedResponse, include_usage: bool) -> GatewayResult<Option<bytes::Bytes>> {
    if chunk.is_done {
        return Ok(None);
    }

    if chunk
        .choices
        .iter()
        .all(|choice| choice.delta.as_ref().is_some_and(|delta| delta.is_signature_only()))
        && !chunk.choices.is_empty()
    {
        return Ok(None);
    }

    let mut chunk = chunk.clone();

    if !include_usage {
        chunk.usage = None;

        if !chunk.has_meaningful_delta() {
            return Ok(None);
        }
    }

    let wire = to_openai::chunk_from_unified(&chunk);
    sse_data(&wire).map(Some)
}

fn error_frame(error: &GatewayError) -> bytes::Bytes {
    let body = openai_error_body(error);
    bytes::Bytes::from(format!("data: {body}\n\n"))
}

pub(crate) fn openai_error_body(error: &GatewayError) -> Value {
    let envelope = openai::ErrorEnvelope {
        error: openai::ErrorDetails {
            message: error.client_message(),
            error_type: error.error_type().to_string(),
            code: Some(json!(error.status_code().as_u16())),
        },
    };

    serde_json::to_value(envelope).unwrap_or_else(|_| json!({"error": {"message": error.client_message()}}))
}
