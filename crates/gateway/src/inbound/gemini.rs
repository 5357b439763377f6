//! Google Gemini inbound transformer.
//!
//! The model and action are encoded in the URL
//! (`/gemini/{version}/models/{model}:{action}`); streaming responses are a
//! JSON array of chunk objects delimited by newlines, not SSE.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::StreamExt;
use http::StatusCode;
use serde_json::{Value, json};

use super::{InboundTransformer, require_json_body};
use crate::{
    error::{GatewayError, GatewayResult},
    messages::{
        gemini,
        unified::{ApiFormat, RawRequest, UnifiedRequest, UnifiedResponse, to_gemini, to_openai},
    },
    streams::{ByteStream, UnifiedStream},
};

pub(crate) struct GeminiInbound;

impl InboundTransformer for GeminiInbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::Gemini
    }

    fn parse_request(&self, raw: &RawRequest) -> GatewayResult<UnifiedRequest> {
        require_json_body(raw)?;

        let (model, action) = parse_model_action(&raw.uri)?;

        let request: gemini::GenerateContentRequest = sonic_rs::from_slice(&raw.body)
            .map_err(|error| GatewayError::InvalidRequest(format!("malformed generateContent request: {error}")))?;

        let mut unified = UnifiedRequest::from(request);
        unified.model = model;
        unified.stream = Some(action == "streamGenerateContent");
        unified.raw = raw.clone();

        Ok(unified)
    }

    fn response_body(&self, response: &UnifiedResponse) -> GatewayResult<Value> {
        let wire = gemini::GenerateContentResponse::from(response.clone());

        serde_json::to_value(wire)
            .map_err(|error| GatewayError::Internal(format!("failed to serialize response: {error}")))
    }

    fn stream(&self, chunks: UnifiedStream, _request: &UnifiedRequest) -> ByteStream {
        let state = StreamState {
            chunks,
            pending: VecDeque::new(),
            first: true,
            ended: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Some((frame, state));
                }

                if state.ended {
                    return None;
                }

                match state.chunks.next().await {
                    Some(Ok(chunk)) => {
                        if chunk.is_done {
                            let closing = state.closing_frame();
                            state.pending.push_back(Ok(closing));
                            state.ended = true;
                            continue;
                        }

                        if !chunk.has_meaningful_delta() {
                            continue;
                        }

                        let element = to_gemini::chunk_from_unified(&chunk);
                        match serde_json::to_string(&element) {
                            Ok(json) => {
                                let frame = state.element_frame(&json);
                                state.pending.push_back(Ok(frame));
                            }
                            Err(error) => {
                                let closing = state.closing_frame();
                                state.pending.push_back(Err(GatewayError::Internal(format!(
                                    "failed to serialize stream chunk: {error}"
                                ))));
                                state.pending.push_back(Ok(closing));
                                state.ended = true;
                            }
                        }
                    }
                    Some(Err(error)) => {
                        let body = json!({
                            "error": {
                                "code": error.status_code().as_u16(),
                                "message": error.client_message(),
                                "status": google_status(&error),
                            }
                        });
                        let frame = state.element_frame(&body.to_string());
                        let closing = state.closing_frame();
                        state.pending.push_back(Ok(frame));
                        state.pending.push_back(Ok(closing));
                        state.ended = true;
                    }
                    None => {
                        let closing = state.closing_frame();
                        state.pending.push_back(Ok(closing));
                        state.ended = true;
                    }
                }
            }
        })
        .boxed()
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        Ok(to_openai::aggregate_chunks(&chunks))
    }

    fn error_body(&self, error: &GatewayError) -> (StatusCode, Value) {
        let envelope = gemini::GeminiErrorResponse {
            error: gemini::GeminiErrorBody {
                code: error.status_code().as_u16(),
                message: error.client_message(),
                status: google_status(error).to_string(),
            },
        };

        let body = serde_json::to_value(envelope)
            .unwrap_or_else(|_| json!({"error": {"code": 500, "message": "serialization failed", "status": "INTERNAL"}}));

        (error.status_code(), body)
    }

    fn stream_content_type(&self) -> &'static str {
        "application/json"
    }
}

struct StreamState {
    chunks: UnifiedStream,
    pending: VecDeque<GatewayResult<Bytes>>,
    first: bool,
    ended: bool,
}

impl StreamState {
    fn element_frame(&mut self, json: &str) -> Bytes {
        if self.first {
            self.first = false;
            Bytes::from(format!("[{json}"))
        } else {
            Bytes::from(format!(",\n{json}"))
        }
    }

    fn closing_frame(&mut self) -> Bytes {
        if self.first {
            self.first = false;
            Bytes::from_static(b"[]")
        } else {
            Bytes::from_static(b"]")
        }
    }
}

/// Extract `(model, action)` from `/gemini/{version}/models/{model}:{action}`.
fn parse_model_action(uri: &str) -> GatewayResult<(String, String)> {
    let path = uri.split('?').next().unwrap_or(uri);

    let segment = path
        .split("/models/")
        .nth(1)
        .ok_or_else(|| GatewayError::InvalidRequest(format!("unrecognized Gemini path '{path}'")))?;

    let (model, action) = segment
        .split_once(':')
        .ok_or_else(|| GatewayError::InvalidRequest(format!("missing action in Gemini path '{path}'")))?;

    if model.is_empty() {
        return Err(GatewayError::InvalidRequest("model is required".to_string()));
    }

    match action {
        "generateContent" | "streamGenerateContent" => Ok((model.to_string(), action.to_string())),
        other => Err(GatewayError::InvalidRequest(format!(
            "unsupported Gemini action '{other}'"
        ))),
    }
}

fn google_status(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::InvalidRequest(_) | GatewayError::InvalidModel(_) => "INVALID_ARGUMENT",
        GatewayError::Unauthorized(_) => "UNAUTHENTICATED",
        GatewayError::Forbidden(_) => "PERMISSION_DENIED",
        GatewayError::RateLimited { .. } => "RESOURCE_EXHAUSTED",
        GatewayError::UpstreamTemporary { .. } | GatewayError::StreamMidFault(_) => "UNAVAILABLE",
        GatewayError::UpstreamPermanent { .. } => "FAILED_PRECONDITION",
        GatewayError::Cancelled => "DEADLINE_EXCEEDED",
        GatewayError::Internal(_) => "INTERNAL",
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::messages::unified::{FinishReason, UnifiedChoice, UnifiedDelta};

    fn raw(uri: &str, body: &str) -> RawRequest {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, "application/json".parse().unwrap());

        RawRequest {
            method: http::Method::POST,
            uri: uri.to_string(),
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn model_and_action_come_from_the_path() {
        let inbound = GeminiInbound;
        let unified = inbound
            .parse_request(&raw(
                "/gemini/v1beta/models/gemini-pro:generateContent",
                r#"{"contents": [{"role": "user", "parts": [{"text": "Hi"}]}]}"#,
            ))
            .unwrap();

        assert_eq!(unified.model, "gemini-pro");
        assert_eq!(unified.stream, Some(false));

        let streaming = inbound
            .parse_request(&raw(
                "/gemini/v1beta/models/gemini-pro:streamGenerateContent?alt=sse",
                r#"{"contents": []}"#,
            ))
            .unwrap();

        assert_eq!(streaming.stream, Some(true));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let error = parse_model_action("/gemini/v1beta/models/gemini-pro:embedText").unwrap_err();
        assert!(matches!(error, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn stream_emits_json_array_framing() {
        let inbound = GeminiInbound;
        let request = UnifiedRequest::new(
            crate::messages::unified::RequestType::Chat,
            ApiFormat::Gemini,
            "gemini-pro",
        );

        let mut chunk = UnifiedResponse::empty("gemini-pro");
        chunk.choices.push(UnifiedChoice {
            index: 0,
            delta: Some(UnifiedDelta {
                content: Some("Hello".to_string()),
                ..Default::default()
            }),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        });

        let chunks: UnifiedStream =
            futures::stream::iter(vec![Ok(chunk), Ok(UnifiedResponse::done())]).boxed();

        let frames: Vec<_> = block_on(inbound.stream(chunks, &request).collect::<Vec<_>>());
        let text: String = frames
            .into_iter()
            .map(|frame| String::from_utf8(frame.unwrap().to_vec()).unwrap())
            .collect();

        assert!(text.starts_with("[{"));
        assert!(text.ends_with(']'));
        assert!(text.contains("\"text\":\"Hello\""));

        // The concatenation is valid JSON.
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert!(parsed.is_array());
    }

    #[test]
    fn error_body_uses_google_error_object() {
        let inbound = GeminiInbound;
        let (status, body) = inbound.error_body(&GatewayError::InvalidRequest("bad".to_string()));

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["status"], "INVALID_ARGUMENT");
        assert_eq!(body["error"]["code"], 400);
    }
}
