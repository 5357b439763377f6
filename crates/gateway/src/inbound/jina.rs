//! Embedding and rerank inbound transformers (OpenAI/Jina shapes).
//!
//! Neither request type streams; the response body is carried through the
//! unified response's `payload`, already in the dialect's own shape, so the
//! serialization side is a pass-through.

use futures::StreamExt;
use http::StatusCode;
use serde_json::Value;

use super::{InboundTransformer, openai::openai_error_body, require_json_body};
use crate::{
    error::{GatewayError, GatewayResult},
    messages::{
        jina, openai,
        unified::{
            ApiFormat, EmbeddingPayload, RawRequest, RequestType, RerankPayload, UnifiedRequest, UnifiedResponse,
        },
    },
    streams::{ByteStream, UnifiedStream},
};

pub(crate) struct EmbeddingsInbound;

impl InboundTransformer for EmbeddingsInbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::Embeddings
    }

    fn parse_request(&self, raw: &RawRequest) -> GatewayResult<UnifiedRequest> {
        require_json_body(raw)?;

        let request: openai::EmbeddingsRequest = sonic_rs::from_slice(&raw.body)
            .map_err(|error| GatewayError::InvalidRequest(format!("malformed embeddings request: {error}")))?;

        if request.model.is_empty() {
            return Err(GatewayError::InvalidRequest("model is required".to_string()));
        }

        let mut unified = UnifiedRequest::new(RequestType::Embedding, ApiFormat::Embeddings, request.model);
        unified.embedding = Some(EmbeddingPayload {
            input: request.input.into_vec(),
            encoding_format: request.encoding_format,
            dimensions: request.dimensions,
        });
        unified.raw = raw.clone();

        Ok(unified)
    }

    fn response_body(&self, response: &UnifiedResponse) -> GatewayResult<Value> {
        payload_body(response)
    }

    fn stream(&self, chunks: UnifiedStream, _request: &UnifiedRequest) -> ByteStream {
        non_streaming(chunks)
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        first_chunk(chunks)
    }

    fn error_body(&self, error: &GatewayError) -> (StatusCode, Value) {
        (error.status_code(), openai_error_body(error))
    }
}

pub(crate) struct RerankInbound;

impl InboundTransformer for RerankInbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::Rerank
    }

    fn parse_request(&self, raw: &RawRequest) -> GatewayResult<UnifiedRequest> {
        require_json_body(raw)?;

        let request: jina::RerankRequest = sonic_rs::from_slice(&raw.body)
            .map_err(|error| GatewayError::InvalidRequest(format!("malformed rerank request: {error}")))?;

        if request.model.is_empty() {
            return Err(GatewayError::InvalidRequest("model is required".to_string()));
        }

        if request.query.is_empty() {
            return Err(GatewayError::InvalidRequest("query is required".to_string()));
        }

        let mut unified = UnifiedRequest::new(RequestType::Rerank, ApiFormat::Rerank, request.model);
        unified.rerank = Some(RerankPayload {
            query: request.query,
            documents: request
                .documents
                .into_iter()
                .map(jina::RerankDocument::into_text)
                .collect(),
            top_n: request.top_n,
            return_documents: request.return_documents.unwrap_or(false),
        });
        unified.raw = raw.clone();

        Ok(unified)
    }

    fn response_body(&self, response: &UnifiedResponse) -> GatewayResult<Value> {
        payload_body(response)
    }

    fn stream(&self, chunks: UnifiedStream, _request: &UnifiedRequest) -> ByteStream {
        non_streaming(chunks)
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        first_chunk(chunks)
    }

    fn error_body(&self, error: &GatewayError) -> (StatusCode, Value) {
        (error.status_code(), openai_error_body(error))
    }
}

fn payload_body(response: &UnifiedResponse) -> GatewayResult<Value> {
    response
        .payload
        .clone()
        .ok_or_else(|| GatewayError::Internal("response is missing its payload".to_string()))
}

fn non_streaming(chunks: UnifiedStream) -> ByteStream {
    drop(chunks);

    let error = GatewayError::InvalidRequest("this endpoint does not support streaming".to_string());
    let body = openai_error_body(&error);

    futures::stream::iter([Ok(bytes::Bytes::from(format!("data: {body}\n\n")))]).boxed()
}

fn first_chunk(chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
    chunks
        .into_iter()
        .find(|chunk| !chunk.is_done)
        .ok_or_else(|| GatewayError::Internal("empty response stream".to_string()))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;

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
    fn embeddings_input_normalizes_to_list() {
        let inbound = EmbeddingsInbound;

        let unified = inbound
            .parse_request(&raw(
                "/v1/embeddings",
                r#"{"model": "text-embedding-3-small", "input": "hello"}"#,
            ))
            .unwrap();

        assert_eq!(unified.request_type, RequestType::Embedding);
        assert_eq!(unified.embedding.as_ref().unwrap().input, vec!["hello"]);
    }

    #[test]
    fn rerank_documents_normalize_to_text() {
        let inbound = RerankInbound;

        let unified = inbound
            .parse_request(&raw(
                "/jina/v1/rerank",
                r#"{"model": "jina-reranker-v2", "query": "q", "documents": ["a", {"text": "b"}], "top_n": 1}"#,
            ))
            .unwrap();

        let rerank = unified.rerank.as_ref().unwrap();
        assert_eq!(rerank.documents, vec!["a", "b"]);
        assert_eq!(rerank.top_n, Some(1));
    }

    #[test]
    fn rerank_requires_query() {
        let inbound = RerankInbound;

        let error = inbound
            .parse_request(&raw(
                "/v1/rerank",
                r#"{"model": "jina-reranker-v2", "query": "", "documents": []}"#,
            ))
            .unwrap_err();

        assert!(matches!(error, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn response_body_passes_payload_through() {
        let inbound = EmbeddingsInbound;

        let mut response = UnifiedResponse::empty("text-embedding-3-small");
        response.payload = Some(json!({"object": "list", "data": []}));

        let body = inbound.response_body(&response).unwrap();
        assert_eq!(body["object"], "list");

        let missing = inbound.response_body(&UnifiedResponse::empty("m")).unwrap_err();
        assert!(matches!(missing, GatewayError::Internal(_)));
    }
}
