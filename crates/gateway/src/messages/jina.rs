//! Jina rerank wire types.
//!
//! Jina's embeddings surface is OpenAI-compatible and reuses the types in
//! [`super::openai`]; only rerank has its own shape.

use serde::{Deserialize, Serialize};

/// `POST /v1/rerank` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankRequest {
    pub model: String,
    pub query: String,
    pub documents: Vec<RerankDocument>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_n: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_documents: Option<bool>,
}

/// Documents are bare strings or `{"text": ...}` objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RerankDocument {
    Text(String),
    Object { text: String },
}

impl RerankDocument {
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) | Self::Object { text } => text,
        }
    }
}

/// `POST /v1/rerank` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResponse {
    pub model: String,
    pub results: Vec<RerankResult>,
    pub usage: RerankUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResult {
    pub index: u32,
    pub relevance_score: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<RerankDocumentObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankDocumentObject {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RerankUsage {
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn documents_accept_both_shapes() {
        let request: RerankRequest = serde_json::from_value(json!({
            "model": "jina-reranker-v2",
            "query": "rust gateways",
            "documents": ["plain string", {"text": "object form"}]
        }))
        .unwrap();

        let texts: Vec<String> = request.documents.into_iter().map(RerankDocument::into_text).collect();
        assert_eq!(texts, vec!["plain string", "object form"]);
    }

    #[test]
    fn response_serializes_scores() {
        let response = RerankResponse {
            model: "jina-reranker-v2".to_string(),
            results: vec![RerankResult {
                index: 1,
                relevance_score: 0.92,
                document: Some(RerankDocumentObject {
                    text: "object form".to_string(),
                }),
            }],
            usage: RerankUsage { total_tokens: 12 },
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["results"][0]["index"], 1);
        assert_eq!(json["results"][0]["document"]["text"], "object form");
    }
}
