use http::StatusCode;
use thiserror::Error;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Gateway error taxonomy.
///
/// Classification drives both the retry policy (see [`GatewayError::is_retryable`])
/// and the HTTP rendering, which is dialect-specific and lives with each
/// inbound transformer.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Malformed body, missing required field, unsupported content type.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Model not routable to any channel.
    #[error("Model '{0}' is not routable to any channel")]
    InvalidModel(String),

    /// Upstream rejected the credential.
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Upstream refused access with a valid credential.
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Upstream 429. Carries the parsed `Retry-After` seconds when present.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    /// Network failure, 5xx, or stream reset before the first byte.
    /// Eligible for retry and channel switch.
    #[error("Upstream temporarily unavailable: {message}")]
    UpstreamTemporary {
        status: Option<u16>,
        message: String,
        retry_after: Option<u64>,
    },

    /// Upstream 4xx other than 401/403/408/429. Terminal for the request.
    #[error("Upstream rejected the request ({status}): {message}")]
    UpstreamPermanent { status: u16, message: String },

    /// Upstream error after bytes were already delivered to the client.
    /// Never retried; surfaced as a stream error frame.
    #[error("Stream failed mid-flight: {0}")]
    StreamMidFault(String),

    /// Caller cancellation or deadline expiry.
    #[error("Request cancelled")]
    Cancelled,

    /// Bug in a transformer or middleware. Details are not leaked to clients.
    #[error("Internal server error")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status code the client sees for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidModel(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamTemporary { .. } | Self::StreamMidFault(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamPermanent { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the orchestrator may move on to the next attempt candidate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamTemporary { .. } | Self::RateLimited { .. })
    }

    /// OpenAI-style `type` discriminator used by the error envelopes.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::InvalidModel(_) => "invalid_request_error",
            Self::Unauthorized(_) => "authentication_error",
            Self::Forbidden(_) => "permission_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::UpstreamTemporary { .. } | Self::UpstreamPermanent { .. } | Self::StreamMidFault(_) => "api_error",
            Self::Cancelled => "timeout_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Parsed `Retry-After` seconds, when the upstream sent one.
    pub fn retry_after_hint(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } | Self::UpstreamTemporary { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify an upstream HTTP status and body into an error.
    pub fn from_upstream(status: StatusCode, body: String, retry_after: Option<u64>) -> Self {
        match status.as_u16() {
            401 => Self::Unauthorized(body),
            403 => Self::Forbidden(body),
            429 => Self::RateLimited {
                message: body,
                retry_after,
            },
            408 => Self::UpstreamTemporary {
                status: Some(408),
                message: body,
                retry_after,
            },
            500..=599 => Self::UpstreamTemporary {
                status: Some(status.as_u16()),
                message: body,
                retry_after,
            },
            code => Self::UpstreamPermanent {
                status: code,
                message: body,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_classification() {
        let error = GatewayError::from_upstream(StatusCode::TOO_MANY_REQUESTS, "slow down".into(), Some(3));
        assert!(error.is_retryable());
        assert!(matches!(error, GatewayError::RateLimited { retry_after: Some(3), .. }));

        let error = GatewayError::from_upstream(StatusCode::BAD_GATEWAY, "".into(), None);
        assert!(error.is_retryable());

        let error = GatewayError::from_upstream(StatusCode::NOT_FOUND, "no such model".into(), None);
        assert!(!error.is_retryable());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_model_maps_to_422() {
        let error = GatewayError::InvalidModel("gpt-4o".into());
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!error.is_retryable());
    }

    #[test]
    fn internal_errors_do_not_leak() {
        let error = GatewayError::Internal("selector index out of bounds".into());
        assert_eq!(error.client_message(), "Internal server error");
    }
}
