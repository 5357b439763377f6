//! Per-request runtime context.

use std::time::Duration;

use config::{HeaderNamesConfig, ServerConfig};
use http::HeaderMap;
use tokio_util::sync::CancellationToken;

/// Runtime context carried alongside one inbound request.
///
/// Correlation ids come from the configurable inbound headers; missing trace
/// and request ids are generated. The cancellation token covers the whole
/// inbound request; upstream attempts derive bounded child deadlines from it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request id, `ar-<uuid>` when the client sent none.
    pub request_id: String,

    /// Trace id, `at-<uuid>` when the client sent none.
    pub trace_id: String,

    /// Conversation thread id, absent unless the client sent one.
    pub thread_id: Option<String>,

    /// Channel tag filter from the inbound headers.
    pub tags: Vec<String>,

    /// Total wall-clock budget for this request.
    pub request_timeout: Duration,

    /// Budget for one upstream attempt.
    pub llm_request_timeout: Duration,

    /// Cancelled when the inbound connection goes away.
    pub cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a deadline that survives inbound cancellation.
    ///
    /// Used while draining an in-flight stream during graceful shutdown: the
    /// returned token is not a child of the inbound token, but it still
    /// cancels at the upstream wall-clock bound.
    pub fn detached_deadline(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let timer = token.clone();
        let bound = self.llm_request_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(bound).await;
            timer.cancel();
        });

        token
    }
}

/// Extract the request context from the inbound headers.
pub(crate) fn extract_context(headers: &HeaderMap, names: &HeaderNamesConfig, server: &ServerConfig) -> RequestContext {
    let request_id = header_value(headers, &names.request_id)
        .unwrap_or_else(|| format!("ar-{}", uuid::Uuid::new_v4()));

    let trace_id = header_value(headers, &names.trace_id).unwrap_or_else(|| format!("at-{}", uuid::Uuid::new_v4()));

    let thread_id = header_value(headers, &names.thread_id);

    let tags = header_value(headers, &names.channel_tags)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    RequestContext {
        request_id,
        trace_id,
        thread_id,
        tags,
        request_timeout: Duration::from_secs(server.request_timeout),
        llm_request_timeout: Duration::from_secs(server.llm_request_timeout),
        cancellation: CancellationToken::new(),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
