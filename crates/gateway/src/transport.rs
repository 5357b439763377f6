//! Outbound HTTP execution and stream framing.
//!
//! The transport owns the shared connection pool, executes provider requests
//! and decodes the two upstream stream framings (SSE and AWS EventStream)
//! into [`StreamEvent`]s before any dialect parsing happens.

pub(crate) mod eventstream;

use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::{HeaderMap, Method, StatusCode, header};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{GatewayError, GatewayResult},
    streams::EventStream,
};

/// One framed chunk from an upstream stream, before dialect parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// The frame's event name (`event:` for SSE, `:event-type` for AWS
    /// EventStream). Empty names are normalized to `None`.
    pub event: Option<String>,
    pub data: Bytes,
}

/// A fully built provider HTTP request.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub stream: bool,
}

/// A complete provider response, any status.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProviderResponse {
    /// Parsed `Retry-After` in seconds. Only the integer form is honored.
    pub fn retry_after(&self) -> Option<u64> {
        retry_after_seconds(&self.headers)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// An opened upstream stream. The pre-flight status is already known; the
/// events arrive lazily.
pub(crate) struct OpenStream {
    pub events: EventStream,
    pub closer: StreamCloser,
}

/// Idempotent handle that aborts an open stream and releases its socket.
#[derive(Clone)]
pub(crate) struct StreamCloser {
    token: CancellationToken,
}

impl StreamCloser {
    pub fn close(&self) {
        self.token.cancel();
    }
}

#[derive(Clone)]
pub(crate) struct Transport {
    client: Client,
}

impl Transport {
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            // No connection TTL exists in the pool; a short idle timeout is
            // what picks up upstream DNS changes.
            .pool_idle_timeout(Some(Duration::from_secs(5)))
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|error| GatewayError::Internal(format!("failed to build HTTP client: {error}")))?;

        Ok(Self { client })
    }

    /// Execute a non-streaming request. Network failures become
    /// `UpstreamTemporary`; HTTP errors are returned as regular responses for
    /// the orchestrator to classify.
    pub async fn send(&self, request: ProviderRequest) -> GatewayResult<ProviderResponse> {
        let response = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(network_error)?;

        Ok(ProviderResponse { status, headers, body })
    }

    /// Open a streaming request.
    ///
    /// A non-2xx pre-flight is classified and returned as an error together
    /// with the full body, so the orchestrator can apply its retry matrix
    /// before any bytes reach the client.
    pub async fn open_stream(&self, request: ProviderRequest) -> GatewayResult<OpenStream> {
        let response = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();

        if !status.is_success() {
            let retry_after = retry_after_seconds(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_upstream(status, body, retry_after));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let token = CancellationToken::new();
        let closer = StreamCloser { token: token.clone() };

        let events: EventStream = if content_type.contains("text/event-stream") {
            decode_sse(response).boxed()
        } else if content_type.contains("vnd.amazon.eventstream") {
            eventstream::decode(response.bytes_stream().boxed()).boxed()
        } else {
            // A non-streaming upstream body answered a streaming request;
            // surface it as one opaque event.
            let body = response.bytes().await.map_err(network_error)?;
            futures::stream::iter([Ok(StreamEvent { event: None, data: body })]).boxed()
        };

        let events = events.take_until(token.cancelled_owned()).boxed();

        Ok(OpenStream { events, closer })
    }
}

fn decode_sse(response: reqwest::Response) -> impl futures::Stream<Item = GatewayResult<StreamEvent>> {
    response.bytes_stream().eventsource().map(|event| match event {
        Ok(event) => Ok(StreamEvent {
            event: (!event.event.is_empty() && event.event != "message").then_some(event.event),
            data: Bytes::from(event.data),
        }),
        Err(error) => Err(GatewayError::StreamMidFault(format!("SSE decode error: {error}"))),
    })
}

fn network_error(error: reqwest::Error) -> GatewayError {
    GatewayError::UpstreamTemporary {
        status: None,
        message: format!("upstream connection failed: {error}"),
        retry_after: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_parses_integer_seconds_only() {
        let mut headers = HeaderMap::new();
        headers.insert(header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after_seconds(&headers), Some(7));

        headers.insert(header::RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after_seconds(&headers), None);
    }

    #[test]
    fn stream_closer_is_idempotent() {
        let token = CancellationToken::new();
        let closer = StreamCloser { token };

        closer.close();
        closer.close();
        closer.close();
    }
}
