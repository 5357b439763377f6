//! Stream utilities shared by transformers and the orchestrator.
//!
//! All gateway streams are pull-based [`futures::Stream`]s; closing maps to
//! dropping the stream (or cancelling its [`tokio_util::sync::CancellationToken`],
//! which is idempotent). The combinators here cover what the standard
//! adapters do not: the append contract and SSE byte framing.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Stream, StreamExt, stream::BoxStream};
use pin_project::pin_project;
use serde::Serialize;

use crate::{
    error::{GatewayError, GatewayResult},
    messages::unified::UnifiedResponse,
    transport::StreamEvent,
};

/// Wire bytes flowing back to the client.
pub type ByteStream = BoxStream<'static, GatewayResult<Bytes>>;

/// Framed transport events before dialect parsing.
pub type EventStream = BoxStream<'static, GatewayResult<StreamEvent>>;

/// Unified chunks between the outbound parse and inbound serialize stages.
pub type UnifiedStream = BoxStream<'static, GatewayResult<UnifiedResponse>>;

/// A single-chunk unified stream around a complete response.
pub fn once_response(response: UnifiedResponse) -> UnifiedStream {
    futures::stream::iter([Ok(response), Ok(UnifiedResponse::done())]).boxed()
}

/// Append `items` after `base` is exhausted.
///
/// The base is always flushed fully, error items included. The appended items
/// are only emitted when the base finished without an error.
pub fn append<S, T>(base: S, items: Vec<T>) -> Append<S, T>
where
    S: Stream,
{
    Append {
        base,
        items: items.into(),
        base_errored: false,
        base_done: false,
    }
}

#[pin_project]
pub struct Append<S, T> {
    #[pin]
    base: S,
    items: VecDeque<T>,
    base_errored: bool,
    base_done: bool,
}

impl<S, T, E> Stream for Append<S, T>
where
    S: Stream<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if !*this.base_done {
            match ready!(this.base.poll_next(cx)) {
                Some(Ok(item)) => return Poll::Ready(Some(Ok(item))),
                Some(Err(error)) => {
                    *this.base_errored = true;
                    return Poll::Ready(Some(Err(error)));
                }
                None => *this.base_done = true,
            }
        }

        if *this.base_errored {
            return Poll::Ready(None);
        }

        Poll::Ready(this.items.pop_front().map(Ok))
    }
}

/// Encode one SSE `data:` frame.
pub fn sse_data<T: Serialize>(payload: &T) -> GatewayResult<Bytes> {
    let json = sonic_rs::to_string(payload)
        .map_err(|error| GatewayError::Internal(format!("failed to serialize stream chunk: {error}")))?;

    Ok(Bytes::from(format!("data: {json}\n\n")))
}

/// Encode one named SSE frame (`event: <name>\ndata: <json>\n\n`).
pub fn sse_event<T: Serialize>(name: &str, payload: &T) -> GatewayResult<Bytes> {
    let json = sonic_rs::to_string(payload)
        .map_err(|error| GatewayError::Internal(format!("failed to serialize stream event: {error}")))?;

    Ok(Bytes::from(format!("event: {name}\ndata: {json}\n\n")))
}

/// The OpenAI-family terminal frame.
pub fn sse_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// Drain a unified stream into an ordered chunk list.
///
/// Stops at the first error, which is returned after whatever was collected;
/// callers decide whether partial aggregation is acceptable.
pub async fn collect_chunks(mut stream: UnifiedStream) -> (Vec<UnifiedResponse>, Option<GatewayError>) {
    let mut chunks = Vec::new();

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                if chunk.is_done {
                    break;
                }
                chunks.push(chunk);
            }
            Err(error) => return (chunks, Some(error)),
        }
    }

    (chunks, None)
}

#[cfg(test)]
mod tests {
    use futures::{executor::block_on, stream};

    use super::*;

    fn ok_stream(items: Vec<i32>) -> impl Stream<Item = Result<i32, String>> {
        stream::iter(items.into_iter().map(Ok))
    }

    #[test]
    fn append_flushes_base_then_items() {
        let appended = append(ok_stream(vec![1, 2]), vec![3, 4]);
        let collected: Vec<_> = block_on(appended.collect::<Vec<_>>());

        let values: Vec<i32> = collected.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[test]
    fn append_suppresses_items_after_base_error() {
        let base = stream::iter(vec![Ok(1), Err("boom".to_string()), Ok(2)]);
        let appended = append(base, vec![9]);
        let collected: Vec<_> = block_on(appended.collect::<Vec<_>>());

        // The base is flushed fully, the error included, and the appended
        // item never shows up.
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0], Ok(1));
        assert_eq!(collected[1], Err("boom".to_string()));
        assert_eq!(collected[2], Ok(2));
    }

    #[test]
    fn append_with_empty_base_emits_items_only() {
        let appended = append(ok_stream(vec![]), vec![7]);
        let collected: Vec<_> = block_on(appended.collect::<Vec<_>>());

        assert_eq!(collected, vec![Ok(7)]);
    }

    #[test]
    fn sse_framing() {
        let frame = sse_data(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(frame, Bytes::from_static(b"data: {\"a\":1}\n\n"));

        let frame = sse_event("message_stop", &serde_json::json!({"type": "message_stop"})).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: message_stop\ndata: "));
        assert!(text.ends_with("\n\n"));

        assert_eq!(sse_done(), Bytes::from_static(b"data: [DONE]\n\n"));
    }

    #[test]
    fn collect_chunks_stops_at_done_sentinel() {
        let mut first = UnifiedResponse::empty("m");
        first.id = "1".to_string();

        let stream: UnifiedStream =
            stream::iter(vec![Ok(first), Ok(UnifiedResponse::done()), Ok(UnifiedResponse::empty("late"))]).boxed();

        let (chunks, error) = block_on(collect_chunks(stream));

        assert_eq!(chunks.len(), 1);
        assert!(error.is_none());
    }
}
