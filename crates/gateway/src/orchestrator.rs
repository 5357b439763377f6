//! The execution orchestrator.
//!
//! One request flows: inbound parse → OnInboundLlmRequest → candidate
//! selection → per-candidate build/dispatch/classify with the retry and
//! switch policy → outbound parse → inbound serialize. Streaming and
//! non-streaming sides bridge through aggregation when a channel's stream
//! posture differs from the client's.

use std::sync::Arc;
use std::time::Duration;

use config::StreamMode;
use http::StatusCode;
use serde_json::Value;

use crate::{
    error::{GatewayError, GatewayResult},
    inbound::{self, InboundTransformer},
    messages::unified::{RawRequest, Role, UnifiedMessage, UnifiedRequest, UnifiedResponse},
    middleware::{MiddlewareChain, dumper::REQUEST_ID_KEY},
    outbound::{self, OutboundTransformer},
    request::RequestContext,
    selector::{AttemptCandidate, AttemptContext, ChannelSelector},
    sinks::{AttemptOutcome, ThreadSink, TraceSink},
    streams::{self, ByteStream, UnifiedStream},
    transport::Transport,
};

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Deterministic exponential backoff: 100 ms base, doubling, capped at 2 s.
fn backoff_delay(retry_index: usize) -> Duration {
    let factor = 2u32.saturating_pow(retry_index.min(16) as u32);
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP)
}

/// The response handed back to the HTTP layer.
pub enum GatewayResponse {
    Json {
        status: StatusCode,
        body: Value,
    },
    Stream {
        content_type: &'static str,
        frames: ByteStream,
    },
}

enum AttemptResult {
    Response(Box<UnifiedResponse>),
    Stream(UnifiedStream),
}

pub(crate) struct Orchestrator {
    transport: Transport,
    selector: Arc<dyn ChannelSelector>,
    middlewares: MiddlewareChain,
    trace: Arc<dyn TraceSink>,
    threads: Arc<dyn ThreadSink>,
}

impl Orchestrator {
    pub fn new(
        transport: Transport,
        selector: Arc<dyn ChannelSelector>,
        middlewares: MiddlewareChain,
        trace: Arc<dyn TraceSink>,
        threads: Arc<dyn ThreadSink>,
    ) -> Self {
        Self {
            transport,
            selector,
            middlewares,
            trace,
            threads,
        }
    }

    /// Process one inbound request end to end.
    ///
    /// Errors never escape: they are rendered in the dialect of the inbound
    /// transformer that owns the path.
    pub async fn process(&self, ctx: &RequestContext, raw: RawRequest) -> GatewayResponse {
        let path = raw.uri.split('?').next().unwrap_or(&raw.uri).to_string();

        let Some(inbound) = inbound::dispatch(&path) else {
            return GatewayResponse::Json {
                status: StatusCode::NOT_FOUND,
                body: serde_json::json!({
                    "error": {"message": format!("no handler mounted at '{path}'"), "type": "invalid_request_error"}
                }),
            };
        };

        match self.run(inbound, ctx, raw).await {
            Ok(response) => response,
            Err(error) => {
                log::debug!("request {} failed: {error}", ctx.request_id);
                let (status, body) = inbound.error_body(&error);
                GatewayResponse::Json { status, body }
            }
        }
    }

    async fn run(
        &self,
        inbound: &'static dyn InboundTransformer,
        ctx: &RequestContext,
        raw: RawRequest,
    ) -> GatewayResult<GatewayResponse> {
        let mut unified = inbound.parse_request(&raw)?;
        unified.tags = ctx.tags.clone();
        unified
            .transformer_metadata
            .insert(REQUEST_ID_KEY.to_string(), Value::String(ctx.request_id.clone()));

        self.middlewares.inbound_llm_request(&mut unified);

        let candidates = self.selector.candidates(&unified)?;
        let total = candidates.len();
        let client_streams = unified.is_streaming();

        log::debug!(
            "request {} model '{}' has {total} candidate channel(s)",
            ctx.request_id,
            unified.model
        );

        let mut last_error: Option<GatewayError> = None;

        for (index, candidate) in candidates.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(backoff_delay(index - 1)).await;
            }

            let upstream_streams = match candidate.channel.stream_mode {
                StreamMode::Auto => client_streams,
                StreamMode::Always => true,
                StreamMode::Never => false,
            };

            let mut waited_for_retry_after = false;

            loop {
                let attempt = AttemptContext {
                    channel_id: candidate.channel_id.clone(),
                    channel: candidate.channel.clone(),
                    credentials: candidate.credentials.clone(),
                    attempt_index: index,
                    request_id: ctx.request_id.clone(),
                    started_at: jiff::Timestamp::now(),
                };

                let mut attempt_request = unified.clone();
                attempt_request.stream = Some(upstream_streams);

                match self
                    .attempt(&candidate, &attempt, &mut attempt_request, ctx, upstream_streams)
                    .await
                {
                    Ok(result) => {
                        self.publish_attempt(&attempt, None);
                        self.publish_turn(ctx, &unified);

                        // The response path always serializes with the
                        // transformer that parsed the request.
                        let serializer = inbound::by_format(unified.api_format);
                        return self.finish(serializer, &unified, result, client_streams).await;
                    }
                    Err(error) => {
                        log::warn!(
                            "attempt {} on channel '{}' failed: {error}",
                            index,
                            attempt.channel_id
                        );

                        self.middlewares.outbound_raw_error(&error, &attempt);
                        self.publish_attempt(&attempt, Some(&error));

                        if !error.is_retryable() {
                            return Err(error);
                        }

                        // An upstream-provided Retry-After buys the same
                        // channel one more try before moving on.
                        if let Some(seconds) = error.retry_after_hint()
                            && !waited_for_retry_after
                        {
                            waited_for_retry_after = true;
                            tokio::time::sleep(Duration::from_secs(seconds).min(BACKOFF_CAP * 4)).await;
                            last_error = Some(error);
                            continue;
                        }

                        last_error = Some(error);
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GatewayError::Internal("no attempt was made".to_string())))
    }

    /// Execute one attempt against one candidate channel.
    async fn attempt(
        &self,
        candidate: &AttemptCandidate,
        attempt: &AttemptContext,
        attempt_request: &mut UnifiedRequest,
        ctx: &RequestContext,
        upstream_streams: bool,
    ) -> GatewayResult<AttemptResult> {
        let outbound = outbound::for_channel(candidate.channel.channel_type);

        self.middlewares
            .outbound_llm_request(attempt_request, &candidate.channel);

        let mut provider_request = outbound
            .build_request(attempt_request, &candidate.channel, candidate.credentials.as_ref())
            .await?;

        self.middlewares.outbound_raw_request(&mut provider_request, attempt_request);

        if upstream_streams {
            let open = tokio::time::timeout(ctx.llm_request_timeout, self.transport.open_stream(provider_request))
                .await
                .map_err(|_| GatewayError::UpstreamTemporary {
                    status: None,
                    message: "upstream did not answer within the attempt budget".to_string(),
                    retry_after: None,
                })??;

            // Caller cancellation propagates to the socket; the detached
            // wall-clock bound still applies while a shutdown drains the
            // stream.
            let closer = open.closer.clone();
            let caller = ctx.cancellation.clone();
            let deadline = ctx.detached_deadline();
            tokio::spawn(async move {
                tokio::select! {
                    () = caller.cancelled() => {}
                    () = deadline.cancelled() => {}
                }
                closer.close();
            });

            let events = self.middlewares.wrap_outbound_raw_stream(open.events, attempt_request);
            let unified_stream = outbound.stream(events);
            let unified_stream = self.middlewares.wrap_outbound_llm_stream(unified_stream, attempt_request);

            Ok(AttemptResult::Stream(unified_stream))
        } else {
            let response = tokio::time::timeout(ctx.llm_request_timeout, self.transport.send(provider_request))
                .await
                .map_err(|_| GatewayError::UpstreamTemporary {
                    status: None,
                    message: "upstream did not answer within the attempt budget".to_string(),
                    retry_after: None,
                })??;

            if !response.status.is_success() {
                let retry_after = response.retry_after();
                return Err(GatewayError::from_upstream(
                    response.status,
                    response.body_text(),
                    retry_after,
                ));
            }

            self.middlewares.outbound_raw_response(&response, attempt_request);

            let mut unified_response = outbound.parse_response(attempt_request, &response)?;
            self.middlewares.outbound_llm_response(&mut unified_response);

            Ok(AttemptResult::Response(Box::new(unified_response)))
        }
    }

    /// Serialize the attempt result back into the client's dialect,
    /// bridging between the streaming and non-streaming worlds when the
    /// channel's posture differs from the client's.
    async fn finish(
        &self,
        inbound: &'static dyn InboundTransformer,
        unified: &UnifiedRequest,
        result: AttemptResult,
        client_streams: bool,
    ) -> GatewayResult<GatewayResponse> {
        match (result, client_streams) {
            (AttemptResult::Stream(stream), true) => Ok(GatewayResponse::Stream {
                content_type: inbound.stream_content_type(),
                frames: inbound.stream(stream, unified),
            }),

            (AttemptResult::Response(response), false) => self.json_response(inbound, *response),

            // The upstream only streams: collect and aggregate into one body.
            (AttemptResult::Stream(stream), false) => {
                let (chunks, error) = streams::collect_chunks(stream).await;

                if let Some(error) = error {
                    return Err(error);
                }

                let response = inbound.aggregate(chunks)?;
                self.json_response(inbound, response)
            }

            // The upstream answered in one piece: synthesize a single-chunk
            // stream around it.
            (AttemptResult::Response(response), true) => Ok(GatewayResponse::Stream {
                content_type: inbound.stream_content_type(),
                frames: inbound.stream(streams::once_response(stream_shaped(*response)), unified),
            }),
        }
    }

    fn json_response(
        &self,
        inbound: &'static dyn InboundTransformer,
        response: UnifiedResponse,
    ) -> GatewayResult<GatewayResponse> {
        let mut body = inbound.response_body(&response)?;
        self.middlewares.inbound_raw_response(StatusCode::OK, &mut body);

        Ok(GatewayResponse::Json {
            status: StatusCode::OK,
            body,
        })
    }

    /// Trace publication is fire-and-forget; failures are logged, never
    /// surfaced.
    fn publish_attempt(&self, attempt: &AttemptContext, error: Option<&GatewayError>) {
        let outcome = AttemptOutcome {
            success: error.is_none(),
            status: error.map(|error| error.status_code().as_u16()),
            error: error.map(|error| error.to_string()),
            latency: attempt
                .started_at
                .duration_since(jiff::Timestamp::now())
                .unsigned_abs(),
        };

        let sink = self.trace.clone();
        let attempt = attempt.clone();

        tokio::spawn(async move {
            if let Err(error) = sink.record_attempt(attempt, outcome).await {
                log::warn!("trace sink rejected attempt record: {error}");
            }
        });
    }

    fn publish_turn(&self, ctx: &RequestContext, unified: &UnifiedRequest) {
        let Some(thread_id) = ctx.thread_id.clone() else {
            return;
        };

        let sink = self.threads.clone();
        let messages = unified.messages.clone();

        tokio::spawn(async move {
            if let Err(error) = sink.record_turn(thread_id, messages).await {
                log::warn!("thread sink rejected turn record: {error}");
            }
        });
    }
}

/// Rewrite a complete response into delta form so the single-chunk stream
/// serializes like any other stream.
fn stream_shaped(response: UnifiedResponse) -> UnifiedResponse {
    let mut chunk = response;
    chunk.object = "chat.completion.chunk".to_string();

    for choice in &mut chunk.choices {
        if let Some(message) = choice.message.take() {
            let UnifiedMessage {
                content, tool_calls, ..
            } = message;

            choice.delta = Some(crate::messages::unified::UnifiedDelta {
                role: Some(Role::Assistant),
                content: Some(match content {
                    crate::messages::unified::MessageContent::Text(text) => text,
                    parts @ crate::messages::unified::MessageContent::Parts(_) => {
                        UnifiedMessage {
                            role: Role::Assistant,
                            content: parts,
                            tool_calls: None,
                            tool_call_id: None,
                        }
                        .text_content()
                    }
                }),
                tool_calls: tool_calls.map(|calls| {
                    calls
                        .into_iter()
                        .map(|call| crate::messages::unified::ToolCallDelta {
                            index: call.index,
                            id: Some(call.id),
                            call_type: Some(call.call_type),
                            function: Some(crate::messages::unified::FunctionDelta {
                                name: Some(call.function.name),
                                arguments: Some(call.function.arguments),
                            }),
                        })
                        .collect()
                }),
                ..Default::default()
            });
        }
    }

    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{FinishReason, MessageContent, UnifiedChoice};

    #[test]
    fn backoff_is_deterministic_and_capped() {
        assert_eq!(backoff_delay(0), Duration::from_millis(100));
        assert_eq!(backoff_delay(1), Duration::from_millis(200));
        assert_eq!(backoff_delay(2), Duration::from_millis(400));
        assert_eq!(backoff_delay(3), Duration::from_millis(800));
        assert_eq!(backoff_delay(4), Duration::from_millis(1600));
        assert_eq!(backoff_delay(5), Duration::from_secs(2));
        assert_eq!(backoff_delay(12), Duration::from_secs(2));
    }

    #[test]
    fn stream_shaping_moves_message_into_delta() {
        let mut response = UnifiedResponse::empty("gpt-4");
        response.choices.push(UnifiedChoice {
            index: 0,
            message: Some(UnifiedMessage {
                role: Role::Assistant,
                content: MessageContent::Text("Hello".to_string()),
                tool_calls: None,
                tool_call_id: None,
            }),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        });

        let chunk = stream_shaped(response);
        let choice = &chunk.choices[0];

        assert!(choice.message.is_none());
        assert_eq!(choice.delta.as_ref().unwrap().content.as_deref(), Some("Hello"));
        assert_eq!(choice.finish_reason, Some(FinishReason::Stop));
    }
}
