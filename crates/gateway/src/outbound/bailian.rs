//! Bailian outbound transformer.
//!
//! OpenAI-compatible on the wire, but the stream needs repair: Bailian
//! interleaves preliminary text with tool calls and re-sends empty-object
//! argument chunks. The filter buffers text until the stream commits to
//! either tool calls (buffered text is discarded and later text suppressed)
//! or a plain finish (text is flushed as one coalesced chunk ahead of the
//! finish chunk). A literal `"{}"` argument delta is dropped when non-empty
//! arguments were already seen for the same `{choice, tool}` key.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use config::ChannelConfig;
use futures::StreamExt;

use super::{OutboundTransformer, apply_credentials, openai::OpenAiOutbound};
use crate::{
    credentials::CredentialProvider,
    error::GatewayResult,
    messages::unified::{
        FinishReason, Role, UnifiedChoice, UnifiedDelta, UnifiedRequest, UnifiedResponse, to_openai,
    },
    streams::{EventStream, UnifiedStream},
    transport::{ProviderRequest, ProviderResponse},
};

pub(crate) struct BailianOutbound;

#[async_trait]
impl OutboundTransformer for BailianOutbound {
    fn name(&self) -> &'static str {
        "bailian"
    }

    async fn build_request(
        &self,
        request: &mut UnifiedRequest,
        channel: &ChannelConfig,
        credentials: &dyn CredentialProvider,
    ) -> GatewayResult<ProviderRequest> {
        let mut provider_request = OpenAiOutbound.build_openai_request(request, channel)?;
        apply_credentials(&mut provider_request, channel, credentials).await?;
        Ok(provider_request)
    }

    fn parse_response(&self, request: &UnifiedRequest, response: &ProviderResponse) -> GatewayResult<UnifiedResponse> {
        super::openai::parse_openai_response(request, response)
    }

    fn stream(&self, events: EventStream) -> UnifiedStream {
        filter_stream(super::openai::openai_chunk_stream(events))
    }

    fn aggregate(&self, chunks: Vec<UnifiedResponse>) -> GatewayResult<UnifiedResponse> {
        Ok(to_openai::aggregate_chunks(&chunks))
    }
}

pub(crate) fn filter_stream(chunks: UnifiedStream) -> UnifiedStream {
    let state = FilterState {
        chunks,
        pending: VecDeque::new(),
        filter: BailianFilter::default(),
        ended: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }

            if state.ended {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => state.pending.extend(state.filter.on_chunk(chunk).into_iter().map(Ok)),
                Some(Err(error)) => {
                    state.pending.push_back(Err(error));
                    state.ended = true;
                }
                None => {
                    state.pending.extend(state.filter.flush().into_iter().map(Ok));
                    state.ended = true;
                }
            }
        }
    })
    .boxed()
}

#[derive(Default)]
struct BailianFilter {
    buffered_text: String,
    /// Skeleton of the first buffered text chunk, reused for the coalesced
    /// emission.
    template: Option<UnifiedResponse>,
    tool_seen: bool,
    nonempty_args: HashSet<(u32, u32)>,
    flushed: bool,
}

struct FilterState {
    chunks: UnifiedStream,
    pending: VecDeque<GatewayResult<UnifiedResponse>>,
    filter: BailianFilter,
    ended: bool,
}

impl BailianFilter {
    fn on_chunk(&mut self, mut chunk: UnifiedResponse) -> Vec<UnifiedResponse> {
        if chunk.is_done {
            let mut output = self.flush();
            output.push(chunk);
            return output;
        }

        let mut output = Vec::new();
        let mut finish: Option<FinishReason> = None;

        for choice in &mut chunk.choices {
            if let Some(reason) = choice.finish_reason {
                finish = Some(reason);
            }

            let Some(delta) = choice.delta.as_mut() else { continue };

            if let Some(calls) = delta.tool_calls.as_mut() {
                if !self.tool_seen && !calls.is_empty() {
                    // The stream committed to tool calls: preliminary text
                    // never reaches the client.
                    self.tool_seen = true;
                    self.buffered_text.clear();
                    self.template = None;
                }

                let nonempty_args = &mut self.nonempty_args;
                let choice_index = choice.index;

                calls.retain(|call| {
                    let key = (choice_index, call.index);
                    let arguments = call
                        .function
                        .as_ref()
                        .and_then(|function| function.arguments.as_deref())
                        .unwrap_or("");

                    if arguments == "{}" && nonempty_args.contains(&key) {
                        return false;
                    }

                    if !arguments.is_empty() && arguments != "{}" {
                        nonempty_args.insert(key);
                    }

                    true
                });

                if calls.is_empty() {
                    delta.tool_calls = None;
                }
            }

            if let Some(text) = delta.content.take()
                && !text.is_empty()
            {
                if self.tool_seen {
                    // Suppressed until the stream ends.
                } else if finish.is_none() {
                    if self.template.is_none() {
                        self.template = Some(skeleton(&chunk.id, &chunk.model, chunk.created));
                    }
                    self.buffered_text.push_str(&text);
                } else {
                    // Text arriving on the finish chunk itself joins the
                    // buffer and flushes below.
                    self.buffered_text.push_str(&text);
                }
            }
        }

        match finish {
            Some(FinishReason::ToolCalls) => {
                output.push(chunk);
            }
            Some(_) if !self.tool_seen => {
                output.extend(self.flush());
                output.push(chunk);
            }
            Some(_) => {
                output.push(chunk);
            }
            None => {
                if chunk.has_meaningful_delta() {
                    output.push(chunk);
                }
            }
        }

        output
    }

    /// Emit the coalesced text chunk, if any text is still buffered.
    fn flush(&mut self) -> Vec<UnifiedResponse> {
        if self.flushed || self.tool_seen || self.buffered_text.is_empty() {
            self.buffered_text.clear();
            return Vec::new();
        }
        self.flushed = true;

        let mut coalesced = self
            .template
            .take()
            .unwrap_or_else(|| skeleton("", "", 0));

        coalesced.choices = vec![UnifiedChoice {
            index: 0,
            delta: Some(UnifiedDelta {
                role: Some(Role::Assistant),
                content: Some(std::mem::take(&mut self.buffered_text)),
                ..Default::default()
            }),
            ..Default::default()
        }];

        vec![coalesced]
    }
}

fn skeleton(id: &str, model: &str, created: i64) -> UnifiedResponse {
    let mut chunk = UnifiedResponse::empty(model.to_string());
    chunk.id = id.to_string();
    chunk.object = "chat.completion.chunk".to_string();
    chunk.created = created;
    chunk
}
