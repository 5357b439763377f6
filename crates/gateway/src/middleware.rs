//! Middleware hooks around the transformation stages.
//!
//! Request-side hooks run in registration order, response-side hooks in
//! reverse. Stream hooks return a wrapped stream whose effect is realized
//! lazily as chunks flow; they must preserve chunk order.

pub(crate) mod dumper;

use std::sync::Arc;

use config::ChannelConfig;
use http::StatusCode;
use serde_json::Value;

use crate::{
    error::GatewayError,
    messages::unified::{UnifiedRequest, UnifiedResponse},
    selector::AttemptContext,
    streams::{EventStream, UnifiedStream},
    transport::{ProviderRequest, ProviderResponse},
};

/// Metadata key recording whether the client itself asked for stream usage,
/// before the usage injector forces it on upstream.
pub(crate) const CLIENT_INCLUDE_USAGE_KEY: &str = "client_include_usage";

#[allow(unused_variables)]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Once per request, right after inbound parsing. Forward order.
    fn on_inbound_llm_request(&self, request: &mut UnifiedRequest) {}

    /// Once per attempt, before the outbound transformer builds the wire
    /// request. Forward order.
    fn on_outbound_llm_request(&self, request: &mut UnifiedRequest, channel: &ChannelConfig) {}

    /// Once per attempt, on the fully built wire request. Forward order.
    fn on_outbound_raw_request(&self, request: &mut ProviderRequest, unified: &UnifiedRequest) {}

    /// Once per successful attempt. Reverse order.
    fn on_outbound_raw_response(&self, response: &ProviderResponse, unified: &UnifiedRequest) {}

    /// Once per failed attempt. Reverse order.
    fn on_outbound_raw_error(&self, error: &GatewayError, attempt: &AttemptContext) {}

    /// Once per successful attempt, after outbound parsing. Reverse order.
    fn on_outbound_llm_response(&self, response: &mut UnifiedResponse) {}

    /// Wrap the raw event stream of a successful streaming attempt. Reverse
    /// order.
    fn on_outbound_raw_stream(&self, stream: EventStream, unified: &UnifiedRequest) -> EventStream {
        stream
    }

    /// Wrap the unified chunk stream of a successful streaming attempt.
    /// Reverse order.
    fn on_outbound_llm_stream(&self, stream: UnifiedStream, unified: &UnifiedRequest) -> UnifiedStream {
        stream
    }

    /// Once per successful non-streaming request, on the serialized body.
    /// Forward order.
    fn on_inbound_raw_response(&self, status: StatusCode, body: &mut Value) {}
}

/// The ordered middleware chain.
#[derive(Clone, Default)]
pub(crate) struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn inbound_llm_request(&self, request: &mut UnifiedRequest) {
        for middleware in &self.middlewares {
            middleware.on_inbound_llm_request(request);
        }
    }

    pub fn outbound_llm_request(&self, request: &mut UnifiedRequest, channel: &ChannelConfig) {
        for middleware in &self.middlewares {
            middleware.on_outbound_llm_request(request, channel);
        }
    }

    pub fn outbound_raw_request(&self, request: &mut ProviderRequest, unified: &UnifiedRequest) {
        for middleware in &self.middlewares {
            middleware.on_outbound_raw_request(request, unified);
        }
    }

    pub fn outbound_raw_response(&self, response: &ProviderResponse, unified: &UnifiedRequest) {
        for middleware in self.middlewares.iter().rev() {
            middleware.on_outbound_raw_response(response, unified);
        }
    }

    pub fn outbound_raw_error(&self, error: &GatewayError, attempt: &AttemptContext) {
        for middleware in self.middlewares.iter().rev() {
            middleware.on_outbound_raw_error(error, attempt);
        }
    }

    pub fn outbound_llm_response(&self, response: &mut UnifiedResponse) {
        for middleware in self.middlewares.iter().rev() {
            middleware.on_outbound_llm_response(response);
        }
    }

    pub fn wrap_outbound_raw_stream(&self, mut stream: EventStream, unified: &UnifiedRequest) -> EventStream {
        for middleware in self.middlewares.iter().rev() {
            stream = middleware.on_outbound_raw_stream(stream, unified);
        }
        stream
    }

    pub fn wrap_outbound_llm_stream(&self, mut stream: UnifiedStream, unified: &UnifiedRequest) -> UnifiedStream {
        for middleware in self.middlewares.iter().rev() {
            stream = middleware.on_outbound_llm_stream(stream, unified);
        }
        stream
    }

    pub fn inbound_raw_response(&self, status: StatusCode, body: &mut Value) {
        for middleware in &self.middlewares {
            middleware.on_inbound_raw_response(status, body);
        }
    }
}

/// Forces `stream_options.include_usage` on streaming requests so upstreams
/// report usage, recording whether the client asked for it itself; the
/// inbound serializer withholds the usage chunk from clients that did not.
pub(crate) struct UsageInjector;

impl Middleware for UsageInjector {
    fn name(&self) -> &'static str {
        "usage-injector"
    }

    fn on_inbound_llm_request(&self, request: &mut UnifiedRequest) {
        if !request.is_streaming() {
            return;
        }

        request.transformer_metadata.insert(
            CLIENT_INCLUDE_USAGE_KEY.to_string(),
            Value::Bool(request.wants_stream_usage()),
        );

        request
            .stream_options
            .get_or_insert_with(Default::default)
            .include_usage = true;
    }
}

/// Whether the client originally asked for usage on the stream.
pub(crate) fn client_wants_usage(request: &UnifiedRequest) -> bool {
    request
        .transformer_metadata
        .get(CLIENT_INCLUDE_USAGE_KEY)
        .and_then(Value::as_bool)
        .unwrap_or_else(|| request.wants_stream_usage())
}
