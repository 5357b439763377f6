//! Switchyard's request gateway: accepts LLM requests in several vendor
//! dialects, normalizes them to a unified representation, dispatches them to
//! a configured upstream channel, and translates the response (or stream)
//! back into the dialect the client used.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use http::{HeaderValue, StatusCode, header};

mod credentials;
mod error;
mod inbound;
mod messages;
mod middleware;
mod orchestrator;
mod outbound;
mod request;
mod selector;
mod sinks;
mod streams;
mod transport;
mod watch;

pub use credentials::{CredentialHeaders, CredentialProvider};
pub use error::{GatewayError, GatewayResult};
pub use middleware::Middleware;
pub use request::RequestContext;
pub use selector::{AttemptCandidate, AttemptContext, ChannelSelector};
pub use sinks::{AttemptOutcome, CalendarPeriod, NoopSink, ThreadSink, TraceSink};
pub use watch::{MemoryWatcher, RedisWatcher, Watcher};

use crate::{
    credentials::CredentialStore,
    messages::{openai, unified::RawRequest},
    middleware::{MiddlewareChain, UsageInjector, dumper::Dumper},
    orchestrator::{GatewayResponse, Orchestrator},
    selector::ConfigSelector,
    transport::Transport,
};

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Builds the gateway with optional external collaborators plugged in.
pub struct GatewayBuilder<'a> {
    config: &'a config::Config,
    trace: Arc<dyn TraceSink>,
    threads: Arc<dyn ThreadSink>,
    extra_middlewares: Vec<Arc<dyn Middleware>>,
}

impl<'a> GatewayBuilder<'a> {
    pub fn new(config: &'a config::Config) -> Self {
        Self {
            config,
            trace: Arc::new(NoopSink),
            threads: Arc::new(NoopSink),
            extra_middlewares: Vec::new(),
        }
    }

    /// Replace the no-op trace sink.
    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = sink;
        self
    }

    /// Replace the no-op thread sink.
    pub fn thread_sink(mut self, sink: Arc<dyn ThreadSink>) -> Self {
        self.threads = sink;
        self
    }

    /// Register an additional middleware after the built-in ones.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.extra_middlewares.push(middleware);
        self
    }

    pub async fn build(self) -> anyhow::Result<Router> {
        let config = self.config;

        let credentials = Arc::new(CredentialStore::from_config(&config.credentials)?);
        credentials.start();

        let selector = Arc::new(ConfigSelector::new(&config.channels, credentials.clone()));

        let mut middlewares: Vec<Arc<dyn Middleware>> = vec![Arc::new(UsageInjector)];
        if config.dump.enabled {
            log::info!("debug dumper enabled, writing to {}", config.dump.dir.display());
            middlewares.push(Arc::new(Dumper::new(config.dump.dir.clone())));
        }
        middlewares.extend(self.extra_middlewares);

        let transport = Transport::new(Duration::from_secs(config.server.llm_request_timeout))?;

        let orchestrator = Orchestrator::new(
            transport,
            selector.clone(),
            MiddlewareChain::new(middlewares),
            self.trace,
            self.threads,
        );

        let watcher: Arc<dyn Watcher> = match config.watch.backend {
            config::WatchBackend::Memory => Arc::new(MemoryWatcher::new()),
            config::WatchBackend::Redis => {
                let url = config
                    .watch
                    .url
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("watch backend 'redis' requires a url"))?;

                Arc::new(RedisWatcher::connect(url.as_str(), &config.watch.channel).await?)
            }
        };

        let state = Arc::new(GatewayState {
            orchestrator,
            selector,
            credentials,
            watcher,
            header_names: config.headers.clone(),
            server: config.server.clone(),
        });

        state.spawn_channel_watcher();

        let router = Router::new()
            .route("/health", get(health))
            .route("/v1/models", get(list_models))
            .route("/v1/chat/completions", post(dispatch))
            .route("/v1/responses", post(dispatch))
            .route("/v1/embeddings", post(dispatch))
            .route("/v1/rerank", post(dispatch))
            .route("/anthropic/v1/messages", post(dispatch))
            .route("/gemini/{version}/models/{model_action}", post(dispatch))
            .route("/jina/v1/embeddings", post(dispatch))
            .route("/jina/v1/rerank", post(dispatch))
            .with_state(state);

        Ok(router)
    }
}

/// Create the gateway router with default collaborators.
pub async fn router(config: &config::Config) -> anyhow::Result<Router> {
    GatewayBuilder::new(config).build().await
}

struct GatewayState {
    orchestrator: Orchestrator,
    selector: Arc<ConfigSelector>,
    credentials: Arc<CredentialStore>,
    watcher: Arc<dyn Watcher>,
    header_names: config::HeaderNamesConfig,
    server: config::ServerConfig,
}

impl GatewayState {
    /// Apply channel inventory updates published through the watcher.
    fn spawn_channel_watcher(self: &Arc<Self>) {
        let mut receiver = self.watcher.subscribe();
        let selector = self.selector.clone();

        tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                match serde_json::from_str::<indexmap::IndexMap<String, config::ChannelConfig>>(&payload) {
                    Ok(channels) => {
                        log::info!("applying channel update with {} channel(s)", channels.len());
                        selector.swap_channels(&channels);
                    }
                    Err(error) => log::warn!("ignoring undecodable channel update: {error}"),
                }
            }
        });
    }
}

impl Drop for GatewayState {
    fn drop(&mut self) {
        self.credentials.stop();
    }
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({"status": "ok"}))
}

async fn list_models(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let data = state
        .selector
        .all_models()
        .into_iter()
        .map(|id| openai::Model {
            id,
            object: "model".to_string(),
            created: 0,
            owned_by: "switchyard".to_string(),
        })
        .collect();

    axum::Json(openai::ModelsResponse {
        object: "list".to_string(),
        data,
    })
}

/// Single entry point for every dialect path; the orchestrator picks the
/// inbound transformer from the URL.
async fn dispatch(State(state): State<Arc<GatewayState>>, request: axum::extract::Request) -> Response {
    let (parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(error) => {
            let body = serde_json::json!({
                "error": {"message": format!("unreadable request body: {error}"), "type": "invalid_request_error"}
            });
            return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
        }
    };

    let ctx = request::extract_context(&parts.headers, &state.header_names, &state.server);

    let raw = RawRequest {
        method: parts.method,
        uri: parts.uri.to_string(),
        headers: parts.headers,
        body: bytes,
    };

    let request_id = ctx.request_id.clone();
    let response = state.orchestrator.process(&ctx, raw).await;

    let mut response = match response {
        GatewayResponse::Json { status, body } => (status, axum::Json(body)).into_response(),
        GatewayResponse::Stream { content_type, frames } => {
            let frames = frames.map(|frame| frame.map_err(axum::BoxError::from));

            let mut response = Response::new(Body::from_stream(frames));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
        }
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}
