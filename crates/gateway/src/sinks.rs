//! Trace and thread sink contracts.
//!
//! Both are fire-and-forget from the orchestrator's point of view: records
//! are published from a detached task and publish errors are logged, never
//! surfaced to the client.

pub(crate) mod period;

pub use period::CalendarPeriod;

use std::time::Duration;

use async_trait::async_trait;

use crate::{messages::unified::UnifiedMessage, selector::AttemptContext};

/// What happened to one upstream attempt.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub success: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub latency: Duration,
}

#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn record_attempt(&self, attempt: AttemptContext, outcome: AttemptOutcome) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ThreadSink: Send + Sync {
    async fn record_turn(&self, thread_id: String, messages: Vec<UnifiedMessage>) -> anyhow::Result<()>;
}

/// Default sinks that drop every record.
pub struct NoopSink;

#[async_trait]
impl TraceSink for NoopSink {
    async fn record_attempt(&self, _attempt: AttemptContext, _outcome: AttemptOutcome) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ThreadSink for NoopSink {
    async fn record_turn(&self, _thread_id: String, _messages: Vec<UnifiedMessage>) -> anyhow::Result<()> {
        Ok(())
    }
}
