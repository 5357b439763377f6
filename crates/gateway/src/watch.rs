//! Configuration change fan-out.
//!
//! A watcher distributes channel inventory updates to in-process
//! subscribers. The memory backend fans out through per-subscriber bounded
//! mailboxes that drop events when full; the Redis backend multiplexes one
//! upstream subscription across all local subscribers, so N subscribers
//! cost one Redis connection.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, GatewayResult};

const MAILBOX_CAPACITY: usize = 16;

#[async_trait]
pub trait Watcher: Send + Sync {
    /// A mailbox receiving every future published payload.
    ///
    /// Slow subscribers lose events rather than block the publisher.
    fn subscribe(&self) -> mpsc::Receiver<String>;

    /// Publish a payload to all subscribers (local and, for distributed
    /// backends, remote).
    async fn publish(&self, payload: String) -> GatewayResult<()>;
}

/// In-process fan-out.
#[derive(Default)]
pub struct MemoryWatcher {
    subscribers: Mutex<Vec<mpsc::Sender<String>>>,
}

impl MemoryWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn fan_out(&self, payload: &str) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        subscribers.retain(|sender| match sender.try_send(payload.to_string()) {
            Ok(()) => true,
            // Drop-on-full: the subscriber stays, the event does not.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[async_trait]
impl Watcher for MemoryWatcher {
    fn subscribe(&self) -> mpsc::Receiver<String> {
        let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);

        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push(sender);

        receiver
    }

    async fn publish(&self, payload: String) -> GatewayResult<()> {
        self.fan_out(&payload);
        Ok(())
    }
}

/// Redis pub/sub backend.
pub struct RedisWatcher {
    local: Arc<MemoryWatcher>,
    publisher: redis::aio::ConnectionManager,
    channel: String,
    shutdown: CancellationToken,
}

impl RedisWatcher {
    /// Connect and start the single upstream subscription task.
    pub async fn connect(url: &str, channel: &str) -> GatewayResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|error| GatewayError::Internal(format!("invalid Redis URL: {error}")))?;

        let publisher = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|error| GatewayError::Internal(format!("Redis connection failed: {error}")))?;

        let local = Arc::new(MemoryWatcher::new());
        let shutdown = CancellationToken::new();

        let subscription_local = local.clone();
        let subscription_channel = channel.to_string();
        let subscription_shutdown = shutdown.clone();

        tokio::spawn(async move {
            if let Err(error) =
                run_subscription(client, subscription_channel, subscription_local, subscription_shutdown).await
            {
                log::error!("Redis watcher subscription terminated: {error}");
            }
        });

        Ok(Self {
            local,
            publisher,
            channel: channel.to_string(),
            shutdown,
        })
    }

    /// Stop the subscription task. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

async fn run_subscription(
    client: redis::Client,
    channel: String,
    local: Arc<MemoryWatcher>,
    shutdown: CancellationToken,
) -> GatewayResult<()> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|error| GatewayError::Internal(format!("Redis subscribe connection failed: {error}")))?;

    pubsub
        .subscribe(&channel)
        .await
        .map_err(|error| GatewayError::Internal(format!("Redis subscribe failed: {error}")))?;

    let mut messages = pubsub.on_message();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            message = messages.next() => {
                let Some(message) = message else { return Ok(()) };

                match message.get_payload::<String>() {
                    Ok(payload) => local.fan_out(&payload),
                    Err(error) => log::warn!("undecodable watch payload: {error}"),
                }
            }
        }
    }
}

#[async_trait]
impl Watcher for RedisWatcher {
    fn subscribe(&self) -> mpsc::Receiver<String> {
        self.local.subscribe()
    }

    async fn publish(&self, payload: String) -> GatewayResult<()> {
        use redis::AsyncCommands as _;

        let mut connection = self.publisher.clone();

        let () = connection
            .publish(&self.channel, payload)
            .await
            .map_err(|error| GatewayError::Internal(format!("Redis publish failed: {error}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_watcher_fans_out_to_all_subscribers() {
        let watcher = MemoryWatcher::new();

        let mut first = watcher.subscribe();
        let mut second = watcher.subscribe();

        watcher.publish("update".to_string()).await.unwrap();

        assert_eq!(first.recv().await.unwrap(), "update");
        assert_eq!(second.recv().await.unwrap(), "update");
    }

    #[tokio::test]
    async fn slow_subscribers_drop_events_without_blocking() {
        let watcher = MemoryWatcher::new();
        let mut receiver = watcher.subscribe();

        for index in 0..(MAILBOX_CAPACITY + 5) {
            watcher.publish(format!("event-{index}")).await.unwrap();
        }

        // The mailbox holds the first CAPACITY events; the overflow was
        // dropped, not queued.
        let mut received = 0;
        while receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, MAILBOX_CAPACITY);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let watcher = MemoryWatcher::new();

        let receiver = watcher.subscribe();
        drop(receiver);

        watcher.publish("update".to_string()).await.unwrap();

        assert!(watcher.subscribers.lock().unwrap().is_empty());
    }
}
