//! Local Bus
//!
//! In-process transport for the [`Bus`] capability. Each subscription owns a
//! bounded queue drained by its own task, so a slow handler applies
//! backpressure to publishers instead of dropping messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use super::{
    validate_topic, Bus, BusError, BusMessage, BusResult, MessageHandler, Subscription,
    TopicFilter,
};

/// Default per-subscription queue depth
const DEFAULT_QUEUE_DEPTH: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Local Bus
// ─────────────────────────────────────────────────────────────────────────────

struct SubscriberEntry {
    filter: TopicFilter,
    tx: mpsc::Sender<BusMessage>,
}

struct LocalBusInner {
    /// Subscription id -> queue
    subscribers: DashMap<u64, SubscriberEntry>,

    next_id: AtomicU64,

    connected: AtomicBool,

    queue_depth: usize,

    /// Statistics
    total_published: AtomicU64,
    total_delivered: AtomicU64,
}

/// In-process publish/subscribe transport
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<LocalBusInner>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    /// Create a connected bus with the default queue depth
    pub fn new() -> Self {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    /// Create a connected bus with a custom per-subscription queue depth
    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(LocalBusInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                connected: AtomicBool::new(true),
                queue_depth: queue_depth.max(1),
                total_published: AtomicU64::new(0),
                total_delivered: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate transport loss or recovery
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
        tracing::info!(connected, "Local bus connection state changed");
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            total_published: self.inner.total_published.load(Ordering::Relaxed),
            total_delivered: self.inner.total_delivered.load(Ordering::Relaxed),
            subscriptions: self.inner.subscribers.len(),
        }
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, topic: &str, payload: &str) -> BusResult<()> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        validate_topic(topic)?;

        let message = BusMessage::new(topic, payload);

        // Collect matching queues first so no map guard is held across await
        let targets: Vec<(u64, mpsc::Sender<BusMessage>)> = self
            .inner
            .subscribers
            .iter()
            .filter(|entry| entry.value().filter.matches(topic))
            .map(|entry| (*entry.key(), entry.value().tx.clone()))
            .collect();

        let mut delivered = 0u64;
        for (id, tx) in targets {
            if tx.send(message.clone()).await.is_ok() {
                delivered += 1;
            } else {
                // Subscription task is gone
                self.inner.subscribers.remove(&id);
            }
        }

        self.inner.total_published.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_delivered
            .fetch_add(delivered, Ordering::Relaxed);

        tracing::trace!(topic, delivered, "Published message");
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> BusResult<Subscription> {
        let filter = TopicFilter::parse(pattern)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel(self.inner.queue_depth);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        self.inner
            .subscribers
            .insert(id, SubscriberEntry { filter, tx });

        let inner = Arc::clone(&self.inner);
        let pattern_owned = pattern.to_string();
        tokio::spawn(async move {
            run_subscription_loop(id, &pattern_owned, handler, rx, cancel_rx).await;
            inner.subscribers.remove(&id);
        });

        tracing::debug!(subscription_id = id, pattern, "New subscription");
        Ok(Subscription::new(id, pattern, cancel_tx))
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

/// Deliver queued messages to the handler one at a time until cancelled
async fn run_subscription_loop(
    id: u64,
    pattern: &str,
    handler: Arc<dyn MessageHandler>,
    mut rx: mpsc::Receiver<BusMessage>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            // Fires on cancel() and on handle drop
            _ = &mut cancel_rx => {
                tracing::debug!(subscription_id = id, pattern, "Subscription cancelled");
                break;
            }

            message = rx.recv() => {
                match message {
                    Some(message) => handler.handle(message).await,
                    None => break,
                }
            }
        }
    }
}

/// Local bus statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub subscriptions: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler_fn;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn collector() -> (Arc<dyn MessageHandler>, Arc<Mutex<Vec<BusMessage>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler = handler_fn(move |msg| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(msg);
            }
        });
        (handler, received)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_wildcard_routing() {
        let bus = LocalBus::new();
        let (handler, received) = collector();
        let _sub = bus.subscribe("boards/+/alerts", handler).await.unwrap();

        bus.publish("boards/7/alerts", "a").await.unwrap();
        bus.publish("boards/7/sensors", "s").await.unwrap();
        bus.publish("boards/8/alerts", "b").await.unwrap();
        settle().await;

        let received = received.lock();
        let topics: Vec<&str> = received.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, vec!["boards/7/alerts", "boards/8/alerts"]);
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let bus = LocalBus::new();
        let (handler, received) = collector();
        let _sub = bus.subscribe("boards/7/sensors", handler).await.unwrap();

        for i in 0..20 {
            bus.publish("boards/7/sensors", &i.to_string()).await.unwrap();
        }
        settle().await;

        let payloads: Vec<String> = received.lock().iter().map(|m| m.payload.clone()).collect();
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(payloads, expected);
    }

    #[tokio::test]
    async fn test_dropping_subscription_stops_delivery() {
        let bus = LocalBus::new();
        let (handler, received) = collector();
        let sub = bus.subscribe("boards/#", handler).await.unwrap();

        bus.publish("boards/1/alerts", "first").await.unwrap();
        settle().await;
        drop(sub);
        settle().await;
        bus.publish("boards/1/alerts", "second").await.unwrap();
        settle().await;

        assert_eq!(received.lock().len(), 1);
        assert_eq!(bus.stats().subscriptions, 0);
    }

    #[tokio::test]
    async fn test_disconnected_bus_rejects_publish() {
        let bus = LocalBus::new();
        bus.set_connected(false);
        assert!(!bus.is_connected());
        assert!(matches!(
            bus.publish("boards/1/alerts", "x").await,
            Err(BusError::NotConnected)
        ));

        bus.set_connected(true);
        assert!(bus.publish("boards/1/alerts", "x").await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_pattern_and_topic() {
        let bus = LocalBus::new();
        let (handler, _) = collector();
        assert!(matches!(
            bus.subscribe("boards/#/x", handler).await,
            Err(BusError::InvalidPattern(_))
        ));
        assert!(matches!(
            bus.publish("boards/+/alerts", "x").await,
            Err(BusError::InvalidTopic(_))
        ));
    }
}
