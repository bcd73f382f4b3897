//! Publish/Subscribe Bridge
//!
//! The bus is the only channel between the ingestion loops (producers of
//! sensor and alert messages) and the alert coordinator (consumer). The core
//! depends on the narrow [`Bus`] capability, never on a concrete transport.
//!
//! # Semantics
//!
//! - `publish` returns once the transport has accepted the message. Failures
//!   are reported to the caller and never retried here; retry policy belongs
//!   to the transport.
//! - `subscribe` registers a [`MessageHandler`] against a [`TopicFilter`]
//!   pattern. Each subscription delivers its messages to the handler one at a
//!   time, in publish order.

mod local;
mod message;
mod subscription;
mod topic_filter;

pub use local::*;
pub use message::*;
pub use subscription::*;
pub use topic_filter::*;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

// ─────────────────────────────────────────────────────────────────────────────
// Bus Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors reported by a bus transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Bus not connected")]
    NotConnected,

    #[error("Invalid topic pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

// ─────────────────────────────────────────────────────────────────────────────
// Capability Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Publish/subscribe capability implemented by a transport
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Publish a payload to a concrete topic
    async fn publish(&self, topic: &str, payload: &str) -> BusResult<()>;

    /// Register a handler for every topic matching `pattern`
    ///
    /// Delivery stops when the returned [`Subscription`] is dropped or
    /// cancelled.
    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> BusResult<Subscription>;

    /// Whether the transport can currently accept publishes
    fn is_connected(&self) -> bool;
}

/// Receives messages for one subscription
///
/// Handlers keep their own state; the bus only routes.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: BusMessage);
}

// ─────────────────────────────────────────────────────────────────────────────
// Closure Handlers
// ─────────────────────────────────────────────────────────────────────────────

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: BusMessage) {
        (self.0)(message).await
    }
}

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
