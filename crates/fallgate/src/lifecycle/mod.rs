//! Fall Event Lifecycle
//!
//! Persisted state machine for fall events. Every event starts `Active` and
//! moves exactly once to `Resolved` (acknowledged) or `Expired` (TTL elapsed).
//! Stores are the sole writers of [`FallStatus`]; all race safety comes from
//! the store's own atomic operations, never from caller-side locks.

mod durable;
mod memory;

pub use durable::*;
pub use memory::*;

use std::time::Duration;

use async_trait::async_trait;
use fallgate_types::{BoardId, FallEvent, FallEventId};

// ─────────────────────────────────────────────────────────────────────────────
// Store Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors reported by a fall event store
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record encoding error: {0}")]
    Encoding(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of [`FallEventStore::create`]
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(FallEvent),
    /// The board already had an Active event; nothing was inserted
    AlreadyActive(FallEvent),
}

impl CreateOutcome {
    pub fn event(&self) -> &FallEvent {
        match self {
            CreateOutcome::Created(event) | CreateOutcome::AlreadyActive(event) => event,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Capability
// ─────────────────────────────────────────────────────────────────────────────

/// Persistence for fall events
#[async_trait]
pub trait FallEventStore: Send + Sync + 'static {
    /// Move every Active event detected at or before `now - ttl` to Expired,
    /// stamping `resolved_at = now`. Returns how many events expired.
    async fn auto_expire_stale(&self, ttl: Duration) -> StoreResult<usize>;

    /// The board's current Active event, if any
    async fn get_active(&self, board_id: &BoardId) -> StoreResult<Option<FallEvent>>;

    /// Insert a new Active event unless the board already has one
    async fn create(&self, board_id: &BoardId) -> StoreResult<CreateOutcome>;

    /// Conditionally move an event from Active to Resolved
    ///
    /// Returns `true` only for the caller whose update performed the
    /// transition.
    async fn resolve(&self, id: FallEventId, resolved_by: &str) -> StoreResult<bool>;

    async fn get_by_id(&self, id: FallEventId) -> StoreResult<Option<FallEvent>>;

    /// Up to `limit` events for the board, newest first
    async fn recent(&self, board_id: &BoardId, limit: usize) -> StoreResult<Vec<FallEvent>>;
}

/// Whether an event detected at `detected_at` has outlived `ttl` at `now`
pub(crate) fn is_expired(
    detected_at: chrono::DateTime<chrono::Utc>,
    now: chrono::DateTime<chrono::Utc>,
    ttl: Duration,
) -> bool {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    match now.checked_sub_signed(ttl) {
        Some(cutoff) => detected_at <= cutoff,
        None => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared Store Tests
// ─────────────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_expiry_cutoff_is_inclusive() {
        let now = Utc::now();
        let ttl = Duration::from_secs(30);
        assert!(is_expired(now - chrono::Duration::seconds(30), now, ttl));
        assert!(is_expired(now - chrono::Duration::seconds(31), now, ttl));
        assert!(!is_expired(now - chrono::Duration::seconds(29), now, ttl));
    }
}
