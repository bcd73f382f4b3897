//! In-memory fall event store, used when no database path is configured.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fallgate_runtime::Clock;
use fallgate_types::{BoardId, FallEvent, FallEventId, FallStatus};
use parking_lot::Mutex;

use super::{is_expired, CreateOutcome, FallEventStore, StoreResult};

struct MemoryState {
    events: BTreeMap<FallEventId, FallEvent>,
    next_id: u64,
}

/// Fall events held behind a single mutex; each operation is one critical
/// section, which gives the same atomicity as a conditional update.
pub struct MemoryFallEventStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl MemoryFallEventStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                events: BTreeMap::new(),
                next_id: 1,
            }),
            clock,
        }
    }
}

#[async_trait]
impl FallEventStore for MemoryFallEventStore {
    async fn auto_expire_stale(&self, ttl: Duration) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let mut expired = 0;
        for event in state.events.values_mut() {
            if event.is_active() && is_expired(event.detected_at, now, ttl) {
                event.status = FallStatus::Expired;
                event.resolved_at = Some(now);
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn get_active(&self, board_id: &BoardId) -> StoreResult<Option<FallEvent>> {
        let state = self.state.lock();
        Ok(state
            .events
            .values()
            .find(|e| e.is_active() && &e.board_id == board_id)
            .cloned())
    }

    async fn create(&self, board_id: &BoardId) -> StoreResult<CreateOutcome> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if let Some(existing) = state
            .events
            .values()
            .find(|e| e.is_active() && &e.board_id == board_id)
        {
            return Ok(CreateOutcome::AlreadyActive(existing.clone()));
        }

        let id = FallEventId(state.next_id);
        state.next_id += 1;
        let event = FallEvent::new(id, board_id.clone(), now);
        state.events.insert(id, event.clone());
        Ok(CreateOutcome::Created(event))
    }

    async fn resolve(&self, id: FallEventId, resolved_by: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        match state.events.get_mut(&id) {
            Some(event) if event.is_active() => {
                event.status = FallStatus::Resolved;
                event.resolved_at = Some(now);
                event.resolved_by = Some(resolved_by.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_by_id(&self, id: FallEventId) -> StoreResult<Option<FallEvent>> {
        Ok(self.state.lock().events.get(&id).cloned())
    }

    async fn recent(&self, board_id: &BoardId, limit: usize) -> StoreResult<Vec<FallEvent>> {
        let state = self.state.lock();
        Ok(state
            .events
            .values()
            .rev()
            .filter(|e| &e.board_id == board_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
