// Durable Fall Event Store - redb-backed persistence
//
// Events are stored as JSON records keyed by id. A second table maps each
// board to its Active event and acts as the uniqueness index: every state
// change runs inside one redb write transaction, and redb serializes write
// transactions, so create/resolve/expire are each a single atomic step.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fallgate_runtime::Clock;
use fallgate_types::{BoardId, FallEvent, FallEventId, FallStatus};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};

use super::{is_expired, CreateOutcome, FallEventStore, StoreError, StoreResult};

// Event id -> JSON-encoded FallEvent
const EVENTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("fall_events");

// Board id -> id of its Active event
const ACTIVE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("active_by_board");

// Counters
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_ID_KEY: &str = "next_event_id";

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(e.to_string())
}

fn encode(event: &FallEvent) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(event).map_err(|e| StoreError::Encoding(e.to_string()))
}

fn decode(bytes: &[u8]) -> StoreResult<FallEvent> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Encoding(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Durable Store
// ─────────────────────────────────────────────────────────────────────────────

/// Fall event store persisted in a redb database file
pub struct RedbFallEventStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl RedbFallEventStore {
    /// Open (or create) the database at `path` and ensure its tables exist
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(db_err)?;
            }
        }

        let db = Database::create(path)
            .map_err(|e| StoreError::Database(format!("Failed to open database: {}", e)))?;

        let write_txn = db.begin_write().map_err(db_err)?;
        write_txn.open_table(EVENTS_TABLE).map_err(db_err)?;
        write_txn.open_table(ACTIVE_TABLE).map_err(db_err)?;
        write_txn.open_table(META_TABLE).map_err(db_err)?;
        write_txn.commit().map_err(db_err)?;

        tracing::info!(path = %path.display(), "Opened fall event database");

        Ok(Self {
            db: Arc::new(db),
            clock,
        })
    }

    /// Run a blocking database closure off the async runtime
    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Read one event inside a write transaction
fn load_event(txn: &WriteTransaction, id: u64) -> StoreResult<Option<FallEvent>> {
    let events = txn.open_table(EVENTS_TABLE).map_err(db_err)?;
    let guard = events.get(id).map_err(db_err)?;
    guard.map(|g| decode(g.value())).transpose()
}

fn store_event(txn: &WriteTransaction, event: &FallEvent) -> StoreResult<()> {
    let bytes = encode(event)?;
    let mut events = txn.open_table(EVENTS_TABLE).map_err(db_err)?;
    events.insert(event.id.0, bytes.as_slice()).map_err(db_err)?;
    Ok(())
}

fn expire_stale(db: &Database, now: DateTime<Utc>, ttl: Duration) -> StoreResult<usize> {
    let txn = db.begin_write().map_err(db_err)?;

    let active: Vec<(String, u64)> = {
        let table = txn.open_table(ACTIVE_TABLE).map_err(db_err)?;
        let mut entries = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (board, id) = entry.map_err(db_err)?;
            entries.push((board.value().to_string(), id.value()));
        }
        entries
    };

    let mut expired = 0;
    for (board, id) in active {
        let Some(mut event) = load_event(&txn, id)? else {
            // Index points at a missing record; drop the dangling entry
            let mut table = txn.open_table(ACTIVE_TABLE).map_err(db_err)?;
            table.remove(board.as_str()).map_err(db_err)?;
            continue;
        };
        if !event.is_active() || !is_expired(event.detected_at, now, ttl) {
            continue;
        }

        event.status = FallStatus::Expired;
        event.resolved_at = Some(now);
        store_event(&txn, &event)?;

        let mut table = txn.open_table(ACTIVE_TABLE).map_err(db_err)?;
        table.remove(board.as_str()).map_err(db_err)?;
        expired += 1;
    }

    txn.commit().map_err(db_err)?;
    Ok(expired)
}

fn active_for(db: &Database, board_id: &BoardId) -> StoreResult<Option<FallEvent>> {
    let txn = db.begin_read().map_err(db_err)?;
    let active = txn.open_table(ACTIVE_TABLE).map_err(db_err)?;
    let Some(id) = active.get(board_id.as_str()).map_err(db_err)?.map(|g| g.value()) else {
        return Ok(None);
    };

    let events = txn.open_table(EVENTS_TABLE).map_err(db_err)?;
    let event = match events.get(id).map_err(db_err)? {
        Some(guard) => decode(guard.value())?,
        None => return Ok(None),
    };
    Ok(event.is_active().then_some(event))
}

fn create_event(db: &Database, board_id: &BoardId, now: DateTime<Utc>) -> StoreResult<CreateOutcome> {
    let txn = db.begin_write().map_err(db_err)?;

    let existing = {
        let active = txn.open_table(ACTIVE_TABLE).map_err(db_err)?;
        active.get(board_id.as_str()).map_err(db_err)?.map(|g| g.value())
    };
    if let Some(id) = existing {
        if let Some(event) = load_event(&txn, id)? {
            if event.is_active() {
                txn.abort().map_err(db_err)?;
                return Ok(CreateOutcome::AlreadyActive(event));
            }
        }
    }

    let id = {
        let mut meta = txn.open_table(META_TABLE).map_err(db_err)?;
        let next = meta.get(NEXT_ID_KEY).map_err(db_err)?.map(|g| g.value()).unwrap_or(1);
        meta.insert(NEXT_ID_KEY, next + 1).map_err(db_err)?;
        next
    };

    let event = FallEvent::new(FallEventId(id), board_id.clone(), now);
    store_event(&txn, &event)?;
    {
        let mut active = txn.open_table(ACTIVE_TABLE).map_err(db_err)?;
        active.insert(board_id.as_str(), id).map_err(db_err)?;
    }

    txn.commit().map_err(db_err)?;
    Ok(CreateOutcome::Created(event))
}

fn resolve_event(
    db: &Database,
    id: FallEventId,
    resolved_by: &str,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let txn = db.begin_write().map_err(db_err)?;

    let mut event = match load_event(&txn, id.0)? {
        Some(event) if event.is_active() => event,
        _ => {
            txn.abort().map_err(db_err)?;
            return Ok(false);
        }
    };

    event.status = FallStatus::Resolved;
    event.resolved_at = Some(now);
    event.resolved_by = Some(resolved_by.to_string());
    store_event(&txn, &event)?;
    {
        let mut active = txn.open_table(ACTIVE_TABLE).map_err(db_err)?;
        active.remove(event.board_id.as_str()).map_err(db_err)?;
    }

    txn.commit().map_err(db_err)?;
    Ok(true)
}

fn event_by_id(db: &Database, id: FallEventId) -> StoreResult<Option<FallEvent>> {
    let txn = db.begin_read().map_err(db_err)?;
    let events = txn.open_table(EVENTS_TABLE).map_err(db_err)?;
    let guard = events.get(id.0).map_err(db_err)?;
    guard.map(|g| decode(g.value())).transpose()
}

fn recent_events(db: &Database, board_id: &BoardId, limit: usize) -> StoreResult<Vec<FallEvent>> {
    let txn = db.begin_read().map_err(db_err)?;
    let events = txn.open_table(EVENTS_TABLE).map_err(db_err)?;

    let mut found = Vec::new();
    for entry in events.iter().map_err(db_err)?.rev() {
        if found.len() >= limit {
            break;
        }
        let (_, value) = entry.map_err(db_err)?;
        let event = decode(value.value())?;
        if &event.board_id == board_id {
            found.push(event);
        }
    }
    Ok(found)
}

#[async_trait]
impl FallEventStore for RedbFallEventStore {
    async fn auto_expire_stale(&self, ttl: Duration) -> StoreResult<usize> {
        let now = self.clock.now();
        self.blocking(move |db| expire_stale(db, now, ttl)).await
    }

    async fn get_active(&self, board_id: &BoardId) -> StoreResult<Option<FallEvent>> {
        let board_id = board_id.clone();
        self.blocking(move |db| active_for(db, &board_id)).await
    }

    async fn create(&self, board_id: &BoardId) -> StoreResult<CreateOutcome> {
        let now = self.clock.now();
        let board_id = board_id.clone();
        self.blocking(move |db| create_event(db, &board_id, now)).await
    }

    async fn resolve(&self, id: FallEventId, resolved_by: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        let resolved_by = resolved_by.to_string();
        self.blocking(move |db| resolve_event(db, id, &resolved_by, now)).await
    }

    async fn get_by_id(&self, id: FallEventId) -> StoreResult<Option<FallEvent>> {
        self.blocking(move |db| event_by_id(db, id)).await
    }

    async fn recent(&self, board_id: &BoardId, limit: usize) -> StoreResult<Vec<FallEvent>> {
        let board_id = board_id.clone();
        self.blocking(move |db| recent_events(db, &board_id, limit)).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
