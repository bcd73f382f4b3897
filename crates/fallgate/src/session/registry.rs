//! Session Table
//!
//! One [`BoardSession`] per board id. All mutations happen under a single
//! reader/writer lock and never perform I/O while the lock is held; handles
//! evicted by a registration are closed after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fallgate_runtime::Clock;
use fallgate_types::{BoardId, SocketRole};
use parking_lot::RwLock;

use super::{ConnectionHandle, SessionError};

// ─────────────────────────────────────────────────────────────────────────────
// Session Records
// ─────────────────────────────────────────────────────────────────────────────

/// Per-board record of live connections and liveness
#[derive(Debug, Clone)]
pub struct BoardSession {
    pub board_id: BoardId,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub control: Option<ConnectionHandle>,
    pub data: Option<ConnectionHandle>,
    /// Last observed fall-status bit, for edge detection
    pub last_fall_flag: bool,
}

impl BoardSession {
    fn new(board_id: BoardId, now: DateTime<Utc>) -> Self {
        Self {
            board_id,
            connected_at: now,
            last_seen: now,
            control: None,
            data: None,
            last_fall_flag: false,
        }
    }

    fn slot_mut(&mut self, role: SocketRole) -> &mut Option<ConnectionHandle> {
        match role {
            SocketRole::Control => &mut self.control,
            SocketRole::Data => &mut self.data,
        }
    }

    fn has_live_handle(&self) -> bool {
        let live = |h: &Option<ConnectionHandle>| h.as_ref().is_some_and(|h| !h.is_closed());
        live(&self.control) || live(&self.data)
    }
}

/// Read-only view of a session for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub board_id: BoardId,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub control_connected: bool,
    pub data_connected: bool,
}

/// Result of a socket registration
#[derive(Debug)]
pub enum Registration {
    /// The role slot was free
    Accepted,
    /// The previous handle was stale and has been closed
    Evicted { previous: ConnectionHandle },
    /// A live, recently active handle already holds the slot; the caller
    /// must close the new connection
    Rejected,
}

impl Registration {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Registration::Rejected)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Table of board sessions owned by the gateway instance
pub struct BoardSessionRegistry {
    sessions: RwLock<HashMap<BoardId, BoardSession>>,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
}

impl BoardSessionRegistry {
    pub fn new(stale_after: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            stale_after,
            clock,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Register a connection for `role` on `board_id`
    ///
    /// An empty slot (or one whose handle is already closed) accepts
    /// immediately. An occupied slot is taken over only when the session has
    /// been silent for longer than the stale threshold.
    pub fn register(
        &self,
        board_id: &BoardId,
        role: SocketRole,
        handle: ConnectionHandle,
    ) -> Registration {
        let now = self.clock.now();
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or(chrono::Duration::MAX);

        let outcome = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .entry(board_id.clone())
                .or_insert_with(|| BoardSession::new(board_id.clone(), now));

            let is_stale = now - session.last_seen > stale_after;
            if !session.has_live_handle() {
                session.connected_at = now;
            }

            let slot = session.slot_mut(role);
            let outcome = match slot.take() {
                Some(existing) if !existing.is_closed() && !is_stale => {
                    *slot = Some(existing);
                    Registration::Rejected
                }
                Some(existing) if !existing.is_closed() => {
                    *slot = Some(handle);
                    Registration::Evicted { previous: existing }
                }
                _ => {
                    *slot = Some(handle);
                    Registration::Accepted
                }
            };

            if outcome.is_accepted() {
                session.last_seen = now;
            }
            outcome
        };

        match &outcome {
            Registration::Accepted => {
                tracing::info!(board_id = %board_id, role = %role, "Registered socket");
            }
            Registration::Evicted { previous } => {
                previous.close();
                tracing::info!(
                    board_id = %board_id,
                    role = %role,
                    previous_peer = %previous.peer(),
                    "Evicted stale socket"
                );
            }
            Registration::Rejected => {
                tracing::warn!(board_id = %board_id, role = %role, "Rejected duplicate socket");
            }
        }

        outcome
    }

    /// Record socket activity for `board_id`
    pub fn touch(&self, board_id: &BoardId) {
        let now = self.clock.now();
        if let Some(session) = self.sessions.write().get_mut(board_id) {
            session.last_seen = now;
        }
    }

    /// Store the new fall flag and report whether it is a 0→1 transition
    pub fn observe_fall_flag(&self, board_id: &BoardId, flag: bool) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(board_id) {
            Some(session) => {
                let rising = flag && !session.last_fall_flag;
                session.last_fall_flag = flag;
                rising
            }
            None => false,
        }
    }

    /// Clear `role` for `board_id` if it still holds `handle`
    ///
    /// Returns whether the slot was cleared. A connection torn down after it
    /// has been replaced leaves the newer registration in place.
    pub fn unregister(&self, board_id: &BoardId, role: SocketRole, handle: &ConnectionHandle) -> bool {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(board_id) else {
            return false;
        };

        let slot = session.slot_mut(role);
        if slot.as_ref() == Some(handle) {
            *slot = None;
            tracing::debug!(board_id = %board_id, role = %role, "Unregistered socket");
            true
        } else {
            false
        }
    }

    /// Sessions seen within `window` of now, ordered by board id
    pub fn snapshot(&self, window: Duration) -> Vec<SessionSnapshot> {
        let now = self.clock.now();
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let live = |h: &Option<ConnectionHandle>| h.as_ref().is_some_and(|h| !h.is_closed());

        let sessions = self.sessions.read();
        let mut snapshots: Vec<SessionSnapshot> = sessions
            .values()
            .filter(|s| now - s.last_seen <= window)
            .map(|s| SessionSnapshot {
                board_id: s.board_id.clone(),
                connected_at: s.connected_at,
                last_seen: s.last_seen,
                control_connected: live(&s.control),
                data_connected: live(&s.data),
            })
            .collect();

        snapshots.sort_by(|a, b| a.board_id.cmp(&b.board_id));
        snapshots
    }

    /// Queue a line on the board's control socket
    pub fn send_command(&self, board_id: &BoardId, line: &str) -> Result<(), SessionError> {
        let control = {
            let sessions = self.sessions.read();
            let session = sessions
                .get(board_id)
                .ok_or_else(|| SessionError::NotRegistered(board_id.clone()))?;
            session
                .control
                .clone()
                .ok_or_else(|| SessionError::NoControlSocket(board_id.clone()))?
        };

        control.send_line(line)
    }

    /// Close every registered handle
    pub fn close_all(&self) {
        let handles: Vec<ConnectionHandle> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .flat_map(|s| s.control.iter().chain(s.data.iter()))
                .cloned()
                .collect()
        };

        tracing::info!(count = handles.len(), "Closing device connections");
        for handle in handles {
            handle.close();
        }
    }

    /// Number of known boards
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fallgate_runtime::ManualClock;
    use tokio::sync::mpsc;

    fn board(id: &str) -> BoardId {
        BoardId::new(id).unwrap()
    }

    fn registry() -> (BoardSessionRegistry, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        let registry = BoardSessionRegistry::new(Duration::from_secs(5), clock.clone());
        (registry, clock)
    }

    #[test]
    fn test_duplicate_rejected_then_stale_evicted() {
        let (registry, clock) = registry();
        let b7 = board("7");

        let first = ConnectionHandle::new("10.0.0.1:4000");
        assert!(matches!(
            registry.register(&b7, SocketRole::Data, first.clone()),
            Registration::Accepted
        ));

        clock.advance(Duration::from_secs(2));
        let second = ConnectionHandle::new("10.0.0.1:4001");
        assert!(matches!(
            registry.register(&b7, SocketRole::Data, second.clone()),
            Registration::Rejected
        ));
        assert!(!first.is_closed());

        clock.advance(Duration::from_secs(4));
        let third = ConnectionHandle::new("10.0.0.1:4002");
        match registry.register(&b7, SocketRole::Data, third.clone()) {
            Registration::Evicted { previous } => assert_eq!(previous, first),
            other => panic!("expected eviction, got {:?}", other),
        }
        assert!(first.is_closed());
        assert!(!third.is_closed());
    }

    #[test]
    fn test_touch_keeps_session_fresh() {
        let (registry, clock) = registry();
        let b7 = board("7");
        registry.register(&b7, SocketRole::Data, ConnectionHandle::new("a"));

        for _ in 0..4 {
            clock.advance(Duration::from_secs(3));
            registry.touch(&b7);
        }

        assert!(matches!(
            registry.register(&b7, SocketRole::Data, ConnectionHandle::new("b")),
            Registration::Rejected
        ));
    }

    #[test]
    fn test_roles_are_independent() {
        let (registry, _clock) = registry();
        let b7 = board("7");
        assert!(registry
            .register(&b7, SocketRole::Control, ConnectionHandle::new("c"))
            .is_accepted());
        assert!(registry
            .register(&b7, SocketRole::Data, ConnectionHandle::new("d"))
            .is_accepted());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_closed_handle_frees_slot() {
        let (registry, _clock) = registry();
        let b7 = board("7");
        let first = ConnectionHandle::new("a");
        registry.register(&b7, SocketRole::Data, first.clone());
        first.close();

        assert!(matches!(
            registry.register(&b7, SocketRole::Data, ConnectionHandle::new("b")),
            Registration::Accepted
        ));
    }

    #[test]
    fn test_stale_unregister_keeps_newer_handle() {
        let (registry, clock) = registry();
        let b7 = board("7");
        let old = ConnectionHandle::new("old");
        registry.register(&b7, SocketRole::Data, old.clone());

        clock.advance(Duration::from_secs(6));
        let new = ConnectionHandle::new("new");
        assert!(registry.register(&b7, SocketRole::Data, new.clone()).is_accepted());

        // Old connection's teardown runs after the replacement
        assert!(!registry.unregister(&b7, SocketRole::Data, &old));
        let snapshot = registry.snapshot(Duration::from_secs(60));
        assert!(snapshot[0].data_connected);

        assert!(registry.unregister(&b7, SocketRole::Data, &new));
        let snapshot = registry.snapshot(Duration::from_secs(60));
        assert!(!snapshot[0].data_connected);
    }

    #[test]
    fn test_rising_edges() {
        let (registry, _clock) = registry();
        let b7 = board("7");
        registry.register(&b7, SocketRole::Data, ConnectionHandle::new("d"));

        let edges: Vec<usize> = [false, false, true, true, false, true]
            .into_iter()
            .enumerate()
            .filter(|(_, flag)| registry.observe_fall_flag(&b7, *flag))
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(edges, vec![3, 6]);

        let (registry, _clock) = self::registry();
        registry.register(&b7, SocketRole::Data, ConnectionHandle::new("d"));
        let edges: Vec<usize> = [false, true, true, false, true]
            .into_iter()
            .enumerate()
            .filter(|(_, flag)| registry.observe_fall_flag(&b7, *flag))
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(edges, vec![2, 5]);
    }

    #[test]
    fn test_unknown_board_never_alerts() {
        let (registry, _clock) = registry();
        assert!(!registry.observe_fall_flag(&board("9"), true));
    }

    #[test]
    fn test_snapshot_window() {
        let (registry, clock) = registry();
        registry.register(&board("1"), SocketRole::Data, ConnectionHandle::new("a"));
        clock.advance(Duration::from_secs(90));
        registry.register(&board("2"), SocketRole::Control, ConnectionHandle::new("b"));
        clock.advance(Duration::from_secs(60));

        let snapshot = registry.snapshot(Duration::from_secs(120));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].board_id, board("2"));
        assert!(snapshot[0].control_connected);
        assert!(!snapshot[0].data_connected);

        assert_eq!(registry.snapshot(Duration::from_secs(600)).len(), 2);
    }

    #[tokio::test]
    async fn test_send_command() {
        let (registry, _clock) = registry();
        let b7 = board("7");

        assert!(matches!(
            registry.send_command(&b7, "RESOLVED\n"),
            Err(SessionError::NotRegistered(_))
        ));

        registry.register(&b7, SocketRole::Data, ConnectionHandle::new("d"));
        assert!(matches!(
            registry.send_command(&b7, "RESOLVED\n"),
            Err(SessionError::NoControlSocket(_))
        ));

        let (tx, mut rx) = mpsc::channel(4);
        registry.register(&b7, SocketRole::Control, ConnectionHandle::with_outbound("c", tx));
        registry.send_command(&b7, "RESOLVED\n").unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("RESOLVED\n"));
    }

    #[test]
    fn test_close_all() {
        let (registry, _clock) = registry();
        let a = ConnectionHandle::new("a");
        let b = ConnectionHandle::new("b");
        registry.register(&board("1"), SocketRole::Data, a.clone());
        registry.register(&board("2"), SocketRole::Control, b.clone());

        registry.close_all();
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[test]
    fn test_concurrent_registration_accepts_one() {
        let (registry, _clock) = registry();
        let registry = Arc::new(registry);
        let b7 = board("7");

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let b7 = b7.clone();
                std::thread::spawn(move || {
                    registry
                        .register(&b7, SocketRole::Data, ConnectionHandle::new(format!("peer-{i}")))
                        .is_accepted()
                })
            })
            .collect();

        let accepted = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|accepted| *accepted)
            .count();
        assert_eq!(accepted, 1);
    }
}
