// Fall Events - Lifecycle records and acknowledgment tokens

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BoardId;

const CALLBACK_ACTION: &str = "acknowledge";

// ─────────────────────────────────────────────────────────────────────────────
// Fall Event
// ─────────────────────────────────────────────────────────────────────────────

/// Durable identifier of a fall event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FallEventId(pub u64);

impl fmt::Display for FallEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a fall event. `Resolved` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallStatus {
    Active,
    Resolved,
    Expired,
}

impl fmt::Display for FallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallStatus::Active => write!(f, "active"),
            FallStatus::Resolved => write!(f, "resolved"),
            FallStatus::Expired => write!(f, "expired"),
        }
    }
}

/// One detected fall and what became of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallEvent {
    pub id: FallEventId,
    pub board_id: BoardId,
    pub detected_at: DateTime<Utc>,
    /// Set on resolution and on expiry
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Responder that acknowledged the fall (never set on expiry)
    #[serde(default)]
    pub resolved_by: Option<String>,
    pub status: FallStatus,
}

impl FallEvent {
    /// Create a new Active event
    pub fn new(id: FallEventId, board_id: BoardId, detected_at: DateTime<Utc>) -> Self {
        Self {
            id,
            board_id,
            detected_at,
            resolved_at: None,
            resolved_by: None,
            status: FallStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == FallStatus::Active
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Acknowledgment
// ─────────────────────────────────────────────────────────────────────────────

/// Value embedded in an actionable notification. Opaque to the notification
/// channel; only the coordinator interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertToken {
    pub event_id: FallEventId,
    pub board_id: BoardId,
}

impl AlertToken {
    pub fn new(event_id: FallEventId, board_id: BoardId) -> Self {
        Self { event_id, board_id }
    }

    /// Compact button payload for chat adapters: `acknowledge:<event>:<board>`
    pub fn to_callback_data(&self) -> String {
        format!("{}:{}:{}", CALLBACK_ACTION, self.event_id, self.board_id)
    }

    /// Decode a payload produced by [`AlertToken::to_callback_data`]
    pub fn from_callback_data(data: &str) -> Option<Self> {
        let mut parts = data.splitn(3, ':');
        if parts.next()? != CALLBACK_ACTION {
            return None;
        }
        let event_id = parts.next()?.parse::<u64>().ok()?;
        let board_id = BoardId::new(parts.next()?)?;
        Some(Self::new(FallEventId(event_id), board_id))
    }
}

/// The human acting on an alert
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Responder {
    /// Chat the responder is reachable in
    pub chat_id: i64,
    /// Handle shown to other subscribers
    pub username: String,
}

impl Responder {
    pub fn new(chat_id: i64, username: impl Into<String>) -> Self {
        Self {
            chat_id,
            username: username.into(),
        }
    }
}
