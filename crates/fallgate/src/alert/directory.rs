//! Subscriber Directory
//!
//! Who gets told about a board's falls. The roster itself lives outside the
//! gateway; [`StaticDirectory`] serves a fixed roster from configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use fallgate_types::BoardId;
use serde::{Deserialize, Serialize};

/// Someone subscribed to a board's alerts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub chat_id: i64,
    pub username: String,
}

/// Errors reported by a subscriber directory
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Subscriber roster lookup
#[async_trait]
pub trait SubscriberDirectory: Send + Sync + 'static {
    async fn subscribers(&self, board_id: &BoardId) -> Result<Vec<Subscriber>, DirectoryError>;
}

/// Fixed roster
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    boards: HashMap<BoardId, Vec<Subscriber>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber to a board; repeated chat ids are ignored
    pub fn subscribe(&mut self, board_id: BoardId, subscriber: Subscriber) {
        let entries = self.boards.entry(board_id).or_default();
        if !entries.iter().any(|s| s.chat_id == subscriber.chat_id) {
            entries.push(subscriber);
        }
    }

    pub fn with(mut self, board_id: BoardId, subscriber: Subscriber) -> Self {
        self.subscribe(board_id, subscriber);
        self
    }
}

#[async_trait]
impl SubscriberDirectory for StaticDirectory {
    async fn subscribers(&self, board_id: &BoardId) -> Result<Vec<Subscriber>, DirectoryError> {
        Ok(self.boards.get(board_id).cloned().unwrap_or_default())
    }
}
