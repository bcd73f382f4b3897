//! Bus Messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message delivered to a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Concrete topic the message was published to (never a pattern)
    pub topic: String,

    /// Payload as published
    pub payload: String,

    /// When the transport accepted the message
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    /// Create a message stamped with the current time
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            published_at: Utc::now(),
        }
    }
}
