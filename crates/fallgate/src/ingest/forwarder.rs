//! Resolution forwarding
//!
//! Listens on the alerts topics and tells a board's control socket when its
//! fall has been acknowledged, so the device can clear its local alarm.

use std::sync::Arc;

use async_trait::async_trait;
use fallgate_runtime::{Bus, BusMessage, BusResult, MessageHandler, Subscription};
use fallgate_types::{all_alerts_pattern, board_from_topic, AlertPayload};

use crate::session::{BoardSessionRegistry, SessionError};

/// Line written to a control socket after a resolution
pub const RESOLVED_COMMAND: &str = "RESOLVED\n";

/// Forwards `RESOLVED:<actor>` notices to the board's control socket
pub struct ResolutionForwarder {
    registry: Arc<BoardSessionRegistry>,
}

impl ResolutionForwarder {
    pub fn new(registry: Arc<BoardSessionRegistry>) -> Self {
        Self { registry }
    }

    /// Subscribe to every board's alerts topic
    pub async fn attach(self, bus: &dyn Bus) -> BusResult<Subscription> {
        bus.subscribe(&all_alerts_pattern(), Arc::new(self)).await
    }
}

#[async_trait]
impl MessageHandler for ResolutionForwarder {
    async fn handle(&self, message: BusMessage) {
        let AlertPayload::Resolved { actor } = AlertPayload::parse(&message.payload) else {
            return;
        };
        let Some(board_id) = board_from_topic(&message.topic) else {
            return;
        };

        match self.registry.send_command(&board_id, RESOLVED_COMMAND) {
            Ok(()) => {
                tracing::info!(board_id = %board_id, actor = %actor, "Forwarded resolution to board");
            }
            Err(e @ (SessionError::NotRegistered(_) | SessionError::NoControlSocket(_))) => {
                tracing::debug!(board_id = %board_id, error = %e, "Resolution not forwarded");
            }
            Err(e) => {
                tracing::warn!(board_id = %board_id, error = %e, "Failed to forward resolution");
            }
        }
    }
}
