// Outbound notification texts

use fallgate_types::BoardId;

/// Label of the acknowledgment action attached to an alert
pub const ACKNOWLEDGE_LABEL: &str = "✅ Acknowledge?";

pub const ALREADY_ACKNOWLEDGED_TEXT: &str =
    "✅ This fall was already acknowledged by another responder.";

pub const EXPIRED_TEXT: &str =
    "⏱ This fall alert had already timed out before it was acknowledged.";

pub const STORAGE_FAILURE_TEXT: &str =
    "⚠️ Could not record your acknowledgment, please try again.";

pub fn fall_alert_text(board_id: &BoardId) -> String {
    format!("🚨 FALL DETECTED - Board {}", board_id)
}

pub fn resolved_text(board_id: &BoardId, actor: &str) -> String {
    format!("✅ Fall on board {} acknowledged by @{}", board_id, actor)
}
