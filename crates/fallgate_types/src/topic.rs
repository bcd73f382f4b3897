// Bus Topics - Topic naming and alert payloads
//
//   boards/<id>/sensors   every valid reading (raw line)
//   boards/<id>/alerts    rising-edge fall alert (raw line) or RESOLVED:<actor>

use crate::BoardId;

pub const TOPIC_ROOT: &str = "boards";

const SENSORS: &str = "sensors";
const ALERTS: &str = "alerts";
const RESOLVED_PREFIX: &str = "RESOLVED:";

/// Topic carrying every valid reading of a board
pub fn sensors_topic(board_id: &BoardId) -> String {
    format!("{}/{}/{}", TOPIC_ROOT, board_id, SENSORS)
}

/// Topic carrying fall alerts and resolution notices of a board
pub fn alerts_topic(board_id: &BoardId) -> String {
    format!("{}/{}/{}", TOPIC_ROOT, board_id, ALERTS)
}

/// Subscription pattern matching the alert topic of every board
pub fn all_alerts_pattern() -> String {
    format!("{}/+/{}", TOPIC_ROOT, ALERTS)
}

/// Extract the board id from a `boards/<id>/...` topic
pub fn board_from_topic(topic: &str) -> Option<BoardId> {
    let mut segments = topic.split('/');
    if segments.next()? != TOPIC_ROOT {
        return None;
    }
    let board = segments.next()?;
    segments.next()?;
    BoardId::new(board)
}

/// Messages carried on an alerts topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertPayload {
    /// A rising-edge fall alert; carries the triggering line
    Fall { raw: String },
    /// A resolution notice published after a successful acknowledgment
    Resolved { actor: String },
}

impl AlertPayload {
    pub fn parse(payload: &str) -> Self {
        match payload.strip_prefix(RESOLVED_PREFIX) {
            Some(actor) => AlertPayload::Resolved {
                actor: actor.trim().to_string(),
            },
            None => AlertPayload::Fall {
                raw: payload.to_string(),
            },
        }
    }

    pub fn encode(&self) -> String {
        match self {
            AlertPayload::Fall { raw } => raw.clone(),
            AlertPayload::Resolved { actor } => format!("{}{}", RESOLVED_PREFIX, actor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        let board = BoardId::new("7").unwrap();
        assert_eq!(sensors_topic(&board), "boards/7/sensors");
        assert_eq!(alerts_topic(&board), "boards/7/alerts");
        assert_eq!(all_alerts_pattern(), "boards/+/alerts");
    }

    #[test]
    fn test_board_from_topic() {
        assert_eq!(board_from_topic("boards/7/alerts"), BoardId::new("7"));
        assert_eq!(board_from_topic("boards/7"), None);
        assert_eq!(board_from_topic("devices/7/alerts"), None);
    }

    #[test]
    fn test_alert_payloads() {
        assert_eq!(
            AlertPayload::parse("RESOLVED:alice"),
            AlertPayload::Resolved { actor: "alice".into() }
        );
        let fall = AlertPayload::parse("0,0,0,0,0,0,1,7");
        assert!(matches!(fall, AlertPayload::Fall { .. }));
        assert_eq!(
            AlertPayload::Resolved { actor: "bob".into() }.encode(),
            "RESOLVED:bob"
        );
    }
}
