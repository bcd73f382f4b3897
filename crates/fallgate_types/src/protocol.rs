// Telemetry Protocol - Line decoder for the board TCP protocol
//
// A connection starts with a single handshake line naming its role and board,
// followed (on data sockets) by comma-separated sensor lines:
//
//   TYPE:DATA:7
//   0.10,0.20,9.81,0.00,0.00,0.00,0,7,0
//
// Decoding is stateless. Callers decide what a ProtocolError means for the
// connection (the handshake closes it, a bad sensor line is just dropped).

use crate::{Axes, BoardId, FallStage, SensorReading, SocketRole};

/// Field count without the reserved fall-stage detail
pub const BASE_FIELD_COUNT: usize = 8;

/// Field count with the reserved fall-stage detail
pub const EXTENDED_FIELD_COUNT: usize = 9;

const HANDSHAKE_PREFIX: &str = "TYPE";

// ─────────────────────────────────────────────────────────────────────────────
// Protocol Error
// ─────────────────────────────────────────────────────────────────────────────

/// A line that does not follow the protocol
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid handshake: {0:?}")]
    InvalidHandshake(String),

    #[error("Wrong field count: expected 8 or 9, got {0}")]
    FieldCount(usize),

    #[error("Invalid number in field {index}: {value:?}")]
    InvalidNumber { index: usize, value: String },

    #[error("Invalid fall flag: {0:?}")]
    InvalidFallFlag(String),

    #[error("Invalid fall stage: {0:?}")]
    InvalidFallStage(String),

    #[error("Invalid board id: {0:?}")]
    InvalidBoardId(String),

    #[error("Line announces board {found}, connection is registered as {expected}")]
    BoardMismatch { expected: BoardId, found: BoardId },

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

/// First line of every connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub role: SocketRole,
    pub board_id: BoardId,
}

impl Handshake {
    /// Parse `TYPE:CMD:<id>` or `TYPE:DATA:<id>`
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let invalid = || ProtocolError::InvalidHandshake(line.to_string());

        let mut parts = line.splitn(3, ':');
        if parts.next() != Some(HANDSHAKE_PREFIX) {
            return Err(invalid());
        }
        let role = parts.next().and_then(SocketRole::parse).ok_or_else(invalid)?;
        let board_id = parts.next().and_then(BoardId::new).ok_or_else(invalid)?;

        Ok(Self { role, board_id })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensor Lines
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a sensor line: `ax,ay,az,gx,gy,gz,fallFlag,boardID[,stage]`
///
/// Surrounding whitespace (including the `\r\n` terminator) is ignored.
pub fn parse_sensor_line(line: &str) -> Result<SensorReading, ProtocolError> {
    let raw = line.trim();
    let fields: Vec<&str> = raw.split(',').map(str::trim).collect();

    if fields.len() != BASE_FIELD_COUNT && fields.len() != EXTENDED_FIELD_COUNT {
        return Err(ProtocolError::FieldCount(fields.len()));
    }

    let mut axes = [0f32; 6];
    for (index, slot) in axes.iter_mut().enumerate() {
        *slot = parse_axis(fields[index], index)?;
    }

    let fall_flag = match fields[6] {
        "0" => false,
        "1" => true,
        other => return Err(ProtocolError::InvalidFallFlag(other.to_string())),
    };

    let board_id =
        BoardId::new(fields[7]).ok_or_else(|| ProtocolError::InvalidBoardId(fields[7].to_string()))?;

    let stage = match fields.get(8) {
        Some(value) => Some(
            value
                .parse::<u8>()
                .ok()
                .and_then(FallStage::from_u8)
                .ok_or_else(|| ProtocolError::InvalidFallStage(value.to_string()))?,
        ),
        None => None,
    };

    Ok(SensorReading {
        board_id,
        accel: Axes::new(axes[0], axes[1], axes[2]),
        gyro: Axes::new(axes[3], axes[4], axes[5]),
        fall_flag,
        stage,
        raw: raw.to_string(),
    })
}

fn parse_axis(value: &str, index: usize) -> Result<f32, ProtocolError> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ProtocolError::InvalidNumber {
            index,
            value: value.to_string(),
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
