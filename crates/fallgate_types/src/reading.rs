// Sensor Readings - One decoded telemetry line from a board

use serde::{Deserialize, Serialize};

use crate::BoardId;

/// Three-axis sample (accelerometer in m/s², gyroscope in deg/s)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Axes {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Axes {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// On-board fall detector stage reported in the optional ninth field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FallStage {
    Normal = 0,
    FreefallDetected = 1,
    ImpactDetected = 2,
    FallConfirmed = 3,
}

impl FallStage {
    /// Convert from the wire value, `None` for anything outside 0..=3
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Normal),
            1 => Some(Self::FreefallDetected),
            2 => Some(Self::ImpactDetected),
            3 => Some(Self::FallConfirmed),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FallStage::Normal => "Normal",
            FallStage::FreefallDetected => "Freefall Detected",
            FallStage::ImpactDetected => "Impact Detected",
            FallStage::FallConfirmed => "Fall Confirmed",
        }
    }
}

/// A decoded telemetry line. Transient: published to the bus and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub board_id: BoardId,
    pub accel: Axes,
    pub gyro: Axes,
    /// Fall-status bit (`"1"` on the wire)
    pub fall_flag: bool,
    /// Reserved fall-state detail, present on newer firmware
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<FallStage>,
    /// The original line without its terminator, forwarded verbatim
    pub raw: String,
}
