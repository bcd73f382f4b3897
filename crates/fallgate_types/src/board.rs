// Board identity and socket roles

use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Board Identifier
// ─────────────────────────────────────────────────────────────────────────────

/// Stable identifier a board announces in its handshake and in every
/// telemetry line (e.g. `"7"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(String);

impl BoardId {
    /// Create a board id, rejecting empty input and anything that cannot be
    /// used as a single topic segment (`/`, `+`, `#`)
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '+', '#']) {
            return None;
        }
        if trimmed.len() == id.len() {
            Some(Self(id))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BoardId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Socket Role
// ─────────────────────────────────────────────────────────────────────────────

/// The role a device connection registers as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketRole {
    /// Command channel (`TYPE:CMD:<id>`)
    Control,
    /// Telemetry channel (`TYPE:DATA:<id>`)
    Data,
}

impl SocketRole {
    /// Handshake keyword for this role
    pub fn keyword(&self) -> &'static str {
        match self {
            SocketRole::Control => "CMD",
            SocketRole::Data => "DATA",
        }
    }

    pub(crate) fn parse(keyword: &str) -> Option<Self> {
        [SocketRole::Control, SocketRole::Data]
            .into_iter()
            .find(|role| role.keyword() == keyword)
    }
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketRole::Control => write!(f, "control"),
            SocketRole::Data => write!(f, "data"),
        }
    }
}
