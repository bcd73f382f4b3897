//! Board Session Registry
//!
//! In-memory table of device connections. Owns the registration, eviction and
//! liveness rules for every board's control and data sockets.

mod handle;
mod registry;

pub use handle::*;
pub use registry::*;

use fallgate_types::BoardId;

/// Errors raised when talking to a registered board
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Board not registered: {0}")]
    NotRegistered(BoardId),

    #[error("Board {0} has no control socket")]
    NoControlSocket(BoardId),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Outbound queue full")]
    QueueFull,
}
