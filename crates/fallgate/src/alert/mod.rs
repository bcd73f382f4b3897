//! Alert Dispatch & Acknowledgment
//!
//! Consumes fall alerts from the bus, turns each into at most one Active
//! [`FallEvent`](fallgate_types::FallEvent) per board, notifies the board's
//! subscribers and settles their acknowledgments against the lifecycle store.

mod callback;
mod coordinator;
mod directory;
mod notifier;
mod texts;

pub use callback::*;
pub use coordinator::*;
pub use directory::*;
pub use notifier::*;
pub use texts::*;

use crate::lifecycle::StoreError;

/// Errors surfaced by the coordinator
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Fall event storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("Subscriber lookup failed: {0}")]
    Directory(#[from] DirectoryError),
}
