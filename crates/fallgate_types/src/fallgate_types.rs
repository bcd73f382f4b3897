//! Fallgate Types - Core data model for the fall-detection gateway
//!
//! This crate contains the pure data structures shared by the ingestion
//! server and the alert coordinator, plus the line-oriented telemetry
//! protocol spoken by the boards. Nothing here performs I/O.

mod board;
mod event;
mod protocol;
mod reading;
mod topic;

pub use board::*;
pub use event::*;
pub use protocol::*;
pub use reading::*;
pub use topic::*;
