//! Fallgate Runtime
//!
//! Runtime plumbing shared by the gateway components:
//! - `bus`: the publish/subscribe capability that decouples telemetry
//!   ingestion from alert handling, plus an in-process transport
//! - `clock`: injectable wall clock so staleness and TTL rules are testable

pub mod bus;
pub mod clock;

pub use bus::{
    handler_fn, Bus, BusError, BusMessage, BusResult, BusStats, LocalBus, MessageHandler,
    Subscription, TopicFilter,
};
pub use clock::{Clock, ManualClock, SystemClock};
