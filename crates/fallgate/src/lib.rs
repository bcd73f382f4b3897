//! Fallgate - Fall Detection Gateway
//!
//! This crate provides the gateway between wearable fall sensors and the
//! people who respond to them:
//! - Device ingestion over TCP with per-board session tracking
//! - Edge-triggered fall alerts published on the bus
//! - Fall event lifecycle persisted in redb
//! - Alert dispatch and race-safe acknowledgment

// Re-export core crates
pub use fallgate_runtime;
pub use fallgate_types;

// Board session table
pub mod session;

// TCP device server
pub mod ingest;

// Fall event stores
pub mod lifecycle;

// Alert dispatch and acknowledgment
pub mod alert;

// Configuration
pub mod config;

// Status reporting
pub mod status;
