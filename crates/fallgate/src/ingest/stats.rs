//! Ingestion counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Diagnostic counters shared by every connection task
#[derive(Debug, Default)]
pub struct IngestStats {
    connections_accepted: AtomicU64,
    lines_received: AtomicU64,
    readings_published: AtomicU64,
    protocol_errors: AtomicU64,
    alerts_published: AtomicU64,
    duplicate_rejections: AtomicU64,
    stale_evictions: AtomicU64,
    publish_failures: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub connections_accepted: u64,
    pub lines_received: u64,
    pub readings_published: u64,
    pub protocol_errors: u64,
    pub alerts_published: u64,
    pub duplicate_rejections: u64,
    pub stale_evictions: u64,
    pub publish_failures: u64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn line_received(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reading_published(&self) {
        self.readings_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn alert_published(&self) {
        self.alerts_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn duplicate_rejected(&self) {
        self.duplicate_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale_evicted(&self) {
        self.stale_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            lines_received: self.lines_received.load(Ordering::Relaxed),
            readings_published: self.readings_published.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            alerts_published: self.alerts_published.load(Ordering::Relaxed),
            duplicate_rejections: self.duplicate_rejections.load(Ordering::Relaxed),
            stale_evictions: self.stale_evictions.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}
