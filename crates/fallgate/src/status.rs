//! Periodic status log
//!
//! Reports recently seen boards and the ingestion counters.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::ingest::{Ingest, IngestStatsSnapshot};
use crate::session::{BoardSessionRegistry, SessionSnapshot};

/// One status sample
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub boards: Vec<SessionSnapshot>,
    pub ingest: IngestStatsSnapshot,
}

pub struct StatusReporter {
    registry: Arc<BoardSessionRegistry>,
    ingest: Ingest,
    window: Duration,
}

impl StatusReporter {
    pub fn new(ingest: Ingest, window: Duration) -> Self {
        Self {
            registry: Arc::clone(ingest.registry()),
            ingest,
            window,
        }
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            boards: self.registry.snapshot(self.window),
            ingest: self.ingest.stats(),
        }
    }

    pub fn log(&self) {
        let report = self.report();
        let now = Utc::now();

        tracing::info!(
            boards = report.boards.len(),
            connections = report.ingest.connections_accepted,
            lines = report.ingest.lines_received,
            readings = report.ingest.readings_published,
            alerts = report.ingest.alerts_published,
            protocol_errors = report.ingest.protocol_errors,
            duplicates = report.ingest.duplicate_rejections,
            evictions = report.ingest.stale_evictions,
            publish_failures = report.ingest.publish_failures,
            "Gateway status"
        );

        for board in &report.boards {
            tracing::info!(
                board_id = %board.board_id,
                control = board.control_connected,
                data = board.data_connected,
                last_seen_secs = (now - board.last_seen).num_seconds(),
                "Board status"
            );
        }
    }

    /// Log every `every` until `shutdown` flips to true
    pub async fn run(self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.log(),
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
    }
}
