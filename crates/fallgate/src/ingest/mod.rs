//! Device Ingestion
//!
//! TCP side of the gateway. Every accepted connection runs its own read loop:
//! the first line registers the socket with the [`BoardSessionRegistry`],
//! later lines on a data socket are parsed and published to the bus. A 0→1
//! transition of a board's fall flag additionally publishes an alert.

mod connection;
mod forwarder;
mod server;
mod stats;

pub use forwarder::*;
pub use stats::*;

use std::sync::Arc;

use fallgate_runtime::Bus;

use crate::session::BoardSessionRegistry;

/// Depth of a control socket's outbound line queue
const OUTBOUND_QUEUE_DEPTH: usize = 16;

/// Ingestion tuning
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Longest accepted line, excluding the terminator
    pub max_line_bytes: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { max_line_bytes: 512 }
    }
}

struct IngestInner {
    registry: Arc<BoardSessionRegistry>,
    bus: Arc<dyn Bus>,
    stats: IngestStats,
    settings: IngestSettings,
}

/// Device connection server
#[derive(Clone)]
pub struct Ingest {
    inner: Arc<IngestInner>,
}

impl Ingest {
    pub fn new(
        registry: Arc<BoardSessionRegistry>,
        bus: Arc<dyn Bus>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            inner: Arc::new(IngestInner {
                registry,
                bus,
                stats: IngestStats::new(),
                settings,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<BoardSessionRegistry> {
        &self.inner.registry
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.inner.stats.snapshot()
    }
}
