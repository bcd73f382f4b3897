//! Acknowledgment Callbacks
//!
//! Inbound half of the notification channel. An adapter decodes the action a
//! responder pressed and hands it to an [`AckSender`]; the coordinator drains
//! the queue in [`AlertCoordinator::run_acknowledgments`](super::AlertCoordinator::run_acknowledgments).

use std::io::BufRead;

use fallgate_types::{AlertToken, Responder};
use tokio::sync::mpsc;

use super::NotifyError;

/// Depth of the acknowledgment queue
pub const ACK_QUEUE_DEPTH: usize = 64;

/// A responder pressed the acknowledge action of an alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    pub token: AlertToken,
    pub responder: Responder,
}

/// Sending side of the acknowledgment queue, held by notification adapters
#[derive(Debug, Clone)]
pub struct AckSender {
    tx: mpsc::Sender<Acknowledgment>,
}

/// Create an acknowledgment queue
pub fn ack_channel(depth: usize) -> (AckSender, mpsc::Receiver<Acknowledgment>) {
    let (tx, rx) = mpsc::channel(depth);
    (AckSender { tx }, rx)
}

impl AckSender {
    pub async fn submit(&self, ack: Acknowledgment) -> Result<(), NotifyError> {
        self.tx.send(ack).await.map_err(|_| queue_closed())
    }

    /// Decode callback data attached to an actionable alert and queue it
    pub async fn submit_callback(&self, data: &str, responder: Responder) -> Result<(), NotifyError> {
        let token = decode(data)?;
        self.submit(Acknowledgment { token, responder }).await
    }

    /// [`submit_callback`](Self::submit_callback) for adapters running
    /// outside the async runtime
    pub fn blocking_submit_callback(&self, data: &str, responder: Responder) -> Result<(), NotifyError> {
        let token = decode(data)?;
        self.tx
            .blocking_send(Acknowledgment { token, responder })
            .map_err(|_| queue_closed())
    }
}

fn decode(data: &str) -> Result<AlertToken, NotifyError> {
    AlertToken::from_callback_data(data).ok_or_else(|| NotifyError::InvalidCallback(data.to_string()))
}

fn queue_closed() -> NotifyError {
    NotifyError::Channel("acknowledgment queue closed".into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Console
// ─────────────────────────────────────────────────────────────────────────────

/// Parse `<callback-data> <chat-id> <username>`
fn parse_console_line(line: &str) -> Option<(&str, Responder)> {
    let mut fields = line.split_whitespace();
    let data = fields.next()?;
    let chat_id = fields.next()?.parse().ok()?;
    let username = fields.next()?.trim_start_matches('@');
    if username.is_empty() || fields.next().is_some() {
        return None;
    }
    Some((data, Responder::new(chat_id, username)))
}

/// Inbound side of [`LogNotifier`](super::LogNotifier)
///
/// An operator pastes the logged callback data followed by the acting chat
/// id and username, e.g. `acknowledge:3:7 42 alice`. Blocks until `reader`
/// ends or the queue closes; returns the number of queued acknowledgments.
pub fn read_console_acks<R: BufRead>(reader: R, sender: &AckSender) -> usize {
    let mut queued = 0;
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Console read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some((data, responder)) = parse_console_line(&line) else {
            tracing::warn!(line = %line.trim(), "Expected `<callback> <chat_id> <username>`");
            continue;
        };
        match sender.blocking_submit_callback(data, responder) {
            Ok(()) => queued += 1,
            Err(e @ NotifyError::InvalidCallback(_)) => {
                tracing::warn!(error = %e, "Ignored console acknowledgment");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Console acknowledgments stopped");
                break;
            }
        }
    }
    queued
}
