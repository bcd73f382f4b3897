//! Alert Coordinator
//!
//! Bus consumer for `boards/+/alerts`. On a fall alert it expires stale
//! events, skips boards that already have an Active event and otherwise
//! creates one and sends every subscriber an actionable notification.
//! Acknowledgments race on [`FallEventStore::resolve`]: exactly one responder
//! wins, every later one is told why they lost.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fallgate_runtime::{Bus, BusMessage, BusResult, MessageHandler, Subscription};
use fallgate_types::{
    alerts_topic, all_alerts_pattern, board_from_topic, AlertPayload, AlertToken, BoardId,
    FallEvent, FallStatus, Responder,
};
use tokio::sync::{mpsc, watch};

use super::{
    fall_alert_text, resolved_text, Acknowledgment, CoordinatorError, Notifier,
    SubscriberDirectory, ALREADY_ACKNOWLEDGED_TEXT, EXPIRED_TEXT, STORAGE_FAILURE_TEXT,
};
use crate::lifecycle::{CreateOutcome, FallEventStore};

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to an incoming alert
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    /// A new event was created and `notified` subscribers were reached
    Created { event: FallEvent, notified: usize },
    /// The board already has an Active event
    Duplicate(FallEvent),
}

/// What happened to an acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// This responder resolved the event
    Resolved,
    /// Someone else resolved it first
    AlreadyAcknowledged,
    /// The event expired (or no longer exists)
    Expired,
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────────────────

pub struct AlertCoordinator {
    events: Arc<dyn FallEventStore>,
    directory: Arc<dyn SubscriberDirectory>,
    notifier: Arc<dyn Notifier>,
    bus: Arc<dyn Bus>,
    /// Unacknowledged events older than this expire
    ttl: Duration,
}

impl AlertCoordinator {
    pub fn new(
        events: Arc<dyn FallEventStore>,
        directory: Arc<dyn SubscriberDirectory>,
        notifier: Arc<dyn Notifier>,
        bus: Arc<dyn Bus>,
        ttl: Duration,
    ) -> Self {
        Self {
            events,
            directory,
            notifier,
            bus,
            ttl,
        }
    }

    /// Subscribe the coordinator to every board's alerts topic
    pub async fn attach(self: &Arc<Self>, bus: &dyn Bus) -> BusResult<Subscription> {
        let handler: Arc<dyn MessageHandler> = Arc::clone(self) as Arc<dyn MessageHandler>;
        bus.subscribe(&all_alerts_pattern(), handler).await
    }

    /// Process a fall alert for `board_id`
    pub async fn handle_alert(&self, board_id: &BoardId) -> Result<AlertOutcome, CoordinatorError> {
        self.expire_stale().await?;

        if let Some(active) = self.events.get_active(board_id).await? {
            tracing::debug!(board_id = %board_id, event_id = %active.id, "Fall already active, alert ignored");
            return Ok(AlertOutcome::Duplicate(active));
        }

        let event = match self.events.create(board_id).await? {
            CreateOutcome::Created(event) => event,
            CreateOutcome::AlreadyActive(active) => {
                tracing::debug!(board_id = %board_id, event_id = %active.id, "Concurrent alert lost creation race");
                return Ok(AlertOutcome::Duplicate(active));
            }
        };
        tracing::info!(board_id = %board_id, event_id = %event.id, "Fall event created");

        let subscribers = self.directory.subscribers(board_id).await.map_err(|e| {
            tracing::error!(board_id = %board_id, event_id = %event.id, error = %e, "No subscribers notified");
            e
        })?;
        if subscribers.is_empty() {
            tracing::warn!(board_id = %board_id, event_id = %event.id, "Board has no subscribers");
        }

        let token = AlertToken::new(event.id, board_id.clone());
        let text = fall_alert_text(board_id);
        let mut notified = 0;
        for subscriber in &subscribers {
            match self
                .notifier
                .send_actionable_alert(subscriber.chat_id, &text, &token)
                .await
            {
                Ok(()) => notified += 1,
                Err(e) => {
                    tracing::warn!(
                        board_id = %board_id,
                        chat_id = subscriber.chat_id,
                        error = %e,
                        "Failed to deliver fall alert"
                    );
                }
            }
        }

        Ok(AlertOutcome::Created { event, notified })
    }

    /// Settle an acknowledgment from `responder`
    ///
    /// Stale events are expired first, so an acknowledgment arriving after
    /// the TTL loses even if no alert has run the expiry since.
    pub async fn acknowledge(
        &self,
        token: &AlertToken,
        responder: &Responder,
    ) -> Result<AckOutcome, CoordinatorError> {
        let resolved = async {
            self.expire_stale().await?;
            self.events
                .resolve(token.event_id, &responder.username)
                .await
                .map_err(CoordinatorError::from)
        }
        .await;

        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.storage_failure(token, responder, e).await),
        };

        if resolved {
            tracing::info!(
                board_id = %token.board_id,
                event_id = %token.event_id,
                resolved_by = %responder.username,
                "Fall event resolved"
            );
            self.publish_resolution(token, responder).await;
            self.broadcast_resolution(token, responder).await;
            return Ok(AckOutcome::Resolved);
        }

        let outcome = match self.events.get_by_id(token.event_id).await {
            Ok(Some(event)) if event.status == FallStatus::Resolved => AckOutcome::AlreadyAcknowledged,
            Ok(_) => AckOutcome::Expired,
            Err(e) => return Err(self.storage_failure(token, responder, e.into()).await),
        };

        tracing::info!(
            board_id = %token.board_id,
            event_id = %token.event_id,
            responder = %responder.username,
            outcome = ?outcome,
            "Late acknowledgment"
        );

        let text = match outcome {
            AckOutcome::AlreadyAcknowledged => ALREADY_ACKNOWLEDGED_TEXT,
            _ => EXPIRED_TEXT,
        };
        self.tell(responder.chat_id, text).await;
        Ok(outcome)
    }

    /// Settle queued acknowledgments in arrival order until the queue closes
    /// or `shutdown` flips to true
    pub async fn run_acknowledgments(
        self: Arc<Self>,
        mut acks: mpsc::Receiver<Acknowledgment>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let ack = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                ack = acks.recv() => ack,
            };
            let Some(Acknowledgment { token, responder }) = ack else {
                break;
            };

            // The responder has already been told about storage failures
            if let Err(e) = self.acknowledge(&token, &responder).await {
                tracing::warn!(event_id = %token.event_id, error = %e, "Acknowledgment failed");
            }
        }
        tracing::debug!("Acknowledgment queue stopped");
    }

    async fn expire_stale(&self) -> Result<(), CoordinatorError> {
        let expired = self.events.auto_expire_stale(self.ttl).await?;
        if expired > 0 {
            tracing::info!(expired, "Expired unacknowledged fall events");
        }
        Ok(())
    }

    async fn storage_failure(
        &self,
        token: &AlertToken,
        responder: &Responder,
        error: CoordinatorError,
    ) -> CoordinatorError {
        tracing::error!(
            board_id = %token.board_id,
            event_id = %token.event_id,
            error = %error,
            "Acknowledgment not recorded"
        );
        self.tell(responder.chat_id, STORAGE_FAILURE_TEXT).await;
        error
    }

    async fn publish_resolution(&self, token: &AlertToken, responder: &Responder) {
        let payload = AlertPayload::Resolved {
            actor: responder.username.clone(),
        };
        if let Err(e) = self
            .bus
            .publish(&alerts_topic(&token.board_id), &payload.encode())
            .await
        {
            tracing::warn!(board_id = %token.board_id, error = %e, "Failed to publish resolution");
        }
    }

    /// Tell every subscriber who resolved the fall, or just the responder
    /// when the roster is unavailable or empty
    async fn broadcast_resolution(&self, token: &AlertToken, responder: &Responder) {
        let recipients: Vec<i64> = match self.directory.subscribers(&token.board_id).await {
            Ok(subscribers) if !subscribers.is_empty() => {
                subscribers.into_iter().map(|s| s.chat_id).collect()
            }
            Ok(_) => vec![responder.chat_id],
            Err(e) => {
                tracing::warn!(board_id = %token.board_id, error = %e, "Roster unavailable, confirming to responder only");
                vec![responder.chat_id]
            }
        };

        let text = resolved_text(&token.board_id, &responder.username);
        for chat_id in recipients {
            self.tell(chat_id, &text).await;
        }
    }

    async fn tell(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.notifier.send_message(chat_id, text).await {
            tracing::warn!(chat_id, error = %e, "Failed to send message");
        }
    }
}

#[async_trait]
impl MessageHandler for AlertCoordinator {
    async fn handle(&self, message: BusMessage) {
        if let AlertPayload::Resolved { .. } = AlertPayload::parse(&message.payload) {
            return;
        }

        let Some(board_id) = board_from_topic(&message.topic) else {
            tracing::warn!(topic = %message.topic, "Alert on unexpected topic");
            return;
        };

        // Failures are retried by the next independent alert
        if let Err(e) = self.handle_alert(&board_id).await {
            tracing::error!(board_id = %board_id, error = %e, "Failed to handle fall alert");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
