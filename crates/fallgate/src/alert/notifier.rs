//! Notification Channel
//!
//! Outbound side of the external chat channel. Acknowledgment actions come
//! back through an [`AckSender`](super::AckSender).

use async_trait::async_trait;
use fallgate_types::AlertToken;

use super::ACKNOWLEDGE_LABEL;

/// Errors reported by a notification channel
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    #[error("Recipient {0} unreachable")]
    Unreachable(i64),

    #[error("Notification channel error: {0}")]
    Channel(String),

    #[error("Unrecognised callback data: {0:?}")]
    InvalidCallback(String),
}

/// Outbound notification capability
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), NotifyError>;

    /// Send a message carrying an acknowledgment action bound to `token`
    async fn send_actionable_alert(
        &self,
        chat_id: i64,
        text: &str,
        token: &AlertToken,
    ) -> Result<(), NotifyError>;
}

/// Notifier that writes every notification to the log
///
/// The action is rendered with the callback encoding a chat adapter would
/// attach to its button.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        tracing::info!(chat_id, text, "Notification");
        Ok(())
    }

    async fn send_actionable_alert(
        &self,
        chat_id: i64,
        text: &str,
        token: &AlertToken,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            chat_id,
            text,
            action = ACKNOWLEDGE_LABEL,
            callback = %token.to_callback_data(),
            "Actionable notification"
        );
        Ok(())
    }
}
