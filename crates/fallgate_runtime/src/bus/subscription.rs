//! Subscription Handle
//!
//! Keeps a subscription alive. Dropping the handle stops delivery.

use tokio::sync::oneshot;

/// Handle to an active subscription
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    pattern: String,
    cancel: Option<oneshot::Sender<()>>,
}

impl Subscription {
    /// Create a handle; the transport stops delivery once `cancel` fires or
    /// is dropped
    pub fn new(id: u64, pattern: impl Into<String>, cancel: oneshot::Sender<()>) -> Self {
        Self {
            id,
            pattern: pattern.into(),
            cancel: Some(cancel),
        }
    }

    /// Transport-assigned subscription id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Pattern this subscription was registered with
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Stop delivery now
    pub fn cancel(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.fire();
    }
}
