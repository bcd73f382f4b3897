//! Connection Handles
//!
//! Opaque handle to one accepted device connection. The registry stores
//! handles; closing a handle asks the connection's task to tear the socket
//! down.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::SessionError;

struct HandleInner {
    id: Uuid,
    peer: String,
    closed: watch::Sender<bool>,
    /// Lines queued for the connection's writer task (control sockets only)
    outbound: Option<mpsc::Sender<String>>,
}

/// Handle to a live device connection
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    /// Handle for a receive-only connection
    pub fn new(peer: impl Into<String>) -> Self {
        Self::build(peer.into(), None)
    }

    /// Handle whose connection also accepts outbound lines
    pub fn with_outbound(peer: impl Into<String>, outbound: mpsc::Sender<String>) -> Self {
        Self::build(peer.into(), Some(outbound))
    }

    fn build(peer: String, outbound: Option<mpsc::Sender<String>>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                peer,
                closed,
                outbound,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Remote address of the connection
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Request the connection to close. Idempotent.
    pub fn close(&self) {
        self.inner.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once [`ConnectionHandle::close`] has been called
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Queue a line for the connection's writer without blocking
    pub fn send_line(&self, line: impl Into<String>) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::ConnectionClosed);
        }
        let outbound = self
            .inner
            .outbound
            .as_ref()
            .ok_or(SessionError::ConnectionClosed)?;

        outbound.try_send(line.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SessionError::ConnectionClosed,
        })
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
