//! Outgoing notifications and the late-bound client handle
//!
//! Notifications are queued on an unbounded channel and drained by a single
//! forwarder task, so the client receives them in the order they were
//! produced. Requests that need an answer (permissions, file writes) go
//! straight through the [`ClientSlot`].

use crate::error::{BridgeError, Result};
use agent_client_protocol::{Client, ExtNotification, SessionNotification};
use serde::Serialize;
use serde_json::value::RawValue;
use std::cell::OnceCell;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Anything the bridge pushes to the client without expecting a reply
#[derive(Debug, Clone)]
pub enum OutgoingNotification {
    Session(SessionNotification),
    Extension(ExtNotification),
}

/// Notification sender for streaming updates
#[derive(Debug, Clone)]
pub struct NotificationSender {
    sender: mpsc::UnboundedSender<OutgoingNotification>,
}

impl NotificationSender {
    /// Create a sender plus the receiver a forwarder should drain
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutgoingNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn send_update(&self, notification: SessionNotification) -> Result<()> {
        self.send(OutgoingNotification::Session(notification))
    }

    pub fn send_ext(&self, notification: ExtNotification) -> Result<()> {
        self.send(OutgoingNotification::Extension(notification))
    }

    fn send(&self, notification: OutgoingNotification) -> Result<()> {
        self.sender
            .send(notification)
            .map_err(|_| BridgeError::Transport("notification channel closed".to_string()))
    }
}

/// Encode an extension payload
pub fn to_raw_json<T: Serialize>(value: &T) -> Result<Arc<RawValue>> {
    Ok(Arc::from(serde_json::value::to_raw_value(value)?))
}

/// Deliver queued notifications to the client until every sender is gone
///
/// A failed delivery is logged and does not stop later notifications.
pub async fn forward_notifications(
    mut receiver: mpsc::UnboundedReceiver<OutgoingNotification>,
    client: Rc<dyn Client>,
) {
    while let Some(notification) = receiver.recv().await {
        match notification {
            OutgoingNotification::Session(notification) => {
                let session_id = notification.session_id.clone();
                if let Err(e) = client.session_notification(notification).await {
                    tracing::error!(
                        "Failed to send session notification for {}: {}",
                        session_id,
                        e
                    );
                }
            }
            OutgoingNotification::Extension(notification) => {
                let method = notification.method.clone();
                if let Err(e) = client.ext_notification(notification).await {
                    tracing::error!("Failed to send extension notification {}: {}", method, e);
                }
            }
        }
    }
    tracing::debug!("Notification forwarder stopped");
}

/// Client connection attached once the transport is up
///
/// The agent is constructed before its connection exists, so the handle is
/// filled in afterwards, exactly once.
#[derive(Clone, Default)]
pub struct ClientSlot {
    client: Rc<OnceCell<Rc<dyn Client>>>,
}

impl ClientSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the client; returns false if one was already attached
    pub fn attach(&self, client: Rc<dyn Client>) -> bool {
        self.client.set(client).is_ok()
    }

    pub fn get(&self) -> Result<Rc<dyn Client>> {
        self.client
            .get()
            .cloned()
            .ok_or_else(|| BridgeError::Transport("client connection not attached".to_string()))
    }
}
