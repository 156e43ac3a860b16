// Seen-acknowledgment relay: persists a viewer on a message and tells the
// message's sender, if the sender is online.

use std::sync::Arc;

use parley_common::protocol::ws::{SeenEvent, SeenEventError};
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::registry::ConnectionRegistry;
use crate::store::MessageStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeenOutcome {
    /// Missing message or viewer id. Nothing was stored.
    Rejected(SeenEventError),
    /// The store has no message with this id.
    NotFound,
    /// The store call failed. Nothing is retried.
    StoreFailed,
    /// The sender's connection was handed the notification.
    Notified { sender_id: String },
    /// The sender is not online; the notification is dropped.
    SenderOffline { sender_id: String },
    /// The sender's connection closed before the notification was queued.
    DeliveryFailed { sender_id: String },
}

impl SeenOutcome {
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::NotFound => "not_found",
            Self::StoreFailed => "store_failed",
            Self::Notified { .. } => "notified",
            Self::SenderOffline { .. } => "sender_offline",
            Self::DeliveryFailed { .. } => "delivery_failed",
        }
    }
}

pub struct SeenRelay {
    registry: Arc<ConnectionRegistry>,
    store: MessageStore,
}

impl SeenRelay {
    pub fn new(registry: Arc<ConnectionRegistry>, store: MessageStore) -> Self {
        Self { registry, store }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Processes one seen event end to end.
    ///
    /// Every replay of a valid event notifies the sender again; only the
    /// stored seen-by set is deduplicated.
    pub async fn handle(&self, message_id: &str, viewer_id: &str) -> SeenOutcome {
        let outcome = self.process(message_id, viewer_id).await;
        metrics::record_seen_outcome(outcome.as_label());
        outcome
    }

    async fn process(&self, message_id: &str, viewer_id: &str) -> SeenOutcome {
        let event = match SeenEvent::parse(message_id, viewer_id) {
            Ok(event) => event,
            Err(reason) => {
                warn!(%reason, "dropping invalid seen event");
                return SeenOutcome::Rejected(reason);
            }
        };

        let updated = match self.store.mark_seen(&event.message_id, &event.viewer_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(message_id = %event.message_id, "seen event for unknown message");
                return SeenOutcome::NotFound;
            }
            Err(error) => {
                error!(
                    error = ?error,
                    message_id = %event.message_id,
                    viewer_id = %event.viewer_id,
                    "failed to record seen event",
                );
                return SeenOutcome::StoreFailed;
            }
        };

        // Other connections may have come and gone while the store call was
        // in flight; route using the returned record and a fresh lookup.
        let sender_id = updated.sender_id;
        let Some(connection) = self.registry.lookup(&sender_id).await else {
            debug!(
                message_id = %event.message_id,
                sender_id = %sender_id,
                "sender offline; seen notification dropped",
            );
            return SeenOutcome::SenderOffline { sender_id };
        };

        match connection.send(event.notification()) {
            Ok(()) => {
                info!(
                    message_id = %event.message_id,
                    sender_id = %sender_id,
                    seen_by = %event.viewer_id,
                    "seen notification sent",
                );
                SeenOutcome::Notified { sender_id }
            }
            Err(error) => {
                metrics::record_delivery_failure("seenNotification");
                warn!(
                    message_id = %event.message_id,
                    sender_id = %sender_id,
                    error = %error,
                    "failed to deliver seen notification",
                );
                SeenOutcome::DeliveryFailed { sender_id }
            }
        }
    }
}
