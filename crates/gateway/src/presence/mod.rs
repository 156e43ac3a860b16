// Full-state presence fan-out.

use std::sync::Arc;

use parley_common::protocol::ws::GatewayEvent;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::metrics;
use crate::registry::ConnectionRegistry;

/// Result of one announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceReport {
    pub online_users: Vec<String>,
    pub delivered: usize,
    pub failed: usize,
}

/// Sends the complete online set to every registered connection.
///
/// Announcements are serialized: each one reads the registry after the
/// previous one finished queueing, so a client never receives an older
/// snapshot after a newer one.
#[derive(Debug)]
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
    announce_lock: Mutex<()>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry, announce_lock: Mutex::new(()) }
    }

    pub async fn announce(&self) -> PresenceReport {
        let _ordering = self.announce_lock.lock().await;
        let view = self.registry.presence_view().await;
        let event = GatewayEvent::GetOnlineUsers(view.online_users.clone());

        let mut delivered = 0;
        let mut failed = 0;
        for (user_id, connection) in view.connections {
            match connection.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    failed += 1;
                    metrics::record_delivery_failure(event.name());
                    warn!(
                        user_id = %user_id,
                        connection_id = %connection.id(),
                        error = %error,
                        "failed to deliver presence snapshot",
                    );
                }
            }
        }

        metrics::increment_presence_broadcasts();
        debug!(online = view.online_users.len(), delivered, failed, "announced presence");

        PresenceReport { online_users: view.online_users, delivered, failed }
    }
}
