// Composition root: wires the registry, presence broadcaster, and seen relay
// to connection lifecycle events.

use std::sync::Arc;

use parley_common::protocol::ws::GatewayEvent;
use parley_common::types::MessageRecord;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::seen::{SeenOutcome, SeenRelay};
use crate::store::MessageStore;
use crate::ws::session::ConnectionSession;

#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceBroadcaster>,
    relay: Arc<SeenRelay>,
}

impl Gateway {
    pub fn new(store: MessageStore) -> Self {
        let registry = Arc::new(ConnectionRegistry::default());
        Self {
            presence: Arc::new(PresenceBroadcaster::new(Arc::clone(&registry))),
            relay: Arc::new(SeenRelay::new(Arc::clone(&registry), store)),
            registry,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &MessageStore {
        self.relay.store()
    }

    /// Accepts a new connection. Connections without an identity are kept
    /// open but never registered, so they receive no presence or seen traffic.
    pub async fn connect(
        &self,
        user_id: Option<String>,
        outbound: mpsc::UnboundedSender<GatewayEvent>,
    ) -> ConnectionSession {
        let mut session = ConnectionSession::new(ConnectionHandle::new(outbound), user_id);
        metrics::increment_connections_total();

        let Some(user_id) = session.user_id().map(ToOwned::to_owned) else {
            warn!(connection_id = %session.connection_id(), "connection without user identity");
            return session;
        };

        let outcome = self.registry.register(&user_id, session.handle().clone()).await;
        if let Some(replaced) = &outcome.replaced {
            debug!(
                user_id = %user_id,
                replaced_connection_id = %replaced.id(),
                "user reconnected; newer connection takes over routing",
            );
        }
        session.mark_registered();
        metrics::set_connections_registered(outcome.online_count);
        info!(
            user_id = %user_id,
            connection_id = %session.connection_id(),
            state = session.state().as_str(),
            "user online",
        );

        self.presence.announce().await;
        session
    }

    /// Routes one decoded client event. Returns the relay outcome for seen
    /// events and `None` for events clients may not send.
    pub async fn handle_event(
        &self,
        connection_id: ConnectionId,
        event: GatewayEvent,
    ) -> Option<SeenOutcome> {
        if !event.is_inbound() {
            warn!(
                connection_id = %connection_id,
                event = event.name(),
                "ignoring server-only event sent by client",
            );
            return None;
        }

        match event {
            GatewayEvent::MessageSeen { message_id, user_id } => {
                Some(self.relay.handle(&message_id, &user_id).await)
            }
            _ => None,
        }
    }

    /// Removes the connection from the registry, along with its user's route
    /// if it still holds it, and re-announces presence.
    pub async fn disconnect(&self, session: &mut ConnectionSession) {
        let connection_id = session.connection_id();
        let outcome = self.registry.unregister(connection_id).await;
        match outcome.user_id {
            Some(user_id) => info!(user_id = %user_id, connection_id = %connection_id, "user offline"),
            None => debug!(
                connection_id = %connection_id,
                previous_state = session.state().as_str(),
                "closed connection held no user route",
            ),
        }
        session.mark_unregistered();
        metrics::set_connections_registered(outcome.online_count);

        self.presence.announce().await;
    }

    /// Queues `event` for the user's registered connection. Returns false when
    /// the user is offline or the connection is closing; nothing is queued for
    /// later delivery.
    pub async fn emit_to_user(&self, user_id: &str, event: GatewayEvent) -> bool {
        let Some(connection) = self.registry.lookup(user_id).await else {
            return false;
        };

        let event_name = event.name();
        match connection.send(event) {
            Ok(()) => true,
            Err(error) => {
                metrics::record_delivery_failure(event_name);
                warn!(user_id = %user_id, event = event_name, error = %error, "failed to emit event");
                false
            }
        }
    }

    /// Pushes a freshly stored message to its receiver, if online.
    pub async fn notify_new_message(&self, record: &MessageRecord) -> bool {
        self.emit_to_user(&record.receiver_id, GatewayEvent::NewMessage(record.clone())).await
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.registry.snapshot().await
    }
}
