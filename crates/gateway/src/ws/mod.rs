pub mod session;

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        RawQuery, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use parley_common::protocol::ws::{decode_event, encode_event, GatewayEvent};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::gateway::Gateway;
use crate::registry::ConnectionId;

pub const HEARTBEAT_INTERVAL_MS: u64 = 25_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 20_000;
pub const MAX_FRAME_BYTES: usize = 65_536;

/// Server ping cadence and how long a ping may go unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            timeout: Duration::from_millis(HEARTBEAT_TIMEOUT_MS),
        }
    }
}

impl Heartbeat {
    /// Longest allowed gap since the last pong before the connection is dropped.
    pub fn pong_deadline(&self) -> Duration {
        self.interval + self.timeout
    }
}

#[derive(Clone)]
struct WsState {
    gateway: Gateway,
    heartbeat: Heartbeat,
}

pub fn router(gateway: Gateway) -> Router {
    router_with_heartbeat(gateway, Heartbeat::default())
}

pub fn router_with_heartbeat(gateway: Gateway, heartbeat: Heartbeat) -> Router {
    Router::new()
        .route("/v1/ws", get(ws_upgrade))
        .with_state(WsState { gateway, heartbeat })
}

async fn ws_upgrade(
    State(state): State<WsState>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = session::identity_from_query(query.as_deref());
    ws.max_frame_size(MAX_FRAME_BYTES)
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(state, user_id, socket))
}

async fn handle_socket(state: WsState, user_id: Option<String>, mut socket: WebSocket) {
    let WsState { gateway, heartbeat } = state;
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<GatewayEvent>();
    let mut session = gateway.connect(user_id, outbound_sender).await;
    let connection_id = session.connection_id();

    // Heartbeat: server pings every interval, disconnects if no pong arrives
    // within the timeout after the following ping is due.
    let mut heartbeat_interval = tokio::time::interval(heartbeat.interval);
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let pong_deadline = heartbeat.pong_deadline();

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > pong_deadline {
                    warn!(connection_id = %connection_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                let Some(outbound) = maybe_outbound else {
                    break;
                };
                if let Err(error) = send_event(&mut socket, &outbound).await {
                    warn!(
                        connection_id = %connection_id,
                        event = outbound.name(),
                        error = %error,
                        "websocket send failed",
                    );
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        dispatch_frame(&gateway, connection_id, raw_message.as_str());
                    }
                    Ok(Message::Binary(_)) => {
                        warn!(connection_id = %connection_id, "ignoring binary websocket frame");
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        debug!(connection_id = %connection_id, error = %error, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    gateway.disconnect(&mut session).await;
}

/// Decodes one text frame and hands it to the gateway on its own task, so a
/// slow message store never stalls this connection's reads or writes.
fn dispatch_frame(gateway: &Gateway, connection_id: ConnectionId, raw_message: &str) {
    let event = match decode_event(raw_message) {
        Ok(event) => event,
        Err(error) => {
            warn!(connection_id = %connection_id, error = %error, "dropping malformed websocket frame");
            return;
        }
    };

    let gateway = gateway.clone();
    tokio::spawn(async move {
        gateway.handle_event(connection_id, event).await;
    });
}

async fn send_event(socket: &mut WebSocket, event: &GatewayEvent) -> anyhow::Result<()> {
    let encoded = encode_event(event)?;
    socket.send(Message::Text(encoded.into())).await?;
    Ok(())
}
