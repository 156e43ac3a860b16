use parley_common::protocol::ws::USER_IDENTITY_QUERY_PARAM;
use tracing::warn;

use crate::registry::{ConnectionHandle, ConnectionId};

/// Identities longer than this are treated as absent.
pub const MAX_USER_IDENTITY_BYTES: usize = 256;

/// Lifecycle of one connection. `Unregistered` is terminal and is reached
/// directly from `Connecting` when no usable identity was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Unregistered,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Unregistered => "unregistered",
        }
    }
}

/// Per-connection bookkeeping owned by the socket task.
#[derive(Debug)]
pub struct ConnectionSession {
    handle: ConnectionHandle,
    user_id: Option<String>,
    state: ConnectionState,
}

impl ConnectionSession {
    pub fn new(handle: ConnectionHandle, user_id: Option<String>) -> Self {
        Self { handle, user_id, state: ConnectionState::Connecting }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn mark_registered(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Registered;
        }
    }

    pub(crate) fn mark_unregistered(&mut self) {
        self.state = ConnectionState::Unregistered;
    }
}

/// Pulls the user identity out of the upgrade request's query string.
/// Missing, blank, or oversized values yield `None`.
pub fn identity_from_query(raw_query: Option<&str>) -> Option<String> {
    let raw_query = raw_query?;
    let value = url::form_urlencoded::parse(raw_query.as_bytes())
        .find(|(key, _)| key == USER_IDENTITY_QUERY_PARAM)
        .map(|(_, value)| value.trim().to_owned())?;

    if value.is_empty() {
        return None;
    }
    if value.len() > MAX_USER_IDENTITY_BYTES {
        warn!(len = value.len(), "ignoring oversized user identity");
        return None;
    }

    Some(value)
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::{identity_from_query, ConnectionSession, ConnectionState, MAX_USER_IDENTITY_BYTES};
    use crate::registry::ConnectionHandle;

    #[test]
    fn identity_is_read_from_user_id_param() {
        assert_eq!(identity_from_query(Some("userId=u1")), Some("u1".into()));
        assert_eq!(identity_from_query(Some("foo=bar&userId=a%20b")), Some("a b".into()));
    }

    #[test]
    fn missing_or_blank_identity_is_absent() {
        assert_eq!(identity_from_query(None), None);
        assert_eq!(identity_from_query(Some("")), None);
        assert_eq!(identity_from_query(Some("userid=u1")), None);
        assert_eq!(identity_from_query(Some("userId=")), None);
        assert_eq!(identity_from_query(Some("userId=%20%20")), None);
    }

    #[test]
    fn oversized_identity_is_absent() {
        let query = format!("userId={}", "x".repeat(MAX_USER_IDENTITY_BYTES + 1));
        assert_eq!(identity_from_query(Some(&query)), None);
    }

    #[test]
    fn state_machine_follows_connection_lifecycle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registered = ConnectionSession::new(ConnectionHandle::new(tx.clone()), Some("u1".into()));
        assert_eq!(registered.state(), ConnectionState::Connecting);
        registered.mark_registered();
        assert_eq!(registered.state(), ConnectionState::Registered);
        registered.mark_unregistered();
        assert_eq!(registered.state(), ConnectionState::Unregistered);
        registered.mark_registered();
        assert_eq!(registered.state(), ConnectionState::Unregistered);

        let mut anonymous = ConnectionSession::new(ConnectionHandle::new(tx), None);
        anonymous.mark_unregistered();
        assert_eq!(anonymous.state(), ConnectionState::Unregistered);
        assert_eq!(anonymous.user_id(), None);
    }
}
