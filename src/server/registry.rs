//! # Connection Registry
//!
//! Owns the per-connection session state for every open socket: the outbound
//! queue used to reach the browser, the last location it asked for, and
//! whether it plays solo. Reveal targets are computed from here.

use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::common::messages::ServerMessage;

/// Opaque handle for a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending half of a connection's bounded outbound queue.
pub type Outbox = mpsc::Sender<ServerMessage>;

/// Result of queueing a message for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The client is not draining its queue
    Full,
    /// The connection's writer has already gone away
    Closed,
}

/// State kept for one open connection.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Peer address, for log lines
    pub remote: String,
    /// Last location requested on this connection
    pub location_id: Option<String>,
    /// Solo sessions reveal only to themselves
    pub solo: bool,
    outbox: Outbox,
}

impl Session {
    /// Queue a message for this connection without waiting.
    pub fn send(&self, message: ServerMessage) -> Delivery {
        match self.outbox.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// All currently open sessions.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session with no location yet.
    pub fn register(&mut self, remote: impl Into<String>, outbox: Outbox) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(
            id,
            Session {
                id,
                remote: remote.into(),
                location_id: None,
                solo: false,
                outbox,
            },
        );
        id
    }

    /// Record the location a session is now playing, replacing any previous one.
    ///
    /// Returns `false` if the session is not registered.
    pub fn set_requested_location(&mut self, id: &SessionId, location_id: &str, solo: bool) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.location_id = Some(location_id.to_string());
                session.solo = solo;
                true
            }
            None => false,
        }
    }

    /// Remove a session. Unknown ids are ignored.
    ///
    /// Dropping the session drops its outbox, which ends the connection's
    /// writer once queued messages are flushed.
    pub fn unregister(&mut self, id: &SessionId) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn all_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn solo_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|s| s.solo)
    }

    pub fn non_solo_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|s| !s.solo)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
