//! # Message Relay
//!
//! The protocol state machine behind the socket. It owns the catalogue, the
//! connection registry and the round timers, and turns each inbound frame
//! into registry/timer updates plus outbound messages.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Connected --getPosition--> PositionAssigned --getPosition/reveal--> PositionAssigned
//!     |                             |
//!     +----------- close -----------+--> Closed (unregistered)
//! ```
//!
//! ## Failure Policy
//!
//! - Missing/unknown/disabled location: logged and ignored, no reply.
//! - Unknown `type`, unparseable text or a binary frame: the connection is closed.
//! - A client whose outbound queue is full is dropped from the registry.
//! - Nothing a client sends can take the server down.
//!
//! The relay itself is synchronous; the transport serializes access to it,
//! so every call runs to completion before the next one starts.

use log::{debug, info, warn};

use crate::common::config::RoundConfig;
use crate::common::messages::{ClientMessage, ServerMessage};
use crate::server::catalogue::Catalogue;
use crate::server::registry::{ConnectionRegistry, Delivery, Outbox, Session, SessionId};
use crate::server::timer::RoundTimers;

/// What the transport should do with a connection after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Close,
}

/// Protocol state for all connections.
#[derive(Debug)]
pub struct Relay {
    catalogue: Catalogue,
    registry: ConnectionRegistry,
    timers: RoundTimers,
}

impl Relay {
    pub fn new(catalogue: Catalogue, rounds: &RoundConfig) -> Self {
        Self {
            catalogue,
            registry: ConnectionRegistry::new(),
            timers: RoundTimers::new(rounds),
        }
    }

    /// Register a newly accepted connection.
    pub fn connect(&mut self, remote: &str, outbox: Outbox) -> SessionId {
        let id = self.registry.register(remote, outbox);
        info!(
            "🔗 Connection from {} accepted (current connections: {})",
            remote,
            self.registry.len()
        );
        id
    }

    /// Forget a closed connection. Nothing is sent to it afterwards.
    pub fn disconnect(&mut self, id: &SessionId) {
        if let Some(session) = self.registry.unregister(id) {
            info!(
                "🔌 Connection to {} closed (current connections: {})",
                session.remote,
                self.registry.len()
            );
        }
    }

    /// Handle a text frame from a connection.
    pub fn handle_text(&mut self, id: &SessionId, text: &str, now: i64) -> Disposition {
        debug!("📨 Received from {}: {}", self.remote(id), text);

        match ClientMessage::from_text(text) {
            Ok(message) => self.handle_message(id, message, now),
            Err(e) => {
                warn!(
                    "⚠️  Malformed payload ({}); dropping connection to {}",
                    e,
                    self.remote(id)
                );
                Disposition::Close
            }
        }
    }

    /// Handle a binary frame. The protocol is text only.
    pub fn handle_binary(&mut self, id: &SessionId) -> Disposition {
        warn!(
            "⚠️  Non-text frame received; dropping connection to {}",
            self.remote(id)
        );
        Disposition::Close
    }

    /// Dispatch a parsed request.
    pub fn handle_message(&mut self, id: &SessionId, message: ClientMessage, now: i64) -> Disposition {
        match message {
            ClientMessage::GetPosition {
                location_id,
                silent,
                solo,
            } => {
                self.get_position(
                    id,
                    location_id.as_deref(),
                    silent.unwrap_or(false),
                    solo.unwrap_or(false),
                    now,
                );
                Disposition::Continue
            }
            ClientMessage::Reveal => {
                self.reveal(id);
                Disposition::Continue
            }
            ClientMessage::Unknown => {
                warn!(
                    "⚠️  Unrecognised payload type; dropping connection to {}",
                    self.remote(id)
                );
                Disposition::Close
            }
        }
    }

    /// Send a connection the map position of a location and remember it.
    ///
    /// Unresolvable requests produce no reply and leave the session untouched.
    pub fn get_position(
        &mut self,
        id: &SessionId,
        location_id: Option<&str>,
        silent: bool,
        solo: bool,
        now: i64,
    ) {
        let remote = self.remote(id);

        let Some(location_id) = location_id.filter(|l| !l.is_empty()) else {
            warn!(
                "⚠️  Ignoring request from {} for non-specified location",
                remote
            );
            return;
        };

        let location = match self.catalogue.lookup(location_id) {
            Ok(location) => location,
            Err(e) => {
                warn!("⚠️  Ignoring request from {}: {}", remote, e);
                return;
            }
        };

        let Some(position) = location.position() else {
            warn!(
                "⚠️  Ignoring request from {}: location \"{}\" has no position",
                remote, location_id
            );
            return;
        };

        let Some(session) = self.registry.get(id) else {
            return;
        };

        let start_round_at = if silent {
            None
        } else {
            Some(self.timers.request_round_start(&location.name, now))
        };

        info!(
            "📍 Providing map position for location \"{}\" to {}",
            location_id, remote
        );
        let delivered = deliver(
            session,
            ServerMessage::Position {
                start_round_at,
                position,
                allow_movement: location.allows_movement(),
            },
        );
        if !delivered {
            self.disconnect(id);
            return;
        }

        info!(
            "💾 Remembering location \"{}\" for {}",
            location_id, remote
        );
        self.registry.set_requested_location(id, location_id, solo);
    }

    /// Reveal each target's own location.
    ///
    /// A solo requester reveals only to itself; anyone else reveals to every
    /// non-solo connection.
    pub fn reveal(&mut self, id: &SessionId) {
        let solo = self.registry.get(id).map(|s| s.solo).unwrap_or(false);

        let targets: Vec<_> = if solo {
            self.registry.get(id).into_iter().collect()
        } else {
            self.registry.non_solo_sessions().collect()
        };

        info!(
            "🎉 Sending solution to {}{} {}",
            targets.len(),
            if solo { " solo" } else { "" },
            if targets.len() == 1 { "client" } else { "clients" }
        );

        let mut overflowed = Vec::new();
        for session in targets {
            let Some(location_id) = session.location_id.as_deref() else {
                warn!("⚠️  No location remembered for {}", session.remote);
                continue;
            };

            match self.catalogue.lookup(location_id) {
                Ok(location) => {
                    let delivered = deliver(
                        session,
                        ServerMessage::Reveal {
                            name: location.name.clone(),
                            flag: location.flag.clone(),
                            clues: location.clues.clone(),
                            bonus: location.bonus.clone(),
                        },
                    );
                    if !delivered {
                        overflowed.push(session.id);
                    }
                }
                Err(e) => warn!("⚠️  Couldn't reveal to {}: {}", session.remote, e),
            }
        }

        for id in overflowed {
            self.disconnect(&id);
        }
    }

    /// Purge expired round timers.
    pub fn sweep(&mut self, now: i64) -> usize {
        let removed = self.timers.sweep(now);
        if removed > 0 {
            debug!("🧹 Purged {} expired round timer(s)", removed);
        }
        removed
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn remote(&self, id: &SessionId) -> String {
        self.registry
            .get(id)
            .map(|s| s.remote.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

/// Queue a message, logging undeliverable ones.
///
/// Returns `false` when the session's queue is full and it should be dropped.
fn deliver(session: &Session, message: ServerMessage) -> bool {
    match session.send(message) {
        Delivery::Queued => true,
        Delivery::Closed => {
            debug!("🔌 Writer for {} already closed; message dropped", session.remote);
            true
        }
        Delivery::Full => {
            warn!(
                "⚠️  Outbound queue full for {}; dropping connection",
                session.remote
            );
            false
        }
    }
}
