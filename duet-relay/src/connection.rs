//! Per-connection state record and lifecycle transitions.
//!
//! A [`Connection`] is owned by the task serving its WebSocket. Its room
//! membership is a typed field that only a successful join sets; leaving
//! (explicitly or by closing) always goes back through the registry so the
//! remaining peer is told exactly once.

use std::fmt;

use duet_proto::{Payload, RelayKind, ServerMessage};
use tokio::sync::mpsc;

use crate::registry::{JoinOutcome, RoomRegistry};

/// Sending half of a connection's outbound message queue.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Opaque identifier assigned to a connection when it is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generates a fresh, time-ordered identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().simple().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open, not in any room.
    Unjoined,
    /// Open and a member of `room_id`.
    Joined {
        /// Key of the room held.
        room_id: String,
    },
    /// Transport closed; the connection holds no room.
    Closed,
}

/// One participant's connection.
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    outbox: Outbox,
}

impl Connection {
    /// Creates an unjoined connection that delivers to `outbox`.
    #[must_use]
    pub fn new(outbox: Outbox) -> Self {
        Self {
            id: ConnectionId::generate(),
            state: ConnectionState::Unjoined,
            outbox,
        }
    }

    /// This connection's identifier.
    #[must_use]
    pub const fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Room currently held, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Joined { room_id } => Some(room_id.as_str()),
            ConnectionState::Unjoined | ConnectionState::Closed => None,
        }
    }

    /// Attempts to join `room_id`.
    ///
    /// A connection already in another room moves to the new one in a single
    /// registry step. A rejected join changes nothing: the connection keeps
    /// whatever room it held.
    pub fn join(&mut self, registry: &RoomRegistry, room_id: &str) -> JoinOutcome {
        let outcome = registry.join(room_id, &self.id, &self.outbox, self.room_id());
        if let JoinOutcome::Joined { .. } = outcome {
            self.state = ConnectionState::Joined {
                room_id: room_id.to_string(),
            };
        }
        outcome
    }

    /// Leaves the current room, keeping the connection open.
    ///
    /// Returns `false` if there was no room to leave.
    pub fn leave(&mut self, registry: &RoomRegistry) -> bool {
        let ConnectionState::Joined { room_id } =
            std::mem::replace(&mut self.state, ConnectionState::Unjoined)
        else {
            return false;
        };
        registry.leave(&room_id, &self.id)
    }

    /// Forwards a relayed message to the other member of the current room.
    ///
    /// Messages from an unjoined connection are dropped. Returns the number
    /// of recipients.
    pub fn relay(
        &self,
        registry: &RoomRegistry,
        kind: RelayKind,
        payload: Option<Payload>,
    ) -> usize {
        let Some(room_id) = self.room_id() else {
            tracing::debug!(conn_id = %self.id, kind = %kind, "dropping message from unjoined connection");
            return 0;
        };

        let msg = ServerMessage::relayed(kind, self.id.to_string(), payload);
        let delivered = registry.relay(room_id, &self.id, &msg);
        tracing::debug!(conn_id = %self.id, room_id = %room_id, kind = %kind, delivered, "relayed message");
        delivered
    }

    /// Marks the transport closed, leaving any room held.
    pub fn close(&mut self, registry: &RoomRegistry) {
        self.leave(registry);
        self.state = ConnectionState::Closed;
    }
}
