//! Connection registry: room keys mapped to their current occupants.
//!
//! Rooms are created lazily on the first join to a key and removed as soon
//! as their last member leaves. Every mutation takes the registry lock, so
//! two simultaneous joins to the same key are serialized and the
//! two-member cap cannot be exceeded.
//!
//! Notifications (`joined`, `room_full`, `peer_joined`, `peer_left`) are
//! pushed into the members' outboxes while the lock is held. Outboxes are
//! unbounded channels, so this never blocks, and each occupant sees
//! membership changes in the order they were applied.

use std::collections::HashMap;

use duet_proto::ServerMessage;
use parking_lot::Mutex;

use crate::connection::{ConnectionId, Outbox};

/// Maximum number of members a room may hold.
pub const ROOM_CAPACITY: usize = 2;

/// One occupant of a room.
#[derive(Debug)]
struct Member {
    id: ConnectionId,
    outbox: Outbox,
}

impl Member {
    /// Delivers a message; a closed outbox is ignored.
    fn send(&self, msg: ServerMessage) {
        let _ = self.outbox.send(msg);
    }
}

/// A room and its members, in join order.
#[derive(Debug, Default)]
struct Room {
    members: Vec<Member>,
}

/// Result of a join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection is now a member; `peers` counts the other occupants.
    Joined {
        /// Number of members present before this join.
        peers: usize,
    },
    /// The connection was already a member of this room.
    AlreadyMember {
        /// Number of other occupants.
        peers: usize,
    },
    /// The room was at capacity; nothing changed.
    Full,
}

/// Shared room table.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a connection to a room, creating the room if needed.
    ///
    /// `current` is the room the connection holds now, if any. On success the
    /// connection is first removed from `current` (its old peer receives
    /// `peer_left`), then the joiner receives `joined` and the existing
    /// occupant of the new room, if any, receives `peer_joined`. A full room
    /// answers `room_full` to the joiner and nothing else changes: the
    /// connection keeps its current room.
    pub fn join(
        &self,
        room_id: &str,
        id: &ConnectionId,
        outbox: &Outbox,
        current: Option<&str>,
    ) -> JoinOutcome {
        let mut rooms = self.rooms.lock();

        if let Some(room) = rooms.get(room_id) {
            if room.members.iter().any(|m| &m.id == id) {
                let peers = room.members.len() - 1;
                let _ = outbox.send(ServerMessage::Joined {
                    room_id: room_id.to_string(),
                    id: id.to_string(),
                    peers,
                });
                return JoinOutcome::AlreadyMember { peers };
            }
            if room.members.len() >= ROOM_CAPACITY {
                let _ = outbox.send(ServerMessage::RoomFull {
                    room_id: room_id.to_string(),
                });
                tracing::warn!(conn_id = %id, room_id = %room_id, "join rejected, room full");
                return JoinOutcome::Full;
            }
        }

        if let Some(old) = current.filter(|old| *old != room_id)
            && remove_member(&mut rooms, old, id)
        {
            tracing::info!(conn_id = %id, room_id = %old, "left room");
        }

        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            tracing::info!(room_id = %room_id, "room created");
            Room::default()
        });
        let peers = room.members.len();

        let _ = outbox.send(ServerMessage::Joined {
            room_id: room_id.to_string(),
            id: id.to_string(),
            peers,
        });
        for peer in &room.members {
            peer.send(ServerMessage::PeerJoined {
                from: id.to_string(),
            });
        }

        room.members.push(Member {
            id: id.clone(),
            outbox: outbox.clone(),
        });
        drop(rooms);

        tracing::info!(conn_id = %id, room_id = %room_id, peers, "joined room");
        JoinOutcome::Joined { peers }
    }

    /// Removes a connection from a room.
    ///
    /// The remaining occupant, if any, receives `peer_left`. An emptied room
    /// is deleted. Returns `false` if the connection was not a member.
    pub fn leave(&self, room_id: &str, id: &ConnectionId) -> bool {
        let mut rooms = self.rooms.lock();
        let removed = remove_member(&mut rooms, room_id, id);
        drop(rooms);

        if removed {
            tracing::info!(conn_id = %id, room_id = %room_id, "left room");
        }
        removed
    }

    /// Delivers a message to every member of a room except the sender.
    ///
    /// Returns how many members it was handed to (0 when the sender is alone).
    pub fn relay(&self, room_id: &str, from: &ConnectionId, msg: &ServerMessage) -> usize {
        let rooms = self.rooms.lock();
        let Some(room) = rooms.get(room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for peer in room.members.iter().filter(|m| &m.id != from) {
            peer.send(msg.clone());
            delivered += 1;
        }
        delivered
    }

    /// Number of members currently in a room (0 if it does not exist).
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms
            .lock()
            .get(room_id)
            .map_or(0, |room| room.members.len())
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }
}

/// Takes `id` out of `room_id`, telling the remaining occupant and deleting
/// the room once empty. Caller holds the registry lock.
fn remove_member(rooms: &mut HashMap<String, Room>, room_id: &str, id: &ConnectionId) -> bool {
    let Some(room) = rooms.get_mut(room_id) else {
        return false;
    };
    let Some(pos) = room.members.iter().position(|m| &m.id == id) else {
        return false;
    };
    room.members.remove(pos);

    for peer in &room.members {
        peer.send(ServerMessage::PeerLeft { id: id.to_string() });
    }

    if room.members.is_empty() {
        rooms.remove(room_id);
        tracing::info!(room_id = %room_id, "room deleted");
    }
    true
}
