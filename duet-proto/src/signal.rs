//! Signaling wire types for the Duet relay.
//!
//! Clients and the relay exchange one JSON object per WebSocket text frame.
//! Inbound frames are parsed into a [`ClientMessage`]; outbound frames are
//! built as [`ServerMessage`] values and encoded with [`encode`].
//!
//! Session-establishment payloads (`offer`, `answer`, `candidate`, `chat`)
//! are never interpreted: they are captured as raw JSON text and written
//! back out byte-for-byte when relayed.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Opaque payload carried by relayed messages.
pub type Payload = Box<RawValue>;

/// Errors produced while parsing or encoding signaling frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not a JSON object of the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The `type` field names a message the relay does not handle.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// A `join` arrived without a usable `roomId`.
    #[error("join requires a non-empty roomId")]
    MissingRoomId,

    /// An outbound message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Message types relayed verbatim between the two occupants of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayKind {
    /// Session description offer.
    Offer,
    /// Session description answer.
    Answer,
    /// Connectivity candidate.
    Candidate,
    /// Fallback text chat.
    Chat,
}

impl RelayKind {
    /// Wire name of this kind, as used in the `type` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::Chat => "chat",
        }
    }

    fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "candidate" => Some(Self::Candidate),
            "chat" => Some(Self::Chat),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified client-to-relay message.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Join (or create) the room with the given key.
    Join {
        /// Caller-chosen room key.
        room_id: String,
    },

    /// Leave the current room without closing the connection.
    Leave,

    /// Forward session-establishment or chat data to the peer.
    Relay {
        /// Which relayed message this is.
        kind: RelayKind,
        /// Opaque payload, absent if the client sent none. An explicit
        /// `null` is kept.
        payload: Option<Payload>,
    },
}

/// Raw inbound envelope before classification.
///
/// Parsed as a plain struct (rather than a tagged enum) so that `payload`
/// can be borrowed as unparsed JSON. `roomId` only matters for `join`, so
/// any JSON value is accepted here and checked during classification.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "roomId", default)]
    room_id: Option<Payload>,
    #[serde(default, deserialize_with = "present")]
    payload: Option<Payload>,
}

/// Captures a field that is present, `null` included, as raw JSON.
fn present<'de, D>(deserializer: D) -> Result<Option<Payload>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Payload::deserialize(deserializer).map(Some)
}

/// Parses and classifies one inbound text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the text is not a JSON object with
/// a string `type`, [`ProtocolError::MissingRoomId`] for a `join` without a
/// non-empty `roomId`, or [`ProtocolError::UnknownType`] for any other type.
pub fn parse(text: &str) -> Result<ClientMessage, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;

    match envelope.kind.as_str() {
        "join" => match envelope
            .room_id
            .and_then(|raw| serde_json::from_str::<String>(raw.get()).ok())
        {
            Some(room_id) if !room_id.is_empty() => Ok(ClientMessage::Join { room_id }),
            _ => Err(ProtocolError::MissingRoomId),
        },
        "leave" => Ok(ClientMessage::Leave),
        other => RelayKind::from_wire(other).map_or_else(
            || Err(ProtocolError::UnknownType(other.to_string())),
            |kind| {
                Ok(ClientMessage::Relay {
                    kind,
                    payload: envelope.payload,
                })
            },
        ),
    }
}

/// Messages sent from the relay to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join succeeded.
    Joined {
        /// The room that was joined.
        #[serde(rename = "roomId")]
        room_id: String,
        /// Identifier assigned to the joining connection.
        id: String,
        /// Number of other occupants (0 or 1).
        peers: usize,
    },

    /// Join rejected because the room already holds two members.
    RoomFull {
        /// The room that was full.
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Another participant joined the recipient's room.
    PeerJoined {
        /// Identifier of the new participant.
        from: String,
    },

    /// The recipient's peer left or disconnected.
    PeerLeft {
        /// Identifier of the departed participant.
        id: String,
    },

    /// Relayed session description offer.
    Offer {
        /// Sender identifier.
        from: String,
        /// Untouched payload from the sender.
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Payload>,
    },

    /// Relayed session description answer.
    Answer {
        /// Sender identifier.
        from: String,
        /// Untouched payload from the sender.
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Payload>,
    },

    /// Relayed connectivity candidate.
    Candidate {
        /// Sender identifier.
        from: String,
        /// Untouched payload from the sender.
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Payload>,
    },

    /// Relayed chat message.
    Chat {
        /// Sender identifier.
        from: String,
        /// Untouched payload from the sender.
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Payload>,
    },
}

impl ServerMessage {
    /// Builds the relayed form of a client message, tagged with its sender.
    #[must_use]
    pub fn relayed(kind: RelayKind, from: impl Into<String>, payload: Option<Payload>) -> Self {
        let from = from.into();
        match kind {
            RelayKind::Offer => Self::Offer { from, payload },
            RelayKind::Answer => Self::Answer { from, payload },
            RelayKind::Candidate => Self::Candidate { from, payload },
            RelayKind::Chat => Self::Chat { from, payload },
        }
    }

    /// Wire name of this message's `type` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::RoomFull { .. } => "room_full",
            Self::PeerJoined { .. } => "peer_joined",
            Self::PeerLeft { .. } => "peer_left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Chat { .. } => "chat",
        }
    }
}

/// Encodes a [`ServerMessage`] into a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}
