//! Shared protocol definitions for the Duet signaling wire format.

pub mod signal;

pub use signal::{ClientMessage, Payload, ProtocolError, RelayKind, ServerMessage};
