//! Inbound frame classification and routing.
//!
//! Bad frames are logged and dropped; they never close the connection or
//! touch room membership.

use duet_proto::signal::{self, ClientMessage};

use crate::connection::Connection;
use crate::registry::RoomRegistry;

/// Handles one inbound text frame from `conn`.
pub fn dispatch(conn: &mut Connection, registry: &RoomRegistry, text: &str, max_frame_size: usize) {
    if text.len() > max_frame_size {
        tracing::warn!(
            conn_id = %conn.id(),
            size = text.len(),
            max = max_frame_size,
            "dropping oversized frame"
        );
        return;
    }

    let msg = match signal::parse(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(conn_id = %conn.id(), error = %e, "dropping unreadable frame");
            return;
        }
    };

    match msg {
        ClientMessage::Join { room_id } => {
            conn.join(registry, &room_id);
        }
        ClientMessage::Leave => {
            if !conn.leave(registry) {
                tracing::debug!(conn_id = %conn.id(), "leave from unjoined connection ignored");
            }
        }
        ClientMessage::Relay { kind, payload } => {
            conn.relay(registry, kind, payload);
        }
    }
}
