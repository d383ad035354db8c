//! Relay server core: shared state, WebSocket handler, and server startup.
//!
//! Each accepted WebSocket gets one task that owns its [`Connection`] and
//! processes inbound frames in order, plus a writer task that drains the
//! connection's outbox onto the socket. Rooms live in the shared
//! [`RoomRegistry`].

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use duet_proto::ServerMessage;
use duet_proto::signal;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::dispatch::dispatch;
use crate::registry::RoomRegistry;

/// Default maximum accepted frame size in bytes (64 KB).
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Shared relay server state.
pub struct RelayState {
    /// Room table shared by all connections.
    pub registry: RoomRegistry,
    /// Frames longer than this are dropped.
    max_frame_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with an empty registry and the default frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates relay state with a custom frame size limit.
    #[must_use]
    pub fn with_config(max_frame_size: usize) -> Self {
        Self {
            registry: RoomRegistry::new(),
            max_frame_size,
        }
    }
}

/// Serves one upgraded WebSocket until either side closes it.
///
/// The connection lifecycle:
/// 1. Assign an identifier; the connection starts unjoined.
/// 2. Spawn a writer task draining the outbox onto the socket.
/// 3. Dispatch inbound frames in order until the transport closes.
/// 4. Close the connection, which leaves any room it held.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut conn = Connection::new(tx);
    let conn_id = conn.id().clone();

    tracing::info!(conn_id = %conn_id, "connection opened");

    let writer_conn_id = conn_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match signal::encode(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(conn_id = %writer_conn_id, error = %e, "failed to encode outbound message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(conn_id = %writer_conn_id, "WebSocket write failed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    dispatch(&mut conn, &state.registry, text.as_str(), state.max_frame_size);
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => dispatch(&mut conn, &state.registry, text, state.max_frame_size),
                    Err(_) => tracing::warn!(conn_id = %conn_id, "dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) => {
                    tracing::info!(conn_id = %conn_id, "received close frame");
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by axum.
                }
                Some(Err(e)) => {
                    tracing::warn!(conn_id = %conn_id, error = %e, "WebSocket read failed");
                    break;
                }
                None => break,
            },
            _ = &mut write_task => break,
        }
    }

    write_task.abort();
    conn.close(&state.registry);
    tracing::info!(conn_id = %conn_id, "connection closed");
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// The WebSocket endpoint is mounted at both `/` and `/ws`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/", axum::routing::get(ws_handler))
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
