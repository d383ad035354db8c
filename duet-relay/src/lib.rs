//! Duet relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts WebSocket connections, pairs them into two-member
//! rooms, and forwards signaling messages between room occupants.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod registry;
pub mod relay;
