//! Lobbycast relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts WebSocket connections, keeps a registry of the live
//! ones, and broadcasts every text or binary message a client sends to all
//! other connected clients, unchanged.

pub mod config;
pub mod connection;
pub mod registry;
pub mod relay;
pub mod shutdown;
