//! Lobbycast client library.
//!
//! Connects a game client to a Lobbycast relay, announces the player, and
//! exchanges lobby messages with every other player through the relay.

pub mod client;
pub mod roster;
