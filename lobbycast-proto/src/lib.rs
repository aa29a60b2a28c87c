//! Shared message definitions for Lobbycast lobbies.
//!
//! The relay forwards frames without reading them; these types describe what
//! game clients put inside those frames.

pub mod lobby;
