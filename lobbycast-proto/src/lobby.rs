//! Lobby messages exchanged between game clients through the relay.
//!
//! Messages are JSON objects carried in WebSocket text frames, tagged by a
//! snake_case `"type"` field with camelCase fields, for example
//! `{"type":"join","id":"user_42","isHost":true}`.

use serde::{Deserialize, Serialize};

/// A player as listed in a [`LobbyMessage::LobbyUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    /// Player identifier, e.g. `user_4821`.
    pub id: String,
    /// Whether this player hosts the lobby.
    pub is_host: bool,
}

/// Messages game clients broadcast to each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LobbyMessage {
    /// A player announces itself right after connecting.
    Join {
        /// The joining player's identifier.
        id: String,
        /// Whether the joining player hosts the lobby.
        is_host: bool,
    },

    /// The host publishes the full player list.
    LobbyUpdate {
        /// Every player currently in the lobby.
        players: Vec<PlayerInfo>,
    },

    /// The host starts the match.
    StartGame,

    /// Free-form entity state from one client.
    StateUpdate {
        /// Game-defined state, passed through as-is.
        data: serde_json::Value,
    },

    /// One client hit an entity owned by another.
    Hit {
        /// Entity that was hit.
        target_id: String,
        /// Damage dealt.
        damage: f64,
        /// Horizontal knockback.
        force_x: f64,
        /// Vertical knockback.
        force_y: f64,
    },

    /// The host spawned an enemy.
    SpawnEnemy {
        /// Enemy identifier.
        id: String,
        /// Player that simulates the enemy.
        owner_id: String,
        /// Spawn position on the x axis.
        x: f64,
        /// Spawn position on the z axis.
        z: f64,
    },

    /// An entity was removed from the world.
    Remove {
        /// Entity identifier.
        id: String,
    },
}

impl LobbyMessage {
    /// The wire name of this message's `"type"` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::LobbyUpdate { .. } => "lobby_update",
            Self::StartGame => "start_game",
            Self::StateUpdate { .. } => "state_update",
            Self::Hit { .. } => "hit",
            Self::SpawnEnemy { .. } => "spawn_enemy",
            Self::Remove { .. } => "remove",
        }
    }
}

/// Errors from encoding or decoding lobby messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The message could not be serialized.
    #[error("lobby encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// The text is not a valid lobby message.
    #[error("lobby decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encodes a [`LobbyMessage`] as JSON text.
///
/// # Errors
///
/// Returns [`ProtoError::Encode`] if serialization fails.
pub fn encode(msg: &LobbyMessage) -> Result<String, ProtoError> {
    serde_json::to_string(msg).map_err(ProtoError::Encode)
}

/// Decodes a [`LobbyMessage`] from JSON text.
///
/// Unknown fields are ignored; unknown `"type"` tags are an error.
///
/// # Errors
///
/// Returns [`ProtoError::Decode`] if `text` is not a lobby message.
pub fn decode(text: &str) -> Result<LobbyMessage, ProtoError> {
    serde_json::from_str(text).map_err(ProtoError::Decode)
}
