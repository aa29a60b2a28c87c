//! Lobby roster kept by each client.
//!
//! Every client learns about other players from the `join` and
//! `lobby_update` messages broadcast through the relay. The host answers each
//! `join` with a `lobby_update` listing everyone, so late joiners also learn
//! about players that connected before them.

use std::collections::BTreeMap;

use lobbycast_proto::lobby::{LobbyMessage, PlayerInfo};

use crate::client::PlayerId;

/// The players this client knows about, itself included.
#[derive(Debug, Clone)]
pub struct Roster {
    local_id: String,
    local_is_host: bool,
    /// Player id → host flag.
    players: BTreeMap<String, bool>,
}

impl Roster {
    /// Creates a roster containing only the local player.
    #[must_use]
    pub fn new(local_id: &PlayerId, is_host: bool) -> Self {
        let mut players = BTreeMap::new();
        players.insert(local_id.as_str().to_string(), is_host);
        Self {
            local_id: local_id.as_str().to_string(),
            local_is_host: is_host,
            players,
        }
    }

    /// Applies a message received from another player.
    ///
    /// Returns a reply to broadcast, if any: when the local player is the
    /// host, every `join` is answered with the full player list.
    pub fn apply(&mut self, msg: &LobbyMessage) -> Option<LobbyMessage> {
        match msg {
            LobbyMessage::Join { id, is_host } => {
                self.insert(id, *is_host);
                self.local_is_host.then(|| LobbyMessage::LobbyUpdate {
                    players: self.players(),
                })
            }
            LobbyMessage::LobbyUpdate { players } => {
                for player in players {
                    self.insert(&player.id, player.is_host);
                }
                None
            }
            LobbyMessage::Remove { id } => {
                self.remove(id);
                None
            }
            _ => None,
        }
    }

    /// Adds a player unless it is already known or is the local player.
    ///
    /// Returns whether the player was added.
    pub fn insert(&mut self, id: &str, is_host: bool) -> bool {
        if id == self.local_id || self.players.contains_key(id) {
            return false;
        }
        self.players.insert(id.to_string(), is_host);
        true
    }

    /// Removes a remote player. The local player is never removed.
    pub fn remove(&mut self, id: &str) -> bool {
        id != self.local_id && self.players.remove(id).is_some()
    }

    /// Whether the player is in the roster.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.players.contains_key(id)
    }

    /// Number of players, the local one included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether the roster is empty. It never is: it holds the local player.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// All players, hosts first, then by id.
    #[must_use]
    pub fn players(&self) -> Vec<PlayerInfo> {
        let mut players: Vec<PlayerInfo> = self
            .players
            .iter()
            .map(|(id, is_host)| PlayerInfo {
                id: id.clone(),
                is_host: *is_host,
            })
            .collect();
        players.sort_by(|a, b| b.is_host.cmp(&a.is_host).then_with(|| a.id.cmp(&b.id)));
        players
    }
}
