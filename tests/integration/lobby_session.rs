// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send,
    clippy::float_cmp
)]

//! Integration tests for a full lobby session over the relay.
//!
//! Runs a host and two guests through join, roster convergence, game start,
//! in-game messages, and a guest leaving.

use std::sync::Arc;
use std::time::Duration;

use lobbycast::client::{LobbyClient, PlayerId};
use lobbycast::roster::Roster;
use lobbycast_proto::lobby::{LobbyMessage, PlayerInfo};
use lobbycast_relay::relay::{self, RelayState};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

async fn start_relay() -> (String, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (addr.to_string(), state)
}

async fn wait_for_len(state: &RelayState, expected: usize) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if state.registry().len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "registry size is {}, expected {expected}",
        state.registry().len()
    );
}

/// A lobby participant: its connection plus the roster it maintains.
struct Player {
    client: LobbyClient,
    roster: Roster,
}

impl Player {
    /// Connect and wait until the relay has registered the new connection,
    /// so the next player's `join` is guaranteed to reach this one.
    async fn join(address: &str, state: &RelayState, id: &str, as_host: bool) -> Self {
        let expected = state.registry().len() + 1;
        let client = LobbyClient::connect_as(address, PlayerId::new(id), as_host)
            .await
            .expect("connect failed");
        wait_for_len(state, expected).await;
        let roster = Roster::new(client.player_id(), client.is_host());
        Self { client, roster }
    }

    /// Receive one message, apply it to the roster, and send any reply the
    /// roster produces, the way the terminal client does.
    async fn step(&mut self) -> LobbyMessage {
        let msg = tokio::time::timeout(RECV_TIMEOUT, self.client.recv())
            .await
            .expect("recv timed out")
            .expect("connection closed");
        if let Some(reply) = self.roster.apply(&msg) {
            self.client.send(&reply).await.unwrap();
        }
        msg
    }

    fn ids(&self) -> Vec<String> {
        self.roster.players().into_iter().map(|p| p.id).collect()
    }
}

fn info(id: &str, is_host: bool) -> PlayerInfo {
    PlayerInfo {
        id: id.to_string(),
        is_host,
    }
}

// =============================================================================
// Session
// =============================================================================

#[tokio::test]
async fn late_joiner_learns_full_roster_from_host() {
    let (address, state) = start_relay().await;

    let mut host = Player::join(&address, &state, "user_1", true).await;
    let mut guest_a = Player::join(&address, &state, "user_2", false).await;

    // Host sees user_2 join and answers with the player list.
    assert_eq!(
        host.step().await,
        LobbyMessage::Join {
            id: "user_2".to_string(),
            is_host: false,
        }
    );
    assert_eq!(
        guest_a.step().await,
        LobbyMessage::LobbyUpdate {
            players: vec![info("user_1", true), info("user_2", false)],
        }
    );

    let mut guest_b = Player::join(&address, &state, "user_3", false).await;

    assert!(matches!(host.step().await, LobbyMessage::Join { .. }));
    // Guest A sees the join first, then the host's update caused by it.
    assert!(matches!(guest_a.step().await, LobbyMessage::Join { .. }));
    assert!(matches!(
        guest_a.step().await,
        LobbyMessage::LobbyUpdate { .. }
    ));
    assert_eq!(
        guest_b.step().await,
        LobbyMessage::LobbyUpdate {
            players: vec![
                info("user_1", true),
                info("user_2", false),
                info("user_3", false)
            ],
        }
    );

    let expected = ["user_1", "user_2", "user_3"];
    assert_eq!(host.ids(), expected);
    assert_eq!(guest_a.ids(), expected);
    assert_eq!(guest_b.ids(), expected);
}

#[tokio::test]
async fn start_game_and_hits_reach_everyone_else() {
    let (address, state) = start_relay().await;

    let mut host = Player::join(&address, &state, "user_1", true).await;
    let mut guest_a = Player::join(&address, &state, "user_2", false).await;
    host.step().await; // join user_2
    guest_a.step().await; // lobby_update
    let mut guest_b = Player::join(&address, &state, "user_3", false).await;
    host.step().await; // join user_3
    guest_a.step().await; // join user_3
    guest_a.step().await; // lobby_update
    guest_b.step().await; // lobby_update

    host.client.send(&LobbyMessage::StartGame).await.unwrap();
    assert_eq!(guest_a.step().await, LobbyMessage::StartGame);
    assert_eq!(guest_b.step().await, LobbyMessage::StartGame);

    let hit = LobbyMessage::Hit {
        target_id: "enemy_4".to_string(),
        damage: 25.0,
        force_x: -3.5,
        force_y: 8.0,
    };
    guest_a.client.send(&hit).await.unwrap();
    assert_eq!(host.step().await, hit);
    assert_eq!(guest_b.step().await, hit);

    // The sender never hears its own messages.
    let silent = tokio::time::timeout(Duration::from_millis(200), guest_a.client.recv()).await;
    assert!(silent.is_err(), "sender received: {silent:?}");
}

#[tokio::test]
async fn departed_guest_is_removed_from_rosters() {
    let (address, state) = start_relay().await;

    let mut host = Player::join(&address, &state, "user_1", true).await;
    let mut guest_a = Player::join(&address, &state, "user_2", false).await;
    host.step().await;
    guest_a.step().await;
    let mut guest_b = Player::join(&address, &state, "user_3", false).await;
    host.step().await;
    guest_a.step().await;
    guest_a.step().await;
    guest_b.step().await;

    guest_b.client.close().await.unwrap();
    wait_for_len(&state, 2).await;

    // The relay carries no presence events; the host announces the departure.
    let remove = LobbyMessage::Remove {
        id: "user_3".to_string(),
    };
    assert!(host.roster.apply(&remove).is_none());
    host.client.send(&remove).await.unwrap();
    assert_eq!(guest_a.step().await, remove);

    assert_eq!(host.ids(), ["user_1", "user_2"]);
    assert_eq!(guest_a.ids(), ["user_1", "user_2"]);

    // The remaining pair keeps talking.
    let update = LobbyMessage::StateUpdate {
        data: serde_json::json!({"id": "user_2", "x": 120.5, "state": "run"}),
    };
    guest_a.client.send(&update).await.unwrap();
    assert_eq!(host.step().await, update);
}
