// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send,
    clippy::doc_markdown
)]

//! Integration tests for relay fan-out.
//!
//! Validates the broadcast guarantees end to end over real sockets:
//! - A message reaches every other open connection exactly once, never the sender
//! - Registry membership follows connects and disconnects
//! - A closing recipient never blocks delivery to the others
//! - Payloads keep their bytes and their text/binary kind
//! - Messages from one sender arrive in order at each recipient
//! - A recipient that stops reading does not slow down the others

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lobbycast::client::{LobbyClient, PlayerId};
use lobbycast_proto::lobby::LobbyMessage;
use lobbycast_relay::relay::{self, RelayState};
use tokio_tungstenite::tungstenite::Message;

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

/// Start a relay on an OS-assigned port, returning its address and state.
async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (addr, state)
}

async fn connect(addr: std::net::SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("connect failed");
    ws
}

/// Connect `n` raw clients and wait until the relay has registered them all.
async fn connect_many(
    addr: std::net::SocketAddr,
    state: &RelayState,
    n: usize,
) -> Vec<WsClient> {
    let mut clients = Vec::with_capacity(n);
    for _ in 0..n {
        clients.push(connect(addr).await);
    }
    wait_for_len(state, n).await;
    clients
}

/// Poll until the registry holds exactly `expected` connections.
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

/// Receive the next data frame, skipping control frames.
async fn recv_data(ws: &mut WsClient) -> Message {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("recv timed out")
            .expect("stream ended")
            .expect("read error");
        if msg.is_text() || msg.is_binary() {
            return msg;
        }
    }
}

/// Assert that no data frame arrives within a short window.
async fn assert_silent(ws: &mut WsClient) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    if let Ok(Some(Ok(msg))) = result {
        assert!(
            !(msg.is_text() || msg.is_binary()),
            "unexpected message: {msg:?}"
        );
    }
}

// =============================================================================
// Fan-out
// =============================================================================

#[tokio::test]
async fn every_other_connection_receives_exactly_once() {
    for n in 2..=6 {
        let (addr, state) = start_relay().await;
        let mut clients = connect_many(addr, &state, n).await;

        for sender in 0..n {
            let text = format!("from {sender} of {n}");
            clients[sender].send(Message::text(text.clone())).await.unwrap();

            for (i, ws) in clients.iter_mut().enumerate() {
                if i == sender {
                    continue;
                }
                assert_eq!(recv_data(ws).await, Message::text(text.clone()));
            }
        }

        for ws in &mut clients {
            assert_silent(ws).await;
        }
    }
}

#[tokio::test]
async fn three_client_scenario() {
    let (addr, state) = start_relay().await;
    let mut clients = connect_many(addr, &state, 3).await;
    let mut ws_c = clients.pop().unwrap();
    let mut ws_b = clients.pop().unwrap();
    let mut ws_a = clients.pop().unwrap();

    ws_a.send(Message::text("hello")).await.unwrap();
    assert_eq!(recv_data(&mut ws_b).await, Message::text("hello"));
    assert_eq!(recv_data(&mut ws_c).await, Message::text("hello"));
    assert_silent(&mut ws_a).await;
    assert_silent(&mut ws_b).await;
    assert_silent(&mut ws_c).await;

    ws_b.close(None).await.unwrap();
    wait_for_len(&state, 2).await;

    ws_a.send(Message::text("world")).await.unwrap();
    assert_eq!(recv_data(&mut ws_c).await, Message::text("world"));
    assert_silent(&mut ws_a).await;
    assert_eq!(state.registry().len(), 2);
}

#[tokio::test]
async fn dropped_recipient_does_not_block_others() {
    let (addr, state) = start_relay().await;
    let mut clients = connect_many(addr, &state, 3).await;
    let mut ws_c = clients.pop().unwrap();
    let ws_b = clients.pop().unwrap();
    let mut ws_a = clients.pop().unwrap();

    // Tear down B's socket without a close handshake, then send right away.
    drop(ws_b);
    ws_a.send(Message::text("still delivered")).await.unwrap();

    assert_eq!(recv_data(&mut ws_c).await, Message::text("still delivered"));
    wait_for_len(&state, 2).await;

    // A's loop survived: it can keep broadcasting.
    ws_a.send(Message::text("again")).await.unwrap();
    assert_eq!(recv_data(&mut ws_c).await, Message::text("again"));
}

#[tokio::test]
async fn binary_and_text_keep_their_kind() {
    let (addr, state) = start_relay().await;
    let mut clients = connect_many(addr, &state, 3).await;

    clients[0]
        .send(Message::binary(vec![0xDE, 0xAD, 0xBE, 0xEF]))
        .await
        .unwrap();
    clients[0].send(Message::text("DEADBEEF")).await.unwrap();

    for ws in &mut clients[1..] {
        match recv_data(ws).await {
            Message::Binary(data) => assert_eq!(&data[..], &[0xDE, 0xAD, 0xBE, 0xEF]),
            other => panic!("expected binary frame, got {other:?}"),
        }
        match recv_data(ws).await {
            Message::Text(text) => assert_eq!(text.as_str(), "DEADBEEF"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn concurrent_senders_keep_per_sender_order() {
    const SENDERS: usize = 4;
    const PER_SENDER: usize = 25;

    let (addr, state) = start_relay().await;
    let clients = connect_many(addr, &state, SENDERS + 1).await;
    let mut clients = clients.into_iter();
    let mut listener = clients.next().unwrap();

    let mut tasks = Vec::new();
    for (sender, mut ws) in clients.enumerate() {
        tasks.push(tokio::spawn(async move {
            for seq in 0..PER_SENDER {
                ws.send(Message::text(format!("{sender}:{seq}"))).await.unwrap();
            }
            ws
        }));
    }

    let mut next_seq = [0usize; SENDERS];
    for _ in 0..SENDERS * PER_SENDER {
        let msg = recv_data(&mut listener).await;
        let text = msg.into_text().unwrap();
        let (sender, seq) = text.as_str().split_once(':').unwrap();
        let sender: usize = sender.parse().unwrap();
        let seq: usize = seq.parse().unwrap();
        assert_eq!(seq, next_seq[sender], "out of order from sender {sender}");
        next_seq[sender] += 1;
    }
    assert_eq!(next_seq, [PER_SENDER; SENDERS]);

    // Keep the senders connected until the listener has everything.
    for task in tasks {
        drop(task.await.unwrap());
    }
}

#[tokio::test]
async fn stalled_reader_does_not_hold_back_others() {
    const FRAMES: u32 = 200;
    const FRAME_SIZE: usize = 64 * 1024;

    let (addr, state) = start_relay().await;
    let mut clients = connect_many(addr, &state, 3).await;
    let mut ws_c = clients.pop().unwrap();
    // B stays connected but never reads, so its socket buffers fill up.
    let _ws_b = clients.pop().unwrap();
    let mut ws_a = clients.pop().unwrap();

    let sender = tokio::spawn(async move {
        for seq in 0..FRAMES {
            let mut frame = vec![0u8; FRAME_SIZE];
            frame[..4].copy_from_slice(&seq.to_be_bytes());
            ws_a.send(Message::binary(frame)).await.unwrap();
        }
        ws_a
    });

    for seq in 0..FRAMES {
        match recv_data(&mut ws_c).await {
            Message::Binary(data) => {
                assert_eq!(data.len(), FRAME_SIZE);
                assert_eq!(&data[..4], &seq.to_be_bytes());
            }
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    // A's dispatcher is still serving it, and B is still a member.
    let mut ws_a = tokio::time::timeout(RECV_TIMEOUT, sender)
        .await
        .expect("sender stalled")
        .unwrap();
    ws_a.send(Message::text("still here")).await.unwrap();
    assert_eq!(recv_data(&mut ws_c).await, Message::text("still here"));
    assert_eq!(state.registry().len(), 3);
}

#[tokio::test]
async fn reconnect_gets_a_fresh_registration() {
    let (addr, state) = start_relay().await;

    let mut first = connect(addr).await;
    wait_for_len(&state, 1).await;
    let first_id = state.registry().snapshot()[0].id();

    first.close(None).await.unwrap();
    wait_for_len(&state, 0).await;

    let _second = connect(addr).await;
    wait_for_len(&state, 1).await;
    assert_ne!(state.registry().snapshot()[0].id(), first_id);
}

// =============================================================================
// Lobby clients and raw peers share one relay
// =============================================================================

#[tokio::test]
async fn lobby_client_ignores_binary_but_raw_peers_get_it() {
    let (addr, state) = start_relay().await;

    let lobby_client = LobbyClient::connect_as(&addr.to_string(), PlayerId::new("user_1"), false)
        .await
        .unwrap();
    wait_for_len(&state, 1).await;

    let mut raw_a = connect(addr).await;
    let mut raw_b = connect(addr).await;
    wait_for_len(&state, 3).await;

    raw_a.send(Message::binary(vec![1, 2, 3])).await.unwrap();
    raw_a
        .send(Message::text(r#"{"type":"remove","id":"enemy_1"}"#))
        .await
        .unwrap();

    // The raw peer sees both frames unchanged.
    assert_eq!(recv_data(&mut raw_b).await, Message::binary(vec![1, 2, 3]));
    assert_eq!(
        recv_data(&mut raw_b).await,
        Message::text(r#"{"type":"remove","id":"enemy_1"}"#)
    );

    // The lobby client skips the binary frame and decodes the text one.
    let msg = tokio::time::timeout(RECV_TIMEOUT, lobby_client.recv())
        .await
        .expect("recv timed out")
        .unwrap();
    assert_eq!(
        msg,
        LobbyMessage::Remove {
            id: "enemy_1".to_string()
        }
    );
}
