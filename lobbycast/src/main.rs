//! Lobbycast terminal client.
//!
//! Joins a lobby through a relay, prints every lobby message received from
//! other players as one JSON line on stdout, and broadcasts each line typed
//! on stdin. Lines that are lobby messages are sent as-is; anything else is
//! wrapped in a `state_update`.
//!
//! # Usage
//!
//! ```bash
//! # Host a lobby on a local relay
//! cargo run --bin lobbycast -- --host
//!
//! # Join a remote lobby
//! cargo run --bin lobbycast -- --address 192.168.1.20:8080
//! ```

use clap::Parser;
use lobbycast::client::{LobbyClient, PlayerId};
use lobbycast::roster::Roster;
use lobbycast_proto::lobby::{self, LobbyMessage};
use tokio::io::AsyncBufReadExt;

/// CLI arguments for the lobby client.
#[derive(clap::Parser, Debug)]
#[command(version, about = "Lobbycast lobby client")]
struct Args {
    /// Relay address (`host:port` or a ws:// URL).
    #[arg(short, long, default_value = "localhost:8080")]
    address: String,

    /// Join as the lobby host.
    #[arg(long)]
    host: bool,

    /// Player id to announce (default: random `user_<n>`).
    #[arg(long)]
    id: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", env = "LOBBYCAST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logs go to stderr so stdout only carries lobby messages.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let player_id = args.id.map_or_else(PlayerId::random, PlayerId::new);
    let client = match LobbyClient::connect_as(&args.address, player_id, args.host).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to connect to {}: {e}", args.address);
            std::process::exit(1);
        }
    };
    eprintln!(
        "Joined lobby at {} as {}{}",
        client.relay_url(),
        client.player_id(),
        if client.is_host() { " (host)" } else { "" }
    );

    let mut roster = Roster::new(client.player_id(), client.is_host());
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let Some(msg) = message_from_line(&line) else {
                        continue;
                    };
                    if let Err(e) = client.send(&msg).await {
                        eprintln!("Send failed: {e}");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read stdin");
                    break;
                }
            },
            received = client.recv() => match received {
                Ok(msg) => {
                    if let Some(reply) = roster.apply(&msg) {
                        if let Err(e) = client.send(&reply).await {
                            tracing::warn!(error = %e, "failed to send lobby update");
                        }
                    }
                    match lobby::encode(&msg) {
                        Ok(text) => println!("{text}"),
                        Err(e) => tracing::warn!(error = %e, "failed to print message"),
                    }
                }
                Err(_) => {
                    eprintln!("Relay connection closed");
                    break;
                }
            },
            _ = &mut ctrl_c => break,
        }
    }

    if client.is_connected() {
        if let Err(e) = client.close().await {
            tracing::debug!(error = %e, "close failed");
        }
    }
}

/// Turns a typed line into the message to broadcast.
///
/// Blank lines are skipped. A line that is a lobby message is sent as
/// itself; anything else travels as a `state_update` carrying the text.
fn message_from_line(line: &str) -> Option<LobbyMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(lobby::decode(line).unwrap_or_else(|_| LobbyMessage::StateUpdate {
        data: serde_json::Value::String(line.to_string()),
    }))
}
