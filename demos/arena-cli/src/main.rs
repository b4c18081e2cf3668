//! Small driver for the arena RPC client: joins a game, walks a few steps,
//! ends the turn and leaves, logging every client event on the way.
//!
//! ```text
//! ARENA_HOST=localhost:8080 ARENA_PLAYER=Ayla cargo run -p arena-cli -- north east
//! ```

use std::time::Duration;

use arena_rpc::prelude::*;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

struct Settings {
    host: String,
    player: String,
    development: bool,
    moves: Vec<Direction>,
}

impl Settings {
    fn from_env(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let moves = args
            .into_iter()
            .map(|arg| arg.parse::<Direction>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            host: std::env::var("ARENA_HOST").unwrap_or_else(|_| "localhost:8080".into()),
            player: std::env::var("ARENA_PLAYER").unwrap_or_else(|_| "player".into()),
            development: parse_flag(std::env::var("ARENA_DEV").ok().as_deref(), true),
            moves: if moves.is_empty() { vec![Direction::North] } else { moves },
        })
    }
}

fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

// ---------------------------------------------------------------------------
// Event logging
// ---------------------------------------------------------------------------

fn log_events(client: &RpcClient) {
    let _ = client.on(EventKind::Connected, |_| tracing::info!("connected"));
    let _ = client.on(EventKind::Disconnected, |event| {
        if let ClientEvent::Disconnected { reason } = event {
            tracing::info!(%reason, "disconnected");
        }
    });
    let _ = client.on(EventKind::Reconnecting, |event| {
        if let ClientEvent::Reconnecting { attempt, delay } = event {
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        }
    });
    let _ = client.on(EventKind::Message, |event| {
        if let ClientEvent::Message(outcome) = event {
            tracing::info!(?outcome, "server notification");
        }
    });
    let _ = client.on(EventKind::Error, |event| {
        if let ClientEvent::Error(err) = event {
            if err.is_security_relevant() {
                tracing::error!(kind = ?err.kind(), error = %err, "security event");
            } else {
                tracing::warn!(kind = ?err.kind(), error = %err, "client error");
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Session script
// ---------------------------------------------------------------------------

async fn play(client: &RpcClient, settings: &Settings) -> Result<(), RpcError> {
    client.connect().await?;
    let game = client.game();

    let joined = game.join_game(&settings.player).await?;
    tracing::info!(%joined, "joined");

    for direction in &settings.moves {
        let result = game.move_player(*direction).await?;
        tracing::info!(?direction, %result, "moved");
    }

    let state = game.get_game_state().await?;
    tracing::info!(%state, "game state");

    game.end_turn().await?;
    game.leave_game().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env(std::env::args().skip(1))?;
    let client = RpcClient::builder()
        .host(&settings.host)
        .development(settings.development)
        .default_timeout(Duration::from_secs(5))
        .build();
    log_events(&client);

    let outcome = play(&client, &settings).await;
    client.destroy();
    outcome?;
    Ok(())
}
