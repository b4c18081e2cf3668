//! Typed wrappers for the game server's methods.
//!
//! [`GameApi`] turns each method into a Rust function with a serde param
//! struct, and keeps the session in step with the game: `joinGame` stores
//! the token it returns and `leaveGame` clears it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use arena_rpc_protocol::ProtocolError;

use crate::{RpcClient, RpcError};

/// Method names as they appear on the wire.
pub mod methods {
    pub const JOIN_GAME: &str = "joinGame";
    pub const LEAVE_GAME: &str = "leaveGame";
    pub const MOVE: &str = "move";
    pub const ATTACK: &str = "attack";
    pub const CAST_SPELL: &str = "castSpell";
    pub const START_COMBAT: &str = "startCombat";
    pub const END_TURN: &str = "endTurn";
    pub const GET_GAME_STATE: &str = "getGameState";
}

/// A movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "north" | "n" | "up" => Ok(Self::North),
            "south" | "s" | "down" => Ok(Self::South),
            "east" | "e" | "right" => Ok(Self::East),
            "west" | "w" | "left" => Ok(Self::West),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// A grid position, used as a spell target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinGameParams<'a> {
    pub player_name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveParams {
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttackParams<'a> {
    pub target_id: &'a str,
    pub weapon_id: &'a str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CastSpellParams<'a> {
    pub spell_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartCombatParams<'a> {
    pub participant_ids: &'a [&'a str],
}

/// Game-level calls on top of an [`RpcClient`]. Obtained from
/// [`RpcClient::game`].
#[derive(Debug, Clone, Copy)]
pub struct GameApi<'a> {
    client: &'a RpcClient,
}

impl<'a> GameApi<'a> {
    pub fn new(client: &'a RpcClient) -> Self {
        Self { client }
    }

    /// Joins the game and stores the returned session.
    ///
    /// # Errors
    /// Besides call errors, fails with a session error if the result does
    /// not carry a well-formed `session_id`.
    pub async fn join_game(&self, player_name: &str) -> Result<Value, RpcError> {
        let result = self
            .call(methods::JOIN_GAME, &JoinGameParams { player_name })
            .await?;
        self.client.set_session_from_join(&result)?;
        tracing::info!(player_name, "joined game");
        Ok(result)
    }

    /// Leaves the game. The session is cleared whether or not the server
    /// acknowledges.
    pub async fn leave_game(&self) -> Result<Value, RpcError> {
        let result = self.call(methods::LEAVE_GAME, &serde_json::Map::new()).await;
        self.client.clear_session();
        result
    }

    pub async fn move_player(&self, direction: Direction) -> Result<Value, RpcError> {
        self.call(methods::MOVE, &MoveParams { direction }).await
    }

    pub async fn attack(&self, target_id: &str, weapon_id: &str) -> Result<Value, RpcError> {
        self.call(methods::ATTACK, &AttackParams { target_id, weapon_id })
            .await
    }

    pub async fn cast_spell(&self, params: &CastSpellParams<'_>) -> Result<Value, RpcError> {
        self.call(methods::CAST_SPELL, params).await
    }

    pub async fn start_combat(&self, participant_ids: &[&str]) -> Result<Value, RpcError> {
        self.call(methods::START_COMBAT, &StartCombatParams { participant_ids })
            .await
    }

    pub async fn end_turn(&self) -> Result<Value, RpcError> {
        self.call(methods::END_TURN, &serde_json::Map::new()).await
    }

    pub async fn get_game_state(&self) -> Result<Value, RpcError> {
        self.call(methods::GET_GAME_STATE, &serde_json::Map::new())
            .await
    }

    async fn call<P: Serialize + ?Sized>(&self, method: &str, params: &P) -> Result<Value, RpcError> {
        let params = serde_json::to_value(params).map_err(ProtocolError::Encode)?;
        self.client.call(method, Some(params), None).await
    }
}
