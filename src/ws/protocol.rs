//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Waiting for players in the lobby
    Waiting,
    /// Game in progress, cubes spawning
    Active,
    /// Reserved for future use, never entered by current logic
    Finished,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Create a new session and receive its code
    CreateSession,

    /// Join the least-populated open session, or a fresh one
    QuickMatch {
        player_name: String,
    },

    /// Join a specific session by code
    JoinSession {
        session_id: String,
        player_name: String,
    },

    /// Start the game (host only)
    StartGame,

    /// Claim a hit on the current cube
    CubeHit {
        /// Color the client believes it hit; scoring trusts the server's cube
        is_red: bool,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Confirmation of session creation, sent to the creator only
    SessionCreated {
        session_id: String,
    },

    /// Full session snapshot, sent to the joining connection
    SessionJoined {
        session_id: String,
        /// The joiner's own connection id
        socket_id: Uuid,
        status: SessionStatus,
        /// Roster in join order
        players: Vec<PlayerInfo>,
        host_id: Option<Uuid>,
        min_players: usize,
        max_players: usize,
    },

    /// Roster update, broadcast to the whole session
    PlayersUpdate {
        players: Vec<PlayerInfo>,
    },

    /// Host privilege moved to another player
    HostChanged {
        new_host_id: Uuid,
    },

    /// Game has started
    GameStarted {
        status: SessionStatus,
    },

    /// Game dropped back to waiting (player count fell below minimum)
    GamePaused {
        reason: String,
        min_players: usize,
    },

    /// A cube appeared
    CubeSpawned {
        cube: CubeInfo,
    },

    /// The current cube went away (hit or timed out)
    CubeHidden,

    /// Private result for the player who hit the cube
    ScoreUpdate {
        score: u32,
        lives: u32,
        is_game_over: bool,
    },

    /// Error message to the offending connection
    Error {
        message: String,
    },
}

/// Player info for roster broadcasts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: Uuid,
    pub name: String,
    pub score: u32,
    pub lives: u32,
    pub is_game_over: bool,
    pub is_host: bool,
}

/// Cube state on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeInfo {
    /// Red cubes cost a life, green cubes score
    pub is_red: bool,
    pub x: f32,
    pub z: f32,
    /// Spawn timestamp in unix millis, for diagnostics
    pub spawn_time: u64,
    pub hit_by: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_msg_wire_names_are_camel_case() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"joinSession","sessionId":"abc123","playerName":"Alice"}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::JoinSession {
                session_id,
                player_name,
            } => {
                assert_eq!(session_id, "abc123");
                assert_eq!(player_name, "Alice");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"cubeHit","isRed":true}"#).unwrap();
        assert!(matches!(msg, ClientMsg::CubeHit { is_red: true }));
    }

    #[test]
    fn server_msg_serializes_tagged_payloads() {
        let json = serde_json::to_string(&ServerMsg::SessionCreated {
            session_id: "q1w2e3".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"sessionCreated","sessionId":"q1w2e3"}"#);

        let json = serde_json::to_string(&ServerMsg::ScoreUpdate {
            score: 4,
            lives: 2,
            is_game_over: false,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"scoreUpdate","score":4,"lives":2,"isGameOver":false}"#
        );
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Waiting).unwrap(),
            r#""waiting""#
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::Active).unwrap(),
            r#""active""#
        );
    }
}
