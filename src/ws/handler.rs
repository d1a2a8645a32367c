//! WebSocket upgrade handler and client intent routing
//!
//! The only component that touches network I/O. Inbound intents are routed
//! to registry/session operations; outbound session events flow through a
//! per-connection channel drained by a writer task.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::session::RemovalOutcome;
use crate::game::{Session, SessionRegistry};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};
use crate::ws::room::OutboundSender;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMsg>();

    // Writer task: outbound channel -> WebSocket
    let writer_conn_id = conn_id;
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(conn_id = %writer_conn_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let mut conn = Connection::new(conn_id, state.registry.clone(), outbound_tx);
    let rate_limiter = ConnectionRateLimiter::new();

    // Reader loop: WebSocket -> registry/session operations
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(conn_id = %conn_id, "Rate limited message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => conn.handle_msg(msg),
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "Failed to parse client message");
                        conn.send_error("Malformed message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    conn.disconnect();
    writer_handle.abort();

    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Per-connection routing state
struct Connection {
    conn_id: Uuid,
    registry: Arc<SessionRegistry>,
    outbound: OutboundSender,
    /// The session this connection is currently a member of
    session: Option<Arc<Session>>,
}

impl Connection {
    fn new(conn_id: Uuid, registry: Arc<SessionRegistry>, outbound: OutboundSender) -> Self {
        Self {
            conn_id,
            registry,
            outbound,
            session: None,
        }
    }

    fn handle_msg(&mut self, msg: ClientMsg) {
        match msg {
            ClientMsg::CreateSession => self.create_session(),
            ClientMsg::QuickMatch { player_name } => self.quick_match(&player_name),
            ClientMsg::JoinSession {
                session_id,
                player_name,
            } => self.join_session(&session_id, &player_name),
            ClientMsg::StartGame => self.start_game(),
            ClientMsg::CubeHit { is_red } => self.cube_hit(is_red),
        }
    }

    fn send(&self, msg: ServerMsg) {
        let _ = self.outbound.send(msg);
    }

    fn send_error(&self, message: &str) {
        self.send(ServerMsg::Error {
            message: message.to_string(),
        });
    }

    /// Create a session and hand back its code. The creator is not a member
    /// yet; it joins explicitly like everyone else.
    fn create_session(&self) {
        let session = self.registry.create_session();
        self.send(ServerMsg::SessionCreated {
            session_id: session.id.clone(),
        });
    }

    fn quick_match(&mut self, player_name: &str) {
        if self.session.is_some() {
            self.send_error("Already in a session");
            return;
        }
        let session = self.registry.find_or_create();
        self.enter(session, player_name);
    }

    fn join_session(&mut self, session_id: &str, player_name: &str) {
        if self.session.is_some() {
            self.send_error("Already in a session");
            return;
        }
        let Some(session) = self.registry.lookup(session_id) else {
            debug!(conn_id = %self.conn_id, session_id, "Join failed: session not found");
            self.send_error("Session not found");
            return;
        };
        if !session.can_join() {
            debug!(conn_id = %self.conn_id, session_id, "Join failed: session full");
            self.send_error("Session is full");
            return;
        }
        self.enter(session, player_name);
    }

    fn enter(&mut self, session: Arc<Session>, player_name: &str) {
        match session.add_player(self.conn_id, player_name, self.outbound.clone()) {
            Ok(_) => self.session = Some(session),
            // Lost a join race since the capacity check
            Err(refusal) => self.send_error(&refusal.to_string()),
        }
    }

    fn start_game(&self) {
        let Some(session) = &self.session else {
            self.send_error("Not in a session");
            return;
        };
        if let Err(refusal) = session.start_game(self.conn_id) {
            self.send_error(&refusal.to_string());
        }
    }

    fn cube_hit(&self, is_red: bool) {
        let Some(session) = &self.session else {
            self.send_error("Not in a session");
            return;
        };
        match session.resolve_hit(self.conn_id, is_red) {
            Ok(outcome) => debug!(
                conn_id = %self.conn_id,
                was_red = outcome.was_red,
                score = outcome.score,
                lives = outcome.lives,
                game_over = outcome.is_game_over,
                "Hit resolved"
            ),
            Err(refusal) => self.send_error(&refusal.to_string()),
        }
    }

    /// Implicit leave on socket teardown. An emptied session gets its grace
    /// timer armed rather than being deleted on the spot.
    fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let RemovalOutcome::Removed { now_empty: true } = session.remove_player(self.conn_id) {
            self.registry.schedule_empty_cleanup(&session.id);
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
