//! Session state machine and authoritative cube spawn engine

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::unix_millis;
use crate::util::timer::TimerHandle;
use crate::ws::protocol::{CubeInfo, PlayerInfo, ServerMsg, SessionStatus};
use crate::ws::room::{OutboundSender, Room};

/// Session identifier: a short slug that doubles as the room name
pub type SessionId = String;

/// Lives each player starts with
pub const STARTING_LIVES: u32 = 3;

/// Gameplay settings, fixed per session at construction
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Lower bound of the random delay before the next cube
    pub cube_spawn_delay_min: Duration,
    /// Upper bound (exclusive) of the random delay before the next cube
    pub cube_spawn_delay_max: Duration,
    /// How long an unclaimed cube stays up
    pub cube_stay_duration: Duration,
    pub min_players: usize,
    pub max_players: usize,
    /// Probability that a spawned cube is red (a hazard)
    pub red_probability: f64,
    /// How long an empty session survives before the registry reaps it
    pub empty_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cube_spawn_delay_min: Duration::from_millis(3000),
            cube_spawn_delay_max: Duration::from_millis(5000),
            cube_stay_duration: Duration::from_millis(2000),
            min_players: 2,
            max_players: 8,
            red_probability: 0.3,
            empty_grace: Duration::from_secs(30),
        }
    }
}

/// Player state in a session (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: Uuid,
    pub name: String,
    pub score: u32,
    pub lives: u32,
    pub is_game_over: bool,
}

impl Player {
    fn new(id: Uuid, name: String) -> Self {
        Self {
            id,
            name,
            score: 0,
            lives: STARTING_LIVES,
            is_game_over: false,
        }
    }
}

/// The live cube, at most one per session
#[derive(Debug, Clone)]
pub struct Cube {
    /// Instance number; timer callbacks use it to recognize a stale cube
    seq: u64,
    pub is_red: bool,
    pub x: f32,
    pub z: f32,
    pub spawn_time: u64,
    pub hit_by: Option<Uuid>,
}

impl Cube {
    fn to_wire(&self) -> CubeInfo {
        CubeInfo {
            is_red: self.is_red,
            x: self.x,
            z: self.z,
            spawn_time: self.spawn_time,
            hit_by: self.hit_by,
        }
    }
}

/// Why a start request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StartRefusal {
    #[error("only the host can start the game")]
    NotHost,

    #[error("game already started")]
    AlreadyStarted,

    #[error("need {missing} more player(s) to start")]
    NotEnoughPlayers { missing: usize },
}

/// Why a join was refused (an unknown session id is the registry's concern)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinRefusal {
    #[error("Session is full")]
    Full,
}

/// Why a hit claim was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HitRefusal {
    #[error("no cube to hit")]
    NoCube,

    #[error("cube was already hit")]
    AlreadyClaimed,

    #[error("player is not in this session")]
    UnknownPlayer,

    #[error("player is out of the game")]
    GameOver,
}

/// Result of a successful hit, mirrored to the acting player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitOutcome {
    pub was_red: bool,
    pub score: u32,
    pub lives: u32,
    pub is_game_over: bool,
}

/// Result of removing a connection from the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The connection was not a member
    NotMember,
    Removed {
        now_empty: bool,
    },
}

/// Mutable session state, guarded by the session mutex.
/// Never held across an await point; timer callbacks re-acquire it and
/// re-validate status before acting.
struct SessionState {
    status: SessionStatus,
    /// Roster in join order; index 0 is the oldest member
    players: Vec<Player>,
    host_id: Option<Uuid>,
    current_cube: Option<Cube>,
    room: Room,
    rng: ChaCha8Rng,
    spawn_timer: Option<TimerHandle>,
    hide_timer: Option<TimerHandle>,
    cube_seq: u64,
}

impl SessionState {
    fn roster(&self) -> Vec<PlayerInfo> {
        self.players
            .iter()
            .map(|p| PlayerInfo {
                id: p.id,
                name: p.name.clone(),
                score: p.score,
                lives: p.lives,
                is_game_over: p.is_game_over,
                is_host: self.host_id == Some(p.id),
            })
            .collect()
    }

    fn cancel_timers(&mut self) {
        self.spawn_timer.take();
        self.hide_timer.take();
    }
}

/// One isolated game instance with its own roster, host, and spawn loop
pub struct Session {
    pub id: SessionId,
    settings: SessionSettings,
    /// Creation order, used as the matchmaking tie-break
    created_seq: u64,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: SessionId, settings: SessionSettings, seed: u64, created_seq: u64) -> Self {
        Self {
            id,
            settings,
            created_seq,
            state: Mutex::new(SessionState {
                status: SessionStatus::Waiting,
                players: Vec::new(),
                host_id: None,
                current_cube: None,
                room: Room::new(),
                rng: ChaCha8Rng::seed_from_u64(seed),
                spawn_timer: None,
                hide_timer: None,
                cube_seq: 0,
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn created_seq(&self) -> u64 {
        self.created_seq
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn host_id(&self) -> Option<Uuid> {
        self.state.lock().host_id
    }

    pub fn player_count(&self) -> usize {
        self.state.lock().players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().players.is_empty()
    }

    /// True iff another player fits and the session has not finished
    pub fn can_join(&self) -> bool {
        let state = self.state.lock();
        state.players.len() < self.settings.max_players && state.status != SessionStatus::Finished
    }

    /// Register a connection as a player. The first joiner becomes host.
    /// Sends the joiner its session snapshot, then broadcasts the roster.
    /// Capacity is re-checked under the lock so two racing joins cannot
    /// overfill the roster.
    pub fn add_player(
        &self,
        conn_id: Uuid,
        name: &str,
        sender: OutboundSender,
    ) -> Result<Player, JoinRefusal> {
        let mut state = self.state.lock();

        if state.players.len() >= self.settings.max_players
            || state.status == SessionStatus::Finished
        {
            debug!(session_id = %self.id, conn_id = %conn_id, "Join refused: session full");
            return Err(JoinRefusal::Full);
        }

        let name = if name.trim().is_empty() {
            format!("Player {}", state.players.len() + 1)
        } else {
            name.to_string()
        };

        let player = Player::new(conn_id, name);
        state.room.join(conn_id, sender);
        state.players.push(player.clone());
        if state.host_id.is_none() {
            state.host_id = Some(conn_id);
        }

        info!(
            session_id = %self.id,
            conn_id = %conn_id,
            name = %player.name,
            player_count = state.players.len(),
            "Player joined session"
        );

        state.room.send_to(
            &conn_id,
            ServerMsg::SessionJoined {
                session_id: self.id.clone(),
                socket_id: conn_id,
                status: state.status,
                players: state.roster(),
                host_id: state.host_id,
                min_players: self.settings.min_players,
                max_players: self.settings.max_players,
            },
        );

        state.room.broadcast(&ServerMsg::PlayersUpdate {
            players: state.roster(),
        });

        // Late joiners get the cube that is already up
        if state.status == SessionStatus::Active {
            if let Some(cube) = &state.current_cube {
                state
                    .room
                    .send_to(&conn_id, ServerMsg::CubeSpawned { cube: cube.to_wire() });
            }
        }

        Ok(player)
    }

    /// Remove a connection from the session. Transfers host to the
    /// next-oldest member, pauses the game when the roster drops below the
    /// minimum, and halts the spawn loop entirely when it empties.
    pub fn remove_player(&self, conn_id: Uuid) -> RemovalOutcome {
        let mut state = self.state.lock();
        state.room.leave(&conn_id);

        let Some(index) = state.players.iter().position(|p| p.id == conn_id) else {
            return RemovalOutcome::NotMember;
        };
        let removed = state.players.remove(index);

        info!(
            session_id = %self.id,
            conn_id = %conn_id,
            name = %removed.name,
            player_count = state.players.len(),
            "Player left session"
        );

        if state.players.is_empty() {
            state.host_id = None;
            state.cancel_timers();
            state.current_cube = None;
            if state.status == SessionStatus::Active {
                state.status = SessionStatus::Waiting;
            }
            debug!(session_id = %self.id, "No players left, spawn loop halted");
            return RemovalOutcome::Removed { now_empty: true };
        }

        if state.host_id == Some(conn_id) {
            let new_host_id = state.players[0].id;
            state.host_id = Some(new_host_id);
            info!(session_id = %self.id, new_host_id = %new_host_id, "Host transferred");
            state
                .room
                .broadcast(&ServerMsg::HostChanged { new_host_id });
        }

        state.room.broadcast(&ServerMsg::PlayersUpdate {
            players: state.roster(),
        });

        if state.status == SessionStatus::Active && state.players.len() < self.settings.min_players
        {
            state.status = SessionStatus::Waiting;
            state.cancel_timers();
            // In-flight cube is discarded, not scored
            state.current_cube = None;
            info!(session_id = %self.id, "Player count below minimum, game paused");
            state.room.broadcast(&ServerMsg::GamePaused {
                reason: "Not enough players".to_string(),
                min_players: self.settings.min_players,
            });
        }

        RemovalOutcome::Removed { now_empty: false }
    }

    /// Start the game. Host-only; needs at least `min_players` in the room.
    pub fn start_game(self: &Arc<Self>, conn_id: Uuid) -> Result<(), StartRefusal> {
        let mut state = self.state.lock();

        if state.host_id != Some(conn_id) {
            debug!(session_id = %self.id, conn_id = %conn_id, "Start refused: not host");
            return Err(StartRefusal::NotHost);
        }
        if state.status == SessionStatus::Active {
            debug!(session_id = %self.id, "Start refused: already active");
            return Err(StartRefusal::AlreadyStarted);
        }
        if state.players.len() < self.settings.min_players {
            let missing = self.settings.min_players - state.players.len();
            debug!(session_id = %self.id, missing, "Start refused: not enough players");
            return Err(StartRefusal::NotEnoughPlayers { missing });
        }

        state.status = SessionStatus::Active;
        info!(
            session_id = %self.id,
            player_count = state.players.len(),
            "Game started"
        );
        state.room.broadcast(&ServerMsg::GameStarted {
            status: SessionStatus::Active,
        });

        self.schedule_next_spawn(&mut state);
        Ok(())
    }

    /// Resolve a hit claim against the current cube.
    ///
    /// Exactly one of this path and the auto-hide path clears a given cube
    /// instance: claiming the cube here cancels the hide timer, and a hide
    /// callback that already fired finds the cube claimed and backs off.
    pub fn resolve_hit(
        self: &Arc<Self>,
        conn_id: Uuid,
        claimed_red: bool,
    ) -> Result<HitOutcome, HitRefusal> {
        let mut state = self.state.lock();

        let Some(cube) = &state.current_cube else {
            debug!(session_id = %self.id, conn_id = %conn_id, "Hit refused: no cube");
            return Err(HitRefusal::NoCube);
        };
        if cube.hit_by.is_some() {
            debug!(session_id = %self.id, conn_id = %conn_id, "Hit refused: already claimed");
            return Err(HitRefusal::AlreadyClaimed);
        }
        let is_red = cube.is_red;
        if claimed_red != is_red {
            debug!(
                session_id = %self.id,
                conn_id = %conn_id,
                claimed_red,
                "Client color claim disagrees with server cube"
            );
        }

        let Some(index) = state.players.iter().position(|p| p.id == conn_id) else {
            warn!(session_id = %self.id, conn_id = %conn_id, "Hit refused: unknown player");
            return Err(HitRefusal::UnknownPlayer);
        };
        if state.players[index].is_game_over {
            debug!(session_id = %self.id, conn_id = %conn_id, "Hit refused: player game over");
            return Err(HitRefusal::GameOver);
        }

        // Claim the cube; from here on the hide timer is a stale bystander
        if let Some(cube) = state.current_cube.as_mut() {
            cube.hit_by = Some(conn_id);
        }
        state.hide_timer.take();

        let player = &mut state.players[index];
        if is_red {
            player.lives = player.lives.saturating_sub(1);
            if player.lives == 0 {
                player.is_game_over = true;
                info!(session_id = %self.id, name = %player.name, "Player out of lives");
            }
        } else {
            player.score += 1;
        }

        let outcome = HitOutcome {
            was_red: is_red,
            score: player.score,
            lives: player.lives,
            is_game_over: player.is_game_over,
        };
        debug!(
            session_id = %self.id,
            name = %player.name,
            is_red,
            score = outcome.score,
            lives = outcome.lives,
            "Cube hit"
        );

        state.room.send_to(
            &conn_id,
            ServerMsg::ScoreUpdate {
                score: outcome.score,
                lives: outcome.lives,
                is_game_over: outcome.is_game_over,
            },
        );
        state.room.broadcast(&ServerMsg::PlayersUpdate {
            players: state.roster(),
        });

        state.current_cube = None;
        state.room.broadcast(&ServerMsg::CubeHidden);
        self.schedule_next_spawn(&mut state);

        Ok(outcome)
    }

    /// Arm the spawn timer with a random delay. No-op while the session is
    /// empty or not active.
    fn schedule_next_spawn(self: &Arc<Self>, state: &mut SessionState) {
        if state.players.is_empty() || state.status != SessionStatus::Active {
            return;
        }

        let min = self.settings.cube_spawn_delay_min;
        let max = self.settings.cube_spawn_delay_max;
        let span = max.saturating_sub(min).as_millis() as u64;
        let delay = if span > 0 {
            min + Duration::from_millis(state.rng.gen_range(0..span))
        } else {
            min
        };

        debug!(session_id = %self.id, delay_ms = delay.as_millis() as u64, "Next cube scheduled");

        let session = Arc::clone(self);
        state.spawn_timer = Some(TimerHandle::once(delay, move || session.spawn_cube()));
    }

    /// Spawn timer callback. Re-validates liveness: the session may have
    /// emptied or deactivated between scheduling and firing.
    fn spawn_cube(self: &Arc<Self>) {
        let mut state = self.state.lock();

        if state.players.is_empty() || state.status != SessionStatus::Active {
            debug!(session_id = %self.id, "Spawn skipped: session no longer live");
            return;
        }
        if state.current_cube.is_some() {
            debug!(session_id = %self.id, "Spawn skipped: cube already up");
            return;
        }

        state.cube_seq += 1;
        let seq = state.cube_seq;
        let is_red = state.rng.gen_bool(self.settings.red_probability);
        let angle = state.rng.gen_range(0.0..std::f32::consts::TAU);
        let radius = state.rng.gen_range(0.0..0.8f32);
        let cube = Cube {
            seq,
            is_red,
            x: angle.cos() * radius,
            z: angle.sin() * radius,
            spawn_time: unix_millis(),
            hit_by: None,
        };

        debug!(
            session_id = %self.id,
            is_red,
            x = cube.x,
            z = cube.z,
            "Cube spawned"
        );

        state
            .room
            .broadcast(&ServerMsg::CubeSpawned { cube: cube.to_wire() });
        state.current_cube = Some(cube);

        let session = Arc::clone(self);
        state.hide_timer = Some(TimerHandle::once(
            self.settings.cube_stay_duration,
            move || session.hide_unclaimed_cube(seq),
        ));
    }

    /// Auto-hide timer callback. Only clears the cube instance it was armed
    /// for, and only if no hit claimed it first.
    fn hide_unclaimed_cube(self: &Arc<Self>, seq: u64) {
        let mut state = self.state.lock();

        let still_unclaimed = matches!(
            &state.current_cube,
            Some(cube) if cube.seq == seq && cube.hit_by.is_none()
        );
        if !still_unclaimed {
            debug!(session_id = %self.id, "Auto-hide skipped: cube gone or claimed");
            return;
        }

        debug!(session_id = %self.id, "Cube auto-hidden (not hit)");
        state.current_cube = None;
        state.room.broadcast(&ServerMsg::CubeHidden);
        self.schedule_next_spawn(&mut state);
    }

    /// Cancel timers and drop the cube. Called by the registry when the
    /// session is reaped.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.cancel_timers();
        state.current_cube = None;
    }

    #[cfg(test)]
    fn inject_cube(self: &Arc<Self>, is_red: bool) -> u64 {
        let mut state = self.state.lock();
        state.cube_seq += 1;
        let seq = state.cube_seq;
        let cube = Cube {
            seq,
            is_red,
            x: 0.0,
            z: 0.0,
            spawn_time: unix_millis(),
            hit_by: None,
        };
        state
            .room
            .broadcast(&ServerMsg::CubeSpawned { cube: cube.to_wire() });
        state.current_cube = Some(cube);
        let session = Arc::clone(self);
        state.hide_timer = Some(TimerHandle::once(
            self.settings.cube_stay_duration,
            move || session.hide_unclaimed_cube(seq),
        ));
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn session_with(settings: SessionSettings) -> Arc<Session> {
        Arc::new(Session::new("abc123".to_string(), settings, 7, 0))
    }

    fn join(session: &Arc<Session>, name: &str) -> (Uuid, UnboundedReceiver<ServerMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        session.add_player(conn_id, name, tx).unwrap();
        (conn_id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    fn count_cube_hidden(msgs: &[ServerMsg]) -> usize {
        msgs.iter()
            .filter(|m| matches!(m, ServerMsg::CubeHidden))
            .count()
    }

    fn count_cube_spawned(msgs: &[ServerMsg]) -> usize {
        msgs.iter()
            .filter(|m| matches!(m, ServerMsg::CubeSpawned { .. }))
            .count()
    }

    /// Let pending timer tasks run after a clock advance
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn solo_settings() -> SessionSettings {
        SessionSettings {
            min_players: 1,
            ..SessionSettings::default()
        }
    }

    #[test]
    fn first_joiner_becomes_host_and_names_default() {
        let session = session_with(SessionSettings::default());
        let (a, _rx_a) = join(&session, "  ");
        let (b, _rx_b) = join(&session, "Bella");

        assert_eq!(session.host_id(), Some(a));
        assert_eq!(session.player_count(), 2);
        assert_eq!(session.status(), SessionStatus::Waiting);

        let state = session.state.lock();
        assert_eq!(state.players[0].name, "Player 1");
        assert_eq!(state.players[1].name, "Bella");
        assert_eq!(state.players[1].id, b);
    }

    #[test]
    fn joiner_receives_snapshot_then_roster() {
        let session = session_with(SessionSettings::default());
        let (a, mut rx_a) = join(&session, "Ada");

        let msgs = drain(&mut rx_a);
        match &msgs[0] {
            ServerMsg::SessionJoined {
                session_id,
                socket_id,
                status,
                players,
                host_id,
                min_players,
                max_players,
            } => {
                assert_eq!(session_id, "abc123");
                assert_eq!(*socket_id, a);
                assert_eq!(*status, SessionStatus::Waiting);
                assert_eq!(players.len(), 1);
                assert!(players[0].is_host);
                assert_eq!(*host_id, Some(a));
                assert_eq!(*min_players, 2);
                assert_eq!(*max_players, 8);
            }
            other => panic!("expected sessionJoined first, got {:?}", other),
        }
        assert!(matches!(msgs[1], ServerMsg::PlayersUpdate { .. }));
    }

    #[test]
    fn host_always_member_across_arbitrary_removals() {
        let session = session_with(SessionSettings::default());
        let (a, _rx_a) = join(&session, "A");
        let (b, mut rx_b) = join(&session, "B");
        let (c, _rx_c) = join(&session, "C");

        session.remove_player(a);
        assert_eq!(session.host_id(), Some(b));
        let msgs = drain(&mut rx_b);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::HostChanged { new_host_id } if *new_host_id == b)));

        session.remove_player(b);
        assert_eq!(session.host_id(), Some(c));

        assert_eq!(
            session.remove_player(c),
            RemovalOutcome::Removed { now_empty: true }
        );
        assert_eq!(session.host_id(), None);

        // Unknown connection is reported, not panicked on
        assert_eq!(session.remove_player(a), RemovalOutcome::NotMember);
    }

    #[test]
    fn roster_marks_new_host_after_transfer() {
        let session = session_with(SessionSettings::default());
        let (a, _rx_a) = join(&session, "A");
        let (_b, mut rx_b) = join(&session, "B");
        drain(&mut rx_b);

        session.remove_player(a);

        let msgs = drain(&mut rx_b);
        let roster = msgs
            .iter()
            .find_map(|m| match m {
                ServerMsg::PlayersUpdate { players } => Some(players),
                _ => None,
            })
            .expect("roster broadcast after removal");
        assert_eq!(roster.len(), 1);
        assert!(roster[0].is_host);
    }

    #[tokio::test(start_paused = true)]
    async fn start_game_requires_host_and_min_players() {
        let session = session_with(SessionSettings::default());
        let (a, _rx_a) = join(&session, "A");

        assert_eq!(
            session.start_game(a),
            Err(StartRefusal::NotEnoughPlayers { missing: 1 })
        );
        assert_eq!(session.status(), SessionStatus::Waiting);

        let (b, mut rx_b) = join(&session, "B");
        assert_eq!(session.start_game(b), Err(StartRefusal::NotHost));
        assert_eq!(session.status(), SessionStatus::Waiting);

        drain(&mut rx_b);
        assert_eq!(session.start_game(a), Ok(()));
        assert_eq!(session.status(), SessionStatus::Active);
        let msgs = drain(&mut rx_b);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::GameStarted {
                status: SessionStatus::Active
            }
        )));

        assert_eq!(session.start_game(a), Err(StartRefusal::AlreadyStarted));
    }

    #[tokio::test(start_paused = true)]
    async fn cube_spawns_after_start_and_auto_hides() {
        let session = session_with(SessionSettings::default());
        let (a, _rx_a) = join(&session, "A");
        let (_b, mut rx_b) = join(&session, "B");
        session.start_game(a).unwrap();
        drain(&mut rx_b);

        // Spawn delay is drawn from [3s, 5s)
        tokio::time::advance(Duration::from_millis(5000)).await;
        settle().await;
        let msgs = drain(&mut rx_b);
        assert_eq!(count_cube_spawned(&msgs), 1);

        // Unclaimed cube goes away after the stay duration...
        tokio::time::advance(Duration::from_millis(2000)).await;
        settle().await;
        let msgs = drain(&mut rx_b);
        assert_eq!(count_cube_hidden(&msgs), 1);

        // ...and the loop keeps going
        tokio::time::advance(Duration::from_millis(5000)).await;
        settle().await;
        let msgs = drain(&mut rx_b);
        assert_eq!(count_cube_spawned(&msgs), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn safe_hit_scores_and_respawns() {
        let session = session_with(SessionSettings::default());
        let (a, _rx_a) = join(&session, "A");
        let (b, mut rx_b) = join(&session, "B");
        session.start_game(a).unwrap();
        session.inject_cube(false);
        drain(&mut rx_b);

        let outcome = session.resolve_hit(b, false).unwrap();
        assert_eq!(
            outcome,
            HitOutcome {
                was_red: false,
                score: 1,
                lives: STARTING_LIVES,
                is_game_over: false,
            }
        );

        let msgs = drain(&mut rx_b);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::ScoreUpdate {
                score: 1,
                lives: 3,
                is_game_over: false
            }
        )));
        assert_eq!(count_cube_hidden(&msgs), 1);

        // Hit path scheduled the next spawn
        tokio::time::advance(Duration::from_millis(5000)).await;
        settle().await;
        let msgs = drain(&mut rx_b);
        assert_eq!(count_cube_spawned(&msgs), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hit_and_auto_hide_are_mutually_exclusive() {
        let session = session_with(SessionSettings::default());
        let (a, _rx_a) = join(&session, "A");
        let (b, mut rx_b) = join(&session, "B");
        session.start_game(a).unwrap();
        session.inject_cube(false);
        drain(&mut rx_b);

        session.resolve_hit(b, false).unwrap();

        // The canceled hide timer must not produce a second cubeHidden.
        // Stay within the minimum spawn delay so no new cube muddies counts.
        tokio::time::advance(Duration::from_millis(2500)).await;
        settle().await;
        let msgs = drain(&mut rx_b);
        assert_eq!(count_cube_hidden(&msgs), 1);

        // A second claim against the same cube is refused
        assert_eq!(session.resolve_hit(b, false), Err(HitRefusal::NoCube));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_hidden_cube_cannot_be_hit() {
        let session = session_with(SessionSettings::default());
        let (a, _rx_a) = join(&session, "A");
        let (b, mut rx_b) = join(&session, "B");
        session.start_game(a).unwrap();
        session.inject_cube(false);

        tokio::time::advance(Duration::from_millis(2000)).await;
        settle().await;
        let msgs = drain(&mut rx_b);
        assert!(count_cube_hidden(&msgs) >= 1);

        assert_eq!(session.resolve_hit(b, false), Err(HitRefusal::NoCube));
    }

    #[tokio::test(start_paused = true)]
    async fn red_hits_cost_lives_until_game_over() {
        let session = session_with(solo_settings());
        let (a, mut rx_a) = join(&session, "A");
        session.start_game(a).unwrap();

        session.inject_cube(true);
        assert_eq!(session.resolve_hit(a, true).unwrap().lives, 2);
        session.inject_cube(true);
        assert_eq!(session.resolve_hit(a, true).unwrap().lives, 1);

        session.inject_cube(true);
        let outcome = session.resolve_hit(a, true).unwrap();
        assert_eq!(outcome.lives, 0);
        assert!(outcome.is_game_over);
        assert_eq!(outcome.score, 0);

        let msgs = drain(&mut rx_a);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::ScoreUpdate {
                lives: 0,
                is_game_over: true,
                ..
            }
        )));

        // A dead player can no longer register hits
        session.inject_cube(false);
        assert_eq!(session.resolve_hit(a, false), Err(HitRefusal::GameOver));
    }

    #[tokio::test(start_paused = true)]
    async fn hit_refusals_leave_state_untouched() {
        let session = session_with(SessionSettings::default());
        let (a, _rx_a) = join(&session, "A");
        let (b, _rx_b) = join(&session, "B");
        session.start_game(a).unwrap();

        // No cube yet
        assert_eq!(session.resolve_hit(b, false), Err(HitRefusal::NoCube));

        session.inject_cube(false);
        // Stranger to the session
        assert_eq!(
            session.resolve_hit(Uuid::new_v4(), false),
            Err(HitRefusal::UnknownPlayer)
        );

        // The cube is still claimable by a member afterwards
        assert_eq!(session.resolve_hit(b, false).unwrap().score, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_below_min_pauses_and_discards_cube() {
        let session = session_with(SessionSettings::default());
        let (a, mut rx_a) = join(&session, "A");
        let (b, _rx_b) = join(&session, "B");
        session.start_game(a).unwrap();
        session.inject_cube(false);
        drain(&mut rx_a);

        session.remove_player(b);

        assert_eq!(session.status(), SessionStatus::Waiting);
        let msgs = drain(&mut rx_a);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::GamePaused { min_players: 2, .. }
        )));
        // Discarded, not resolved: no cubeHidden alongside the pause
        assert_eq!(count_cube_hidden(&msgs), 0);

        // The in-flight cube is gone and the loop is dead
        assert_eq!(session.resolve_hit(a, false), Err(HitRefusal::NoCube));
        tokio::time::advance(Duration::from_millis(10_000)).await;
        settle().await;
        let msgs = drain(&mut rx_a);
        assert_eq!(count_cube_spawned(&msgs), 0);
        assert_eq!(count_cube_hidden(&msgs), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn emptied_session_never_spawns_again() {
        let session = session_with(solo_settings());
        let (a, mut rx_a) = join(&session, "A");
        session.start_game(a).unwrap();
        session.inject_cube(false);

        session.remove_player(a);

        tokio::time::advance(Duration::from_millis(20_000)).await;
        settle().await;
        let msgs = drain(&mut rx_a);
        assert_eq!(count_cube_spawned(&msgs), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_joiner_receives_live_cube() {
        let session = session_with(solo_settings());
        let (a, _rx_a) = join(&session, "A");
        session.start_game(a).unwrap();
        session.inject_cube(false);

        let (_b, mut rx_b) = join(&session, "B");
        let msgs = drain(&mut rx_b);
        assert!(matches!(msgs[0], ServerMsg::SessionJoined { .. }));
        assert_eq!(count_cube_spawned(&msgs), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_session_rejects_joins() {
        let settings = SessionSettings {
            max_players: 2,
            ..SessionSettings::default()
        };
        let session = session_with(settings);
        let (_a, _rx_a) = join(&session, "A");
        assert!(session.can_join());
        let (_b, _rx_b) = join(&session, "B");
        assert!(!session.can_join());

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            session.add_player(Uuid::new_v4(), "C", tx),
            Err(JoinRefusal::Full)
        ));
        assert_eq!(session.player_count(), 2);
    }
}
