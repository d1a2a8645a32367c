//! Process-wide session registry: creation, lookup, matchmaking selection,
//! and garbage collection of empty sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::util::ids::generate_slug;
use crate::util::timer::TimerHandle;
use crate::ws::protocol::SessionStatus;

use super::session::{Session, SessionId, SessionSettings};

/// Registry of all live sessions. Owned by the process entry point and
/// passed by handle to the connection layer; there is no ambient singleton.
pub struct SessionRegistry {
    settings: SessionSettings,
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Pending empty-session grace timers, one slot per session id.
    /// Re-arming replaces (and thereby cancels) the previous timer.
    cleanup_timers: DashMap<SessionId, TimerHandle>,
    created_counter: AtomicU64,
}

impl SessionRegistry {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            sessions: DashMap::new(),
            cleanup_timers: DashMap::new(),
            created_counter: AtomicU64::new(0),
        }
    }

    /// Create a session under a fresh slug. Slug collisions are retried
    /// internally and never surface to the caller.
    pub fn create_session(self: &Arc<Self>) -> Arc<Session> {
        loop {
            let id = generate_slug();
            match self.sessions.entry(id.clone()) {
                Entry::Occupied(_) => {
                    warn!(session_id = %id, "Session slug collision, regenerating");
                    continue;
                }
                Entry::Vacant(entry) => {
                    let created_seq = self.created_counter.fetch_add(1, Ordering::Relaxed);
                    let session = Arc::new(Session::new(
                        id.clone(),
                        self.settings.clone(),
                        rand::random(),
                        created_seq,
                    ));
                    // The insert guard holds the shard lock; release it
                    // before touching the map again
                    drop(entry.insert(session.clone()));
                    info!(
                        session_id = %id,
                        active_sessions = self.sessions.len(),
                        "Session created"
                    );
                    // Nobody has joined yet; reap it if nobody ever does
                    self.schedule_empty_cleanup(&id);
                    return session;
                }
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Matchmaking selection: the waiting session with the fewest players
    /// among those below their player cap. Ties go to the earliest-created
    /// session. None means the caller should create a fresh one.
    pub fn find_joinable_session(&self) -> Option<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|s| {
                s.status() == SessionStatus::Waiting
                    && s.player_count() < s.settings().max_players
            })
            .min_by_key(|s| (s.player_count(), s.created_seq()))
    }

    /// Quick-match: least-populated open session, or a fresh one
    pub fn find_or_create(self: &Arc<Self>) -> Arc<Session> {
        match self.find_joinable_session() {
            Some(session) => session,
            None => self.create_session(),
        }
    }

    /// Arm (or re-arm) the one-shot grace timer that reaps the session if
    /// it is still empty when the timer fires. Idempotent: replacing the
    /// slot cancels any previous timer, so repeated empty periods neither
    /// leak timers nor double-delete.
    pub fn schedule_empty_cleanup(self: &Arc<Self>, id: &SessionId) {
        let registry = Arc::clone(self);
        let session_id = id.clone();
        let timer = TimerHandle::once(self.settings.empty_grace, move || {
            registry.cleanup_if_empty(&session_id);
        });
        self.cleanup_timers.insert(id.clone(), timer);
    }

    fn cleanup_if_empty(&self, id: &SessionId) {
        self.cleanup_timers.remove(id);

        let Some(session) = self.lookup(id) else {
            return;
        };
        if session.is_empty() {
            self.sessions.remove(id);
            session.shutdown();
            info!(session_id = %id, "Deleted empty session (grace period expired)");
        } else {
            debug!(session_id = %id, "Cleanup skipped: session repopulated");
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn connected_players(&self) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.value().player_count())
            .sum()
    }
}
