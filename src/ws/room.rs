//! Room abstraction for per-session broadcast grouping
//!
//! Each connection registers an outbound sender when it joins a session.
//! Emitting is a non-blocking send; a closed receiver just means the
//! connection is on its way out and the message is dropped.

use std::collections::HashMap;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

/// Sender half of a connection's outbound message channel
pub type OutboundSender = mpsc::UnboundedSender<ServerMsg>;

/// Broadcast group keyed by connection id
#[derive(Default)]
pub struct Room {
    members: HashMap<Uuid, OutboundSender>,
}

impl Room {
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    pub fn join(&mut self, conn_id: Uuid, sender: OutboundSender) {
        self.members.insert(conn_id, sender);
    }

    pub fn leave(&mut self, conn_id: &Uuid) {
        self.members.remove(conn_id);
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Emit to every member of the group
    pub fn broadcast(&self, msg: &ServerMsg) {
        for sender in self.members.values() {
            let _ = sender.send(msg.clone());
        }
    }

    /// Emit to a single member
    pub fn send_to(&self, conn_id: &Uuid, msg: ServerMsg) {
        if let Some(sender) = self.members.get(conn_id) {
            let _ = sender.send(msg);
        }
    }
}
