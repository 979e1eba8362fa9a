//! Live sessions, keyed by id.

use std::collections::HashMap;

use tokio::task::JoinHandle;

use crate::session::SessionId;

/// Owns the task of every live session.
///
/// The accept loop is the only writer of new entries; an entry is removed
/// when its session reports that it finished and released both sockets.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, JoinHandle<()>>,
    last_id: SessionId,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for the next session. Ids are never reused.
    pub fn next_id(&mut self) -> SessionId {
        self.last_id += 1;
        self.last_id
    }

    pub fn register(&mut self, id: SessionId, task: JoinHandle<()>) {
        if let Some(stale) = self.sessions.insert(id, task) {
            stale.abort();
        }
    }

    /// Forget a finished session. Returns false if the id was unknown.
    pub fn unregister(&mut self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Abort every live session. Their sockets close as the tasks drop.
    pub fn shutdown(&mut self) {
        for (_, task) in self.sessions.drain() {
            task.abort();
        }
    }
}
