use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use super::entity::Session;

/// The ctid → session mapping.
///
/// Single-writer, multi-reader; writes are brief. At most one session per
/// ctid exists at any instant: inserting over a live key replaces the
/// old session and logs, removal is idempotent.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<u32, Arc<Session>>>,
    next_session_id: AtomicU64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Monotonically assigned id for the next session.
    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn find(&self, ctid: u32) -> Option<Arc<Session>> {
        self.sessions.read().get(&ctid).cloned()
    }

    pub fn insert(&self, ctid: u32, session: Arc<Session>) {
        let mut sessions = self.sessions.write();
        if let Some(old) = sessions.insert(ctid, session) {
            tracing::warn!(
                ctid,
                old_session_id = old.session_id(),
                "session table insert replaced a live entry"
            );
        }
    }

    /// Idempotent removal. Returns the removed session, if any.
    pub fn remove(&self, ctid: u32) -> Option<Arc<Session>> {
        self.sessions.write().remove(&ctid)
    }

    /// Remove only when the session is still idle past `threshold`,
    /// re-checked under the write lock so a packet racing the reaper
    /// keeps its session.
    pub fn remove_if_idle(&self, ctid: u32, threshold: Duration) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        if sessions.get(&ctid)?.idle() >= threshold {
            sessions.remove(&ctid)
        } else {
            None
        }
    }

    /// Detached snapshot for iteration outside the lock.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
