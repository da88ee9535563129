use std::collections::HashMap;

use parking_lot::RwLock;

use super::entity::ConntrackEntry;

/// The ctid → conntrack-record mapping, independent of the session table.
#[derive(Default)]
pub struct ConntrackTable {
    entries: RwLock<HashMap<u32, ConntrackEntry>>,
}

impl ConntrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, ctid: u32) -> Option<ConntrackEntry> {
        self.entries.read().get(&ctid).cloned()
    }

    pub fn insert(&self, ctid: u32, entry: ConntrackEntry) {
        let mut entries = self.entries.write();
        if entries.insert(ctid, entry).is_some() {
            tracing::debug!(ctid, "conntrack table insert replaced a live entry");
        }
    }

    /// Idempotent removal.
    pub fn remove(&self, ctid: u32) -> Option<ConntrackEntry> {
        self.entries.write().remove(&ctid)
    }

    /// Mutate an entry in place under the write lock. Returns false when
    /// no entry exists for the ctid.
    pub fn with_entry<F: FnOnce(&mut ConntrackEntry)>(&self, ctid: u32, f: F) -> bool {
        match self.entries.write().get_mut(&ctid) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<ConntrackEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
