use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::entity::DictValue;
use super::{FIELD_BYPASS, TABLE_SESSIONS};

type Fields = HashMap<String, DictValue>;

/// One named table: key bytes → field → typed value.
#[derive(Default)]
struct Table {
    entries: RwLock<HashMap<Vec<u8>, Fields>>,
}

/// Process-wide multi-table key/value store shared with the kernel ruleset.
///
/// Writes are idempotent with last-writer-wins semantics; there are no
/// transactional guarantees across keys. Locking is per table, so plugin
/// handlers and event ingestion touching different tables never contend.
///
/// Writing `sessions[ctid].bypass_packetd = true` tells the kernel to stop
/// delivering packets of that flow, which is the exit door for sessions
/// that no longer need inspection.
#[derive(Default)]
pub struct Dictionary {
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a table, creating it on first use.
    fn table(&self, name: &str) -> Arc<Table> {
        if let Some(table) = self.tables.read().get(name) {
            return Arc::clone(table);
        }
        let mut tables = self.tables.write();
        Arc::clone(tables.entry(name.to_owned()).or_default())
    }

    pub fn set(&self, table: &str, key: &[u8], field: &str, value: DictValue) {
        if table.is_empty() || key.is_empty() || field.is_empty() {
            tracing::warn!(table, field, "ignoring malformed dictionary write");
            return;
        }
        let table = self.table(table);
        let mut entries = table.entries.write();
        entries
            .entry(key.to_vec())
            .or_default()
            .insert(field.to_owned(), value);
    }

    pub fn get(&self, table: &str, key: &[u8], field: &str) -> Option<DictValue> {
        let tables = self.tables.read();
        let table = tables.get(table)?;
        let entries = table.entries.read();
        entries.get(key)?.get(field).cloned()
    }

    /// All fields and values stored under a key.
    pub fn get_all(&self, table: &str, key: &[u8]) -> Option<Fields> {
        let tables = self.tables.read();
        let table = tables.get(table)?;
        let entries = table.entries.read();
        entries.get(key).cloned()
    }

    /// Field names stored under a key.
    pub fn get_fields(&self, table: &str, key: &[u8]) -> Option<Vec<String>> {
        self.get_all(table, key)
            .map(|fields| fields.into_keys().collect())
    }

    /// Remove one field. Removing the last field removes the key.
    pub fn delete_field(&self, table: &str, key: &[u8], field: &str) {
        let tables = self.tables.read();
        let Some(table) = tables.get(table) else {
            return;
        };
        let mut entries = table.entries.write();
        if let Some(fields) = entries.get_mut(key) {
            fields.remove(field);
            if fields.is_empty() {
                entries.remove(key);
            }
        }
    }

    /// Remove a key and all its fields. Idempotent.
    pub fn delete_key(&self, table: &str, key: &[u8]) {
        let tables = self.tables.read();
        if let Some(table) = tables.get(table) {
            table.entries.write().remove(key);
        }
    }

    /// Drop an entire table. Idempotent.
    pub fn delete_table(&self, table: &str) {
        self.tables.write().remove(table);
    }

    /// Serialise every entry as `table <key> <field> <value>` lines,
    /// sorted for stable output. Debug aid only.
    pub fn dump(&self) -> String {
        let mut lines = Vec::new();
        let tables = self.tables.read();
        for (name, table) in tables.iter() {
            let entries = table.entries.read();
            for (key, fields) in entries.iter() {
                for (field, value) in fields {
                    lines.push(format!("{name} {} {field} {value}", format_key(key)));
                }
            }
        }
        lines.sort();
        lines.join("\n")
    }

    /// Total number of keys across all tables.
    pub fn key_count(&self) -> usize {
        let tables = self.tables.read();
        tables.values().map(|t| t.entries.read().len()).sum()
    }

    // ── Session-table helpers ─────────────────────────────────────

    /// Key encoding for the `sessions` table.
    pub fn ctid_key(ctid: u32) -> [u8; 4] {
        ctid.to_be_bytes()
    }

    pub fn set_session_field(&self, ctid: u32, field: &str, value: DictValue) {
        self.set(TABLE_SESSIONS, &Self::ctid_key(ctid), field, value);
    }

    pub fn session_field(&self, ctid: u32, field: &str) -> Option<DictValue> {
        self.get(TABLE_SESSIONS, &Self::ctid_key(ctid), field)
    }

    /// Tell the kernel to stop queueing this flow.
    pub fn set_session_bypass(&self, ctid: u32) {
        self.set_session_field(ctid, FIELD_BYPASS, DictValue::Bool(true));
    }

    pub fn session_bypassed(&self, ctid: u32) -> bool {
        matches!(
            self.session_field(ctid, FIELD_BYPASS),
            Some(DictValue::Bool(true))
        )
    }

    /// Erase the whole `sessions[ctid]` entry.
    pub fn flush_session(&self, ctid: u32) {
        self.delete_key(TABLE_SESSIONS, &Self::ctid_key(ctid));
    }
}

fn format_key(key: &[u8]) -> String {
    if key.len() == 4 {
        return u32::from_be_bytes([key[0], key[1], key[2], key[3]]).to_string();
    }
    match std::str::from_utf8(key) {
        Ok(s) if s.chars().all(|c| c.is_ascii_graphic() || c == ' ') => s.to_owned(),
        _ => key.iter().map(|b| format!("{b:02x}")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::TABLE_HOST;

    #[test]
    fn set_get_roundtrip_every_type() {
        let dict = Dictionary::new();
        let values = [
            DictValue::Bool(true),
            DictValue::Int(1234),
            DictValue::Ip4("10.1.2.3".parse().unwrap()),
            DictValue::Ip6("fe80::1".parse().unwrap()),
            DictValue::Mac([1, 2, 3, 4, 5, 6]),
            DictValue::Text("client".to_owned()),
            DictValue::Bytes(vec![1, 2, 3]),
        ];
        for (i, value) in values.into_iter().enumerate() {
            let field = format!("field{i}");
            dict.set("t", b"k", &field, value.clone());
            assert_eq!(dict.get("t", b"k", &field), Some(value));
        }
    }

    #[test]
    fn last_writer_wins() {
        let dict = Dictionary::new();
        dict.set("t", b"k", "f", DictValue::Int(1));
        dict.set("t", b"k", "f", DictValue::Int(2));
        assert_eq!(dict.get("t", b"k", "f"), Some(DictValue::Int(2)));
    }

    #[test]
    fn get_missing_returns_none() {
        let dict = Dictionary::new();
        assert_eq!(dict.get("absent", b"k", "f"), None);
        dict.set("t", b"k", "f", DictValue::Bool(false));
        assert_eq!(dict.get("t", b"other", "f"), None);
        assert_eq!(dict.get("t", b"k", "other"), None);
    }

    #[test]
    fn delete_field_and_key_are_idempotent() {
        let dict = Dictionary::new();
        dict.set("t", b"k", "a", DictValue::Int(1));
        dict.set("t", b"k", "b", DictValue::Int(2));

        dict.delete_field("t", b"k", "a");
        dict.delete_field("t", b"k", "a");
        assert_eq!(dict.get("t", b"k", "a"), None);
        assert_eq!(dict.get("t", b"k", "b"), Some(DictValue::Int(2)));

        dict.delete_key("t", b"k");
        dict.delete_key("t", b"k");
        assert_eq!(dict.get("t", b"k", "b"), None);
    }

    #[test]
    fn deleting_last_field_removes_key() {
        let dict = Dictionary::new();
        dict.set("t", b"k", "only", DictValue::Bool(true));
        dict.delete_field("t", b"k", "only");
        assert_eq!(dict.get_fields("t", b"k"), None);
        assert_eq!(dict.key_count(), 0);
    }

    #[test]
    fn delete_table_drops_all_keys() {
        let dict = Dictionary::new();
        dict.set(TABLE_HOST, b"h1", "f", DictValue::Int(1));
        dict.set(TABLE_HOST, b"h2", "f", DictValue::Int(2));
        dict.delete_table(TABLE_HOST);
        assert_eq!(dict.get(TABLE_HOST, b"h1", "f"), None);
        assert_eq!(dict.key_count(), 0);
    }

    #[test]
    fn malformed_writes_are_ignored() {
        let dict = Dictionary::new();
        dict.set("", b"k", "f", DictValue::Int(1));
        dict.set("t", b"", "f", DictValue::Int(1));
        dict.set("t", b"k", "", DictValue::Int(1));
        assert_eq!(dict.key_count(), 0);
    }

    #[test]
    fn get_all_and_get_fields() {
        let dict = Dictionary::new();
        dict.set("t", b"k", "a", DictValue::Int(1));
        dict.set("t", b"k", "b", DictValue::Bool(true));

        let all = dict.get_all("t", b"k").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], DictValue::Int(1));

        let mut fields = dict.get_fields("t", b"k").unwrap();
        fields.sort();
        assert_eq!(fields, vec!["a", "b"]);
    }

    // ── Session helper tests ──────────────────────────────────────

    #[test]
    fn session_bypass_contract() {
        let dict = Dictionary::new();
        assert!(!dict.session_bypassed(7));

        dict.set_session_bypass(7);
        assert!(dict.session_bypassed(7));
        assert_eq!(
            dict.get(TABLE_SESSIONS, &Dictionary::ctid_key(7), FIELD_BYPASS),
            Some(DictValue::Bool(true))
        );

        dict.flush_session(7);
        assert!(!dict.session_bypassed(7));
    }

    #[test]
    fn flush_session_is_idempotent() {
        let dict = Dictionary::new();
        dict.set_session_bypass(42);
        dict.flush_session(42);
        dict.flush_session(42);
        assert_eq!(dict.key_count(), 0);
    }

    #[test]
    fn dump_is_sorted_and_readable() {
        let dict = Dictionary::new();
        dict.set_session_field(7, "bypass_packetd", DictValue::Bool(true));
        dict.set(TABLE_HOST, b"web", "hits", DictValue::Int(3));

        let dump = dict.dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(dump.contains("sessions 7 bypass_packetd bool:true"));
        assert!(dump.contains("host web hits int:3"));
        let mut sorted = lines.clone();
        sorted.sort_unstable();
        assert_eq!(lines, sorted);
    }
}
