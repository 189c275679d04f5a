// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Connection table.
//
// Tracks live streams by stream id. Owned by one manager value (the
// policy host) and passed by reference; there is no process-wide
// registry. Entries carry the stream's identity for duplicate
// rejection and diagnostics; the feeder handle itself stays with the
// connection's read pump so channel closure tracks connection
// lifetime, not table lifetime.

use std::collections::HashMap;
use std::sync::Mutex;

/// Identity of one live stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub policy: String,
    pub model: String,
}

/// Live streams keyed by stream id.
///
/// The lock is held only for map operations, never across an await.
#[derive(Default)]
pub struct ConnectionTable {
    entries: Mutex<HashMap<String, StreamEntry>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream. Returns false if the id is already live.
    pub fn register(&self, stream_id: &str, entry: StreamEntry) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(stream_id) {
            return false;
        }
        entries.insert(stream_id.to_string(), entry);
        true
    }

    pub fn get(&self, stream_id: &str) -> Option<StreamEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(stream_id).cloned()
    }

    pub fn deregister(&self, stream_id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(stream_id).is_some()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> StreamEntry {
        StreamEntry {
            policy: "passthrough".to_string(),
            model: "test-model".to_string(),
        }
    }

    #[test]
    fn register_rejects_duplicate_ids() {
        let table = ConnectionTable::new();
        assert!(table.register("s1", entry()));
        assert!(!table.register("s1", entry()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn deregister_frees_the_id() {
        let table = ConnectionTable::new();
        assert!(table.register("s1", entry()));
        assert!(table.deregister("s1"));
        assert!(!table.deregister("s1"));
        assert!(table.is_empty());
        assert!(table.register("s1", entry()));
    }

    #[test]
    fn get_returns_live_entries_only() {
        let table = ConnectionTable::new();
        assert!(table.get("s1").is_none());
        table.register("s1", entry());
        let entry = table.get("s1").unwrap();
        assert_eq!(entry.policy, "passthrough");
    }
}
