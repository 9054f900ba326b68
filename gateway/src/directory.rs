// Copyright (c) 2024 Botho Foundation

//! Gossip-built map from user ids to the connection that hosts them.

use parking_lot::RwLock;
use rp_chain::normalize_user_id;
use std::collections::HashMap;

/// Identifier of one peer connection, unique per gateway process.
pub type ConnectionId = u64;

#[derive(Debug, Default)]
pub struct Directory {
    entries: RwLock<HashMap<String, ConnectionId>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `user_id` is reachable through `conn`. Later entries win.
    pub fn insert(&self, user_id: &str, conn: ConnectionId) {
        self.entries.write().insert(normalize_user_id(user_id), conn);
    }

    /// Record `user_id` only if nothing claims it yet. Returns whether it was added.
    pub fn insert_if_absent(&self, user_id: &str, conn: ConnectionId) -> bool {
        let mut entries = self.entries.write();
        let key = normalize_user_id(user_id);
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, conn);
        true
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionId> {
        self.entries.read().get(&normalize_user_id(user_id)).copied()
    }

    /// Drop every entry owned by `conn`, returning the users removed.
    pub fn remove_connection(&self, conn: ConnectionId) -> Vec<String> {
        let mut entries = self.entries.write();
        let removed: Vec<String> = entries
            .iter()
            .filter(|(_, c)| **c == conn)
            .map(|(user, _)| user.clone())
            .collect();
        for user in &removed {
            entries.remove(user);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_normalized() {
        let dir = Directory::new();
        dir.insert(" Bob ", 3);
        assert_eq!(dir.lookup("bob"), Some(3));
        assert_eq!(dir.lookup("BOB"), Some(3));
        assert_eq!(dir.lookup("carol"), None);
    }

    #[test]
    fn test_remove_connection() {
        let dir = Directory::new();
        dir.insert("bob", 1);
        dir.insert("carol", 1);
        dir.insert("dave", 2);

        let mut removed = dir.remove_connection(1);
        removed.sort();
        assert_eq!(removed, vec!["bob".to_string(), "carol".to_string()]);
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.lookup("dave"), Some(2));
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let dir = Directory::new();
        dir.insert("alice", 1);
        assert!(!dir.insert_if_absent("Alice", 2));
        assert_eq!(dir.lookup("alice"), Some(1));
        assert!(dir.insert_if_absent("relay-east", 2));
        assert_eq!(dir.lookup("relay-east"), Some(2));
    }
}
