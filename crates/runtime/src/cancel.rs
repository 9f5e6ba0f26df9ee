//! Per-session cancellation with parent→child group fan-out.
//!
//! Each running turn registers a token keyed by `scope/session`. Calling
//! `cancel` signals the turn to stop cleanly at its next suspension
//! point. Background sessions register in their parent's cancel group so
//! stopping the parent cascades.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Composite key for a session's in-flight turn.
pub fn session_key(scope: &str, session_id: &str) -> String {
    format!("{scope}/{session_id}")
}

pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancellationToken>>,
    /// parent key → child keys cancelled alongside it.
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a fresh token for a session turn.
    pub fn register(&self, key: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(key.to_owned(), token.clone());
        token
    }

    /// Cancel a session's turn and every child in its group. Returns true
    /// if a token was found for the key itself.
    pub fn cancel(&self, key: &str) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(key) {
            token.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(key) {
            let tokens = self.tokens.lock();
            for child in children {
                if let Some(token) = tokens.get(child) {
                    token.cancel();
                }
            }
        }

        found
    }

    /// Remove a session's token (turn finished) and any group it owned.
    pub fn remove(&self, key: &str) {
        self.tokens.lock().remove(key);
        self.groups.lock().remove(key);
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.tokens.lock().contains_key(key)
    }

    pub fn add_to_group(&self, parent_key: &str, child_key: &str) {
        self.groups
            .lock()
            .entry(parent_key.to_owned())
            .or_default()
            .insert(child_key.to_owned());
    }

    pub fn remove_from_group(&self, parent_key: &str, child_key: &str) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(parent_key) {
            children.remove(child_key);
            if children.is_empty() {
                groups.remove(parent_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_cancel_remove() {
        let map = CancelMap::new();
        let token = map.register("online/s1");
        assert!(map.is_running("online/s1"));
        assert!(!token.is_cancelled());

        assert!(map.cancel("online/s1"));
        assert!(token.is_cancelled());

        map.remove("online/s1");
        assert!(!map.is_running("online/s1"));
        assert!(!map.cancel("online/s1"));
    }

    #[test]
    fn cancel_cascades_to_group_children() {
        let map = CancelMap::new();
        let parent = map.register("online/parent");
        let child = map.register("online/bg-1");
        map.add_to_group("online/parent", "online/bg-1");

        map.cancel("online/parent");
        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn removed_child_does_not_cascade() {
        let map = CancelMap::new();
        let _parent = map.register("online/parent");
        let child = map.register("online/bg-1");
        map.add_to_group("online/parent", "online/bg-1");
        map.remove_from_group("online/parent", "online/bg-1");

        map.cancel("online/parent");
        assert!(!child.is_cancelled());
    }

    #[test]
    fn reregister_replaces_token() {
        let map = CancelMap::new();
        let old = map.register("online/s1");
        let new = map.register("online/s1");
        map.cancel("online/s1");
        assert!(!old.is_cancelled());
        assert!(new.is_cancelled());
    }

    #[tokio::test]
    async fn token_wakes_awaiters() {
        let map = CancelMap::new();
        let token = map.register("online/s1");
        let waiter = tokio::spawn({
            let token = token.clone();
            async move {
                token.cancelled().await;
                true
            }
        });
        map.cancel("online/s1");
        assert!(waiter.await.unwrap());
    }
}
