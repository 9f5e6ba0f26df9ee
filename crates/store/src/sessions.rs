//! Agent session persistence: an in-memory cache over per-session JSON
//! files. The agent runtime is the single writer for a session's tail;
//! the store serializes every mutation through `update`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use prizm_domain::checkpoint::Checkpoint;
use prizm_domain::error::{Error, Result};
use prizm_domain::session::{AgentMessage, AgentSession, BgMeta, SessionKind};

/// What a truncation removed, for rollback bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct TruncateResult {
    pub removed_messages: Vec<AgentMessage>,
    pub removed_checkpoints: Vec<Checkpoint>,
}

pub struct ScopeStore {
    root: PathBuf,
    sessions: RwLock<HashMap<(String, String), AgentSession>>,
}

impl ScopeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scope_root(&self, scope: &str) -> PathBuf {
        self.root.join(scope)
    }

    fn sessions_dir(&self, scope: &str) -> PathBuf {
        self.scope_root(scope).join(".prizm").join("sessions")
    }

    fn session_path(&self, scope: &str, id: &str) -> PathBuf {
        self.sessions_dir(scope).join(format!("{id}.json"))
    }

    // ── lifecycle ───────────────────────────────────────────────────

    /// Create and persist a new session. Background/tool sessions must
    /// carry `bg_meta`; interactive sessions must not.
    pub fn create_session(
        &self,
        scope: &str,
        kind: SessionKind,
        bg_meta: Option<BgMeta>,
    ) -> Result<AgentSession> {
        let mut session = AgentSession::new(scope, kind);
        session.bg_meta = bg_meta;
        if !session.is_consistent() {
            return Err(Error::Validation(format!(
                "session kind {kind:?} is inconsistent with bg_meta presence"
            )));
        }
        self.persist(&session)?;
        self.sessions
            .write()
            .insert((scope.to_owned(), session.id.clone()), session.clone());
        Ok(session)
    }

    /// Fetch a session, loading it from disk on a cache miss.
    pub fn get_session(&self, scope: &str, id: &str) -> Option<AgentSession> {
        if let Some(s) = self
            .sessions
            .read()
            .get(&(scope.to_owned(), id.to_owned()))
        {
            return Some(s.clone());
        }
        let loaded = self.load_from_disk(scope, id)?;
        self.sessions
            .write()
            .insert((scope.to_owned(), id.to_owned()), loaded.clone());
        Some(loaded)
    }

    fn load_from_disk(&self, scope: &str, id: &str) -> Option<AgentSession> {
        let path = self.session_path(scope, id);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<AgentSession>(&raw) {
            Ok(session) if session.is_consistent() => Some(session),
            Ok(_) => {
                // Inconsistent shape (background kind without bg_meta or
                // vice versa) is rejected at load time.
                tracing::warn!(
                    scope,
                    session_id = id,
                    "rejecting inconsistent session at load"
                );
                None
            }
            Err(e) => {
                tracing::warn!(scope, session_id = id, error = %e, "unreadable session file");
                None
            }
        }
    }

    /// All sessions in a scope (disk scan merged over the cache).
    pub fn list_sessions(&self, scope: &str) -> Vec<AgentSession> {
        let dir = self.sessions_dir(scope);
        let mut out: HashMap<String, AgentSession> = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(s) = self.get_session(scope, stem) {
                    out.insert(s.id.clone(), s);
                }
            }
        }
        // Cached-but-unflushed sessions (shouldn't happen, but cheap).
        for ((sc, _), s) in self.sessions.read().iter() {
            if sc == scope {
                out.entry(s.id.clone()).or_insert_with(|| s.clone());
            }
        }
        let mut list: Vec<AgentSession> = out.into_values().collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        list
    }

    /// Remove a session from cache and disk. Returns the removed session.
    pub fn delete_session(&self, scope: &str, id: &str) -> Option<AgentSession> {
        let session = self.get_session(scope, id)?;
        self.sessions
            .write()
            .remove(&(scope.to_owned(), id.to_owned()));
        let _ = std::fs::remove_file(self.session_path(scope, id));
        Some(session)
    }

    // ── mutation ────────────────────────────────────────────────────

    /// Mutate a session under the cache lock, then persist. Returns the
    /// updated session, or None if it doesn't exist.
    pub fn update<F>(&self, scope: &str, id: &str, f: F) -> Option<AgentSession>
    where
        F: FnOnce(&mut AgentSession),
    {
        // Ensure the session is cached first.
        self.get_session(scope, id)?;
        let updated = {
            let mut sessions = self.sessions.write();
            let session = sessions.get_mut(&(scope.to_owned(), id.to_owned()))?;
            f(session);
            session.clone()
        };
        if let Err(e) = self.persist(&updated) {
            tracing::warn!(scope, session_id = id, error = %e, "session persist failed");
        }
        Some(updated)
    }

    /// Append a message, returning its index.
    pub fn append_message(
        &self,
        scope: &str,
        id: &str,
        message: AgentMessage,
    ) -> Result<usize> {
        let mut index = 0;
        self.update(scope, id, |s| {
            s.messages.push(message);
            index = s.messages.len() - 1;
        })
        .ok_or_else(|| Error::NotFound(format!("session {id} in scope {scope}")))?;
        Ok(index)
    }

    /// Truncate the message list to `index` (clamped into
    /// `[0, len]`), dropping checkpoints at or past the cut.
    pub fn truncate_messages(&self, scope: &str, id: &str, index: usize) -> Result<TruncateResult> {
        let mut result = TruncateResult::default();
        self.update(scope, id, |s| {
            let cut = index.min(s.messages.len());
            result.removed_messages = s.messages.split_off(cut);
            let (keep, drop): (Vec<Checkpoint>, Vec<Checkpoint>) = s
                .checkpoints
                .drain(..)
                .partition(|c| c.message_index < cut);
            s.checkpoints = keep;
            result.removed_checkpoints = drop;
        })
        .ok_or_else(|| Error::NotFound(format!("session {id} in scope {scope}")))?;
        Ok(result)
    }

    fn persist(&self, session: &AgentSession) -> Result<()> {
        let dir = self.sessions_dir(&session.scope);
        std::fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(self.session_path(&session.scope, &session.id), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prizm_domain::session::{
        BgTrigger, MemoryPolicy, MessageRole,
    };

    fn store() -> (tempfile::TempDir, ScopeStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ScopeStore::new(dir.path());
        (dir, store)
    }

    fn bg_meta() -> BgMeta {
        BgMeta {
            trigger: BgTrigger::Api,
            parent_session_id: None,
            depth: 0,
            label: None,
            timeout_ms: None,
            announce_target: None,
            memory_policy: MemoryPolicy::background_defaults(),
        }
    }

    #[test]
    fn create_and_reload_across_instances() {
        let (dir, store) = store();
        let session = store
            .create_session("online", SessionKind::Interactive, None)
            .unwrap();
        store
            .append_message(
                "online",
                &session.id,
                AgentMessage::text(MessageRole::User, "hello"),
            )
            .unwrap();

        // A fresh store instance reads the same state from disk.
        let store2 = ScopeStore::new(dir.path());
        let loaded = store2.get_session("online", &session.id).unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].text_content(), "hello");
    }

    #[test]
    fn background_without_meta_is_rejected() {
        let (_dir, store) = store();
        let err = store
            .create_session("online", SessionKind::Background, None)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn inconsistent_session_rejected_at_load() {
        let (dir, store) = store();
        let session = store
            .create_session("online", SessionKind::Interactive, None)
            .unwrap();

        // Corrupt the file: claim background kind with no bg_meta.
        let path = dir
            .path()
            .join("online/.prizm/sessions")
            .join(format!("{}.json", session.id));
        let mut raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        raw["kind"] = serde_json::json!("background");
        std::fs::write(&path, raw.to_string()).unwrap();

        let store2 = ScopeStore::new(dir.path());
        assert!(store2.get_session("online", &session.id).is_none());
    }

    #[test]
    fn truncate_clamps_and_drops_checkpoints() {
        let (_dir, store) = store();
        let session = store
            .create_session("online", SessionKind::Interactive, None)
            .unwrap();
        for i in 0..6 {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            store
                .append_message("online", &session.id, AgentMessage::text(role, "m"))
                .unwrap();
        }
        store.update("online", &session.id, |s| {
            for idx in [0usize, 2, 4] {
                s.checkpoints
                    .push(Checkpoint::new(&s.id.clone(), idx, "turn"));
            }
        });

        let result = store
            .truncate_messages("online", &session.id, 2)
            .unwrap();
        assert_eq!(result.removed_messages.len(), 4);
        assert_eq!(result.removed_checkpoints.len(), 2);

        let after = store.get_session("online", &session.id).unwrap();
        assert_eq!(after.messages.len(), 2);
        assert_eq!(after.checkpoints.len(), 1);
        assert_eq!(after.checkpoints[0].message_index, 0);

        // Out-of-range index clamps to len (no-op).
        let noop = store
            .truncate_messages("online", &session.id, 99)
            .unwrap();
        assert!(noop.removed_messages.is_empty());
    }

    #[test]
    fn bg_session_round_trip() {
        let (_dir, store) = store();
        let session = store
            .create_session("online", SessionKind::Background, Some(bg_meta()))
            .unwrap();
        store.update("online", &session.id, |s| {
            s.set_bg_status(prizm_domain::session::BgStatus::Running);
        });
        let loaded = store.get_session("online", &session.id).unwrap();
        assert_eq!(
            loaded.bg_status,
            Some(prizm_domain::session::BgStatus::Running)
        );
    }

    #[test]
    fn delete_session_removes_file() {
        let (dir, store) = store();
        let session = store
            .create_session("online", SessionKind::Interactive, None)
            .unwrap();
        let path = dir
            .path()
            .join("online/.prizm/sessions")
            .join(format!("{}.json", session.id));
        assert!(path.exists());

        assert!(store.delete_session("online", &session.id).is_some());
        assert!(!path.exists());
        assert!(store.get_session("online", &session.id).is_none());
    }

    #[test]
    fn list_sessions_newest_first() {
        let (_dir, store) = store();
        let a = store
            .create_session("online", SessionKind::Interactive, None)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = store
            .create_session("online", SessionKind::Interactive, None)
            .unwrap();

        let list = store.list_sessions("online");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, b.id);
        assert_eq!(list[1].id, a.id);
        assert!(store.list_sessions("other").is_empty());
    }
}
