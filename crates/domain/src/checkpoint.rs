//! Checkpoint records: which files changed during one turn.
//!
//! Snapshots (pre-turn file contents) are stored off-session by the
//! checkpoint store, keyed by `(session_id, checkpoint_id)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Created,
    Modified,
    Moved,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: FileAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub session_id: String,
    /// Index of the user message that opened the turn.
    pub message_index: usize,
    pub user_message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_changes: Vec<FileChange>,
    #[serde(default)]
    pub completed: bool,
}

impl Checkpoint {
    pub fn new(session_id: &str, message_index: usize, user_message: &str) -> Self {
        Self {
            id: format!("cp-{}", uuid::Uuid::new_v4()),
            session_id: session_id.to_owned(),
            message_index,
            user_message: user_message.to_owned(),
            created_at: Utc::now(),
            file_changes: Vec::new(),
            completed: false,
        }
    }

    /// Return a completed copy carrying the given changes. Pure - the
    /// receiver is untouched.
    pub fn completed_with(&self, file_changes: Vec<FileChange>) -> Self {
        let mut cp = self.clone();
        cp.file_changes = file_changes;
        cp.completed = true;
        cp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_with_is_pure() {
        let cp = Checkpoint::new("s1", 0, "hello");
        let done = cp.completed_with(vec![FileChange {
            path: "a.txt".into(),
            action: FileAction::Created,
            from_path: None,
        }]);
        assert!(!cp.completed);
        assert!(cp.file_changes.is_empty());
        assert!(done.completed);
        assert_eq!(done.file_changes.len(), 1);
        assert_eq!(done.id, cp.id);
    }
}
