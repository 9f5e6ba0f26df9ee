use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Layers & routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    /// Durable user facts; global (no group).
    Profile,
    /// Scope-level episodic memory.
    Episodic,
    /// Scope-level forward-looking notes.
    Foresight,
    /// Append-only per-session log; never deduplicated.
    EventLog,
    /// Document-scene memory, routed to the scope's docs group.
    Document,
}

impl MemoryLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryLayer::Profile => "profile",
            MemoryLayer::Episodic => "episodic",
            MemoryLayer::Foresight => "foresight",
            MemoryLayer::EventLog => "event_log",
            MemoryLayer::Document => "document",
        }
    }
}

/// Where a batch of extracted memories belongs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routing {
    pub user_id: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Routing {
    /// Group id for a layer under this routing.
    ///
    /// profile → global; episodic/foresight → scope;
    /// event_log → `scope:session:<id>`; document → `scope:docs`.
    pub fn group_for(&self, layer: MemoryLayer) -> Option<String> {
        match layer {
            MemoryLayer::Profile => None,
            MemoryLayer::Episodic | MemoryLayer::Foresight => Some(self.scope.clone()),
            MemoryLayer::EventLog => self
                .session_id
                .as_ref()
                .map(|sid| format!("{}:session:{}", self.scope, sid)),
            MemoryLayer::Document => Some(format!("{}:docs", self.scope)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cells & records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One memory produced by an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedMemory {
    pub content: String,
    pub layer: MemoryLayer,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The extractor's output for one pass: zero or more memories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemCell {
    pub memories: Vec<ExtractedMemory>,
}

/// A persisted memory row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub layer: MemoryLayer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(
        content: &str,
        layer: MemoryLayer,
        group_id: Option<String>,
        user_id: &str,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("mem-{}", uuid::Uuid::new_v4()),
            content: content.to_owned(),
            layer,
            group_id,
            user_id: user_id.to_owned(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dedup log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Audit record of one suppressed insert. `rolled_back` flips to 1 when
/// the suppression is undone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupLogEntry {
    pub id: String,
    pub kept_memory_id: String,
    pub new_memory_content: String,
    pub new_memory_type: MemoryLayer,
    #[serde(default)]
    pub new_memory_metadata: serde_json::Value,
    pub kept_memory_content: String,
    pub vector_distance: f32,
    pub llm_reasoning: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub rolled_back: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_routing_rules() {
        let routing = Routing {
            user_id: "user1".into(),
            scope: "online".into(),
            session_id: Some("sess-9".into()),
        };
        assert_eq!(routing.group_for(MemoryLayer::Profile), None);
        assert_eq!(
            routing.group_for(MemoryLayer::Episodic).as_deref(),
            Some("online")
        );
        assert_eq!(
            routing.group_for(MemoryLayer::Foresight).as_deref(),
            Some("online")
        );
        assert_eq!(
            routing.group_for(MemoryLayer::EventLog).as_deref(),
            Some("online:session:sess-9")
        );
        assert_eq!(
            routing.group_for(MemoryLayer::Document).as_deref(),
            Some("online:docs")
        );
    }

    #[test]
    fn event_log_without_session_has_no_group() {
        let routing = Routing {
            user_id: "user1".into(),
            scope: "online".into(),
            session_id: None,
        };
        assert_eq!(routing.group_for(MemoryLayer::EventLog), None);
    }
}
