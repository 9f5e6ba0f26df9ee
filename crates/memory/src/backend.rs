//! Injected backends: vector search, the LLM dedup judge, and the dedup
//! log store. The in-memory implementations back the test suites and the
//! no-backend development mode; production deployments plug in the
//! external SQLite/vector engines.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;

use prizm_domain::error::{Error, Result};

use crate::types::{DedupLogEntry, MemoryLayer, MemoryRecord};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A nearest-neighbor hit from the vector backend.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub distance: f32,
}

#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(&self, record: MemoryRecord) -> Result<()>;

    /// Nearest existing memory of the same layer within a group.
    async fn nearest(
        &self,
        content: &str,
        layer: MemoryLayer,
        group_id: Option<&str>,
    ) -> Result<Option<VectorHit>>;

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>>;

    /// Bump the updated_at timestamp of a kept row.
    async fn touch(&self, id: &str) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn delete_by_group_id(&self, group_id: &str) -> Result<usize>;

    async fn delete_by_group_prefix(&self, prefix: &str) -> Result<usize>;
}

/// The LLM arbiter consulted when the vector distance is under threshold.
/// Returns the raw verdict string; a reply starting with `SAME` confirms
/// the duplicate.
#[async_trait::async_trait]
pub trait MemoryJudge: Send + Sync {
    async fn judge(&self, new_content: &str, kept_content: &str) -> Result<String>;
}

#[async_trait::async_trait]
pub trait DedupLogStore: Send + Sync {
    async fn append(&self, entry: DedupLogEntry) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<DedupLogEntry>>;
    /// Flip `rolled_back` to 1. Returns false if already rolled back.
    async fn mark_rolled_back(&self, id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<DedupLogEntry>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory vector index
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map-backed index. `nearest` serves scripted hits when queued (tests
/// script the vector search exactly like the external engine would
/// answer), otherwise it falls back to exact-content matching.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    records: Mutex<HashMap<String, MemoryRecord>>,
    scripted_hits: Mutex<VecDeque<Option<VectorHit>>>,
    fail_group_queries: Mutex<bool>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer for the next `nearest` call.
    pub fn script_hit(&self, hit: Option<VectorHit>) {
        self.scripted_hits.lock().push_back(hit);
    }

    /// Make group delete queries fail (failure-path tests).
    pub fn fail_group_queries(&self, fail: bool) {
        *self.fail_group_queries.lock() = fail;
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Seed a record directly (test setup).
    pub fn seed(&self, record: MemoryRecord) {
        self.records.lock().insert(record.id.clone(), record);
    }

    pub fn count_layer(&self, layer: MemoryLayer) -> usize {
        self.records
            .lock()
            .values()
            .filter(|r| r.layer == layer)
            .count()
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, record: MemoryRecord) -> Result<()> {
        self.records.lock().insert(record.id.clone(), record);
        Ok(())
    }

    async fn nearest(
        &self,
        content: &str,
        layer: MemoryLayer,
        group_id: Option<&str>,
    ) -> Result<Option<VectorHit>> {
        if let Some(scripted) = self.scripted_hits.lock().pop_front() {
            return Ok(scripted);
        }
        let records = self.records.lock();
        Ok(records
            .values()
            .find(|r| {
                r.layer == layer && r.group_id.as_deref() == group_id && r.content == content
            })
            .map(|r| VectorHit {
                id: r.id.clone(),
                distance: 0.0,
            }))
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn touch(&self, id: &str) -> Result<()> {
        if let Some(r) = self.records.lock().get_mut(id) {
            r.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.lock().remove(id).is_some())
    }

    async fn delete_by_group_id(&self, group_id: &str) -> Result<usize> {
        if *self.fail_group_queries.lock() {
            return Err(Error::Upstream("vector backend query failed".into()));
        }
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| r.group_id.as_deref() != Some(group_id));
        Ok(before - records.len())
    }

    async fn delete_by_group_prefix(&self, prefix: &str) -> Result<usize> {
        if *self.fail_group_queries.lock() {
            return Err(Error::Upstream("vector backend query failed".into()));
        }
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| {
            r.group_id
                .as_deref()
                .map_or(true, |g| !g.starts_with(prefix))
        });
        Ok(before - records.len())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted judge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays queued verdict strings.
#[derive(Default)]
pub struct ScriptedJudge {
    verdicts: Mutex<VecDeque<String>>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, verdict: &str) {
        self.verdicts.lock().push_back(verdict.to_owned());
    }
}

#[async_trait::async_trait]
impl MemoryJudge for ScriptedJudge {
    async fn judge(&self, _new_content: &str, _kept_content: &str) -> Result<String> {
        self.verdicts
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Upstream("judge exhausted".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory dedup log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryDedupLog {
    entries: Mutex<Vec<DedupLogEntry>>,
}

impl InMemoryDedupLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DedupLogStore for InMemoryDedupLog {
    async fn append(&self, entry: DedupLogEntry) -> Result<()> {
        self.entries.lock().push(entry);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DedupLogEntry>> {
        Ok(self.entries.lock().iter().find(|e| e.id == id).cloned())
    }

    async fn mark_rolled_back(&self, id: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            if entry.rolled_back == 1 {
                return Ok(false);
            }
            entry.rolled_back = 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn list(&self) -> Result<Vec<DedupLogEntry>> {
        Ok(self.entries.lock().clone())
    }
}
