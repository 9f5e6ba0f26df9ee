//! The memory writer: routing, deduplication, and undo.

use std::sync::Arc;

use chrono::Utc;

use prizm_domain::session::MemoryRef;

use crate::backend::{DedupLogStore, MemoryJudge, VectorIndex};
use crate::types::{DedupLogEntry, MemCell, MemoryLayer, MemoryRecord, Routing};

/// Result of one `process_mem_cell` pass.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Memories actually inserted.
    pub created: Vec<MemoryRef>,
    /// Dedup-log ids for suppressed memories.
    pub suppressed: Vec<String>,
}

pub struct MemoryWriter {
    index: Arc<dyn VectorIndex>,
    judge: Option<Arc<dyn MemoryJudge>>,
    dedup_log: Arc<dyn DedupLogStore>,
    /// Vector distance at or below which a candidate is a dedup suspect.
    distance_threshold: f32,
}

impl MemoryWriter {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        judge: Option<Arc<dyn MemoryJudge>>,
        dedup_log: Arc<dyn DedupLogStore>,
        distance_threshold: f32,
    ) -> Self {
        Self {
            index,
            judge,
            dedup_log,
            distance_threshold,
        }
    }

    /// Route every memory in the cell to its group and insert it, unless
    /// deduplication suppresses it.
    ///
    /// Event-log memories are append-only and never deduplicated. For the
    /// rest, a nearest-neighbor hit at or under the distance threshold is
    /// confirmed either by the LLM judge replying `SAME…` or - with no
    /// judge configured - by the vector distance alone. A suppressed
    /// insert appends one dedup-log row and bumps the kept row's
    /// timestamp; the caller's `created` list excludes it.
    pub async fn process_mem_cell(&self, cell: &MemCell, routing: &Routing) -> ProcessOutcome {
        let mut outcome = ProcessOutcome::default();

        for memory in &cell.memories {
            let group_id = routing.group_for(memory.layer);
            let record = MemoryRecord::new(
                &memory.content,
                memory.layer,
                group_id.clone(),
                &routing.user_id,
                memory.metadata.clone(),
            );

            if memory.layer != MemoryLayer::EventLog {
                match self
                    .dedup_check(&record, group_id.as_deref(), routing)
                    .await
                {
                    Ok(Some(log_id)) => {
                        outcome.suppressed.push(log_id);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Memory write failures are warnings, never turn
                        // failures; fall through and insert.
                        tracing::warn!(error = %e, "dedup check failed; inserting anyway");
                    }
                }
            }

            let memory_ref = MemoryRef {
                id: record.id.clone(),
                layer: memory.layer.as_str().to_owned(),
            };
            match self.index.insert(record).await {
                Ok(()) => outcome.created.push(memory_ref),
                Err(e) => {
                    tracing::warn!(error = %e, layer = memory.layer.as_str(), "memory insert failed");
                }
            }
        }

        outcome
    }

    /// Returns `Some(log_id)` when the insert was suppressed.
    async fn dedup_check(
        &self,
        candidate: &MemoryRecord,
        group_id: Option<&str>,
        routing: &Routing,
    ) -> prizm_domain::Result<Option<String>> {
        let hit = match self
            .index
            .nearest(&candidate.content, candidate.layer, group_id)
            .await?
        {
            Some(hit) if hit.distance <= self.distance_threshold => hit,
            _ => return Ok(None),
        };

        let kept = match self.index.get(&hit.id).await? {
            Some(kept) => kept,
            None => return Ok(None),
        };

        let reasoning = match &self.judge {
            Some(judge) => {
                let verdict = judge.judge(&candidate.content, &kept.content).await?;
                if !verdict.trim_start().starts_with("SAME") {
                    return Ok(None);
                }
                verdict
            }
            None => format!("vector-only (distance {:.4})", hit.distance),
        };

        let entry = DedupLogEntry {
            id: format!("dl-{}", uuid::Uuid::new_v4()),
            kept_memory_id: kept.id.clone(),
            new_memory_content: candidate.content.clone(),
            new_memory_type: candidate.layer,
            new_memory_metadata: candidate.metadata.clone(),
            kept_memory_content: kept.content.clone(),
            vector_distance: hit.distance,
            llm_reasoning: reasoning,
            user_id: routing.user_id.clone(),
            group_id: group_id.map(str::to_owned),
            created_at: Utc::now(),
            rolled_back: 0,
        };
        let log_id = entry.id.clone();
        self.dedup_log.append(entry).await?;
        self.index.touch(&kept.id).await?;
        Ok(Some(log_id))
    }

    /// Undo a dedup suppression: re-insert the suppressed memory and mark
    /// the log row rolled back. Idempotent - a second call (or an unknown
    /// id) returns `None`.
    pub async fn undo_dedup(&self, log_id: &str) -> prizm_domain::Result<Option<MemoryRef>> {
        let entry = match self.dedup_log.get(log_id).await? {
            Some(e) if e.rolled_back == 0 => e,
            _ => return Ok(None),
        };
        if !self.dedup_log.mark_rolled_back(log_id).await? {
            return Ok(None);
        }

        let record = MemoryRecord::new(
            &entry.new_memory_content,
            entry.new_memory_type,
            entry.group_id.clone(),
            &entry.user_id,
            entry.new_memory_metadata.clone(),
        );
        let memory_ref = MemoryRef {
            id: record.id.clone(),
            layer: entry.new_memory_type.as_str().to_owned(),
        };
        self.index.insert(record).await?;
        Ok(Some(memory_ref))
    }

    /// Delete a single memory (used by session rollback). Failures are
    /// the caller's to log; missing ids are fine.
    pub async fn delete_memory(&self, id: &str) -> prizm_domain::Result<bool> {
        self.index.delete(id).await
    }

    /// Delete every memory in a group. Query failures delete nothing and
    /// report 0.
    pub async fn delete_by_group_id(&self, group_id: &str) -> usize {
        match self.index.delete_by_group_id(group_id).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, group_id, "group delete failed");
                0
            }
        }
    }

    /// Delete every memory whose group starts with `prefix`. Query
    /// failures delete nothing and report 0.
    pub async fn delete_by_group_prefix(&self, prefix: &str) -> usize {
        match self.index.delete_by_group_prefix(prefix).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, prefix, "group prefix delete failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryDedupLog, InMemoryVectorIndex, ScriptedJudge, VectorHit};
    use crate::types::ExtractedMemory;

    fn routing() -> Routing {
        Routing {
            user_id: "user1".into(),
            scope: "online".into(),
            session_id: Some("sess-1".into()),
        }
    }

    fn episodic_cell(content: &str) -> MemCell {
        MemCell {
            memories: vec![ExtractedMemory {
                content: content.into(),
                layer: MemoryLayer::Episodic,
                metadata: serde_json::json!({}),
            }],
        }
    }

    fn writer_parts() -> (
        Arc<InMemoryVectorIndex>,
        Arc<ScriptedJudge>,
        Arc<InMemoryDedupLog>,
    ) {
        (
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(ScriptedJudge::new()),
            Arc::new(InMemoryDedupLog::new()),
        )
    }

    #[tokio::test]
    async fn semantic_dedup_suppresses_and_logs() {
        let (index, judge, log) = writer_parts();

        // An existing episodic memory the vector search will return.
        index.seed(MemoryRecord::new(
            "user wants to be called boss",
            MemoryLayer::Episodic,
            Some("online".into()),
            "user1",
            serde_json::json!({}),
        ));
        let kept_id = {
            let hit_id = "existing-ep-1";
            // Re-seed under the scripted id so the hit resolves.
            index.seed(MemoryRecord {
                id: hit_id.into(),
                ..MemoryRecord::new(
                    "user wants to be called boss",
                    MemoryLayer::Episodic,
                    Some("online".into()),
                    "user1",
                    serde_json::json!({}),
                )
            });
            hit_id.to_string()
        };

        index.script_hit(Some(VectorHit {
            id: kept_id.clone(),
            distance: 0.1,
        }));
        judge.script("SAME 两条都描述用户希望被称为老大");

        let writer = MemoryWriter::new(index.clone(), Some(judge), log.clone(), 0.25);
        let before = index.count_layer(MemoryLayer::Episodic);
        let outcome = writer
            .process_mem_cell(&episodic_cell("user wants nickname boss"), &routing())
            .await;

        // No new row of that type; the memory is excluded from `created`.
        assert_eq!(index.count_layer(MemoryLayer::Episodic), before);
        assert!(outcome.created.is_empty());
        assert_eq!(outcome.suppressed.len(), 1);

        let entries = log.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kept_memory_id, "existing-ep-1");
        assert!(entries[0].llm_reasoning.contains("SAME"));
        assert_eq!(entries[0].rolled_back, 0);
    }

    #[tokio::test]
    async fn judge_different_inserts_normally() {
        let (index, judge, log) = writer_parts();
        index.seed(MemoryRecord {
            id: "keep-1".into(),
            ..MemoryRecord::new(
                "likes coffee",
                MemoryLayer::Episodic,
                Some("online".into()),
                "user1",
                serde_json::json!({}),
            )
        });
        index.script_hit(Some(VectorHit {
            id: "keep-1".into(),
            distance: 0.2,
        }));
        judge.script("DIFFERENT these are unrelated facts");

        let writer = MemoryWriter::new(index.clone(), Some(judge), log.clone(), 0.25);
        let outcome = writer
            .process_mem_cell(&episodic_cell("likes tea"), &routing())
            .await;

        assert_eq!(outcome.created.len(), 1);
        assert!(log.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vector_only_fallback_without_judge() {
        let (index, _judge, log) = writer_parts();
        index.seed(MemoryRecord {
            id: "keep-1".into(),
            ..MemoryRecord::new(
                "likes coffee",
                MemoryLayer::Episodic,
                Some("online".into()),
                "user1",
                serde_json::json!({}),
            )
        });
        index.script_hit(Some(VectorHit {
            id: "keep-1".into(),
            distance: 0.05,
        }));

        let writer = MemoryWriter::new(index.clone(), None, log.clone(), 0.25);
        let outcome = writer
            .process_mem_cell(&episodic_cell("really likes coffee"), &routing())
            .await;

        assert!(outcome.created.is_empty());
        let entries = log.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].llm_reasoning.contains("vector-only"));
    }

    #[tokio::test]
    async fn distance_over_threshold_inserts() {
        let (index, _judge, log) = writer_parts();
        index.script_hit(Some(VectorHit {
            id: "far".into(),
            distance: 0.9,
        }));

        let writer = MemoryWriter::new(index.clone(), None, log.clone(), 0.25);
        let outcome = writer
            .process_mem_cell(&episodic_cell("novel fact"), &routing())
            .await;
        assert_eq!(outcome.created.len(), 1);
    }

    #[tokio::test]
    async fn event_log_is_never_deduped() {
        let (index, judge, log) = writer_parts();
        // Even a scripted exact hit must not suppress an event-log append.
        index.script_hit(Some(VectorHit {
            id: "x".into(),
            distance: 0.0,
        }));

        let writer = MemoryWriter::new(index.clone(), Some(judge), log.clone(), 0.25);
        let cell = MemCell {
            memories: vec![ExtractedMemory {
                content: "turn happened".into(),
                layer: MemoryLayer::EventLog,
                metadata: serde_json::json!({}),
            }],
        };
        let outcome = writer.process_mem_cell(&cell, &routing()).await;
        assert_eq!(outcome.created.len(), 1);
        assert!(log.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undo_dedup_reinserts_once() {
        let (index, judge, log) = writer_parts();
        index.seed(MemoryRecord {
            id: "keep-1".into(),
            ..MemoryRecord::new(
                "fact",
                MemoryLayer::Episodic,
                Some("online".into()),
                "user1",
                serde_json::json!({}),
            )
        });
        index.script_hit(Some(VectorHit {
            id: "keep-1".into(),
            distance: 0.1,
        }));
        judge.script("SAME duplicate");

        let writer = MemoryWriter::new(index.clone(), Some(judge), log.clone(), 0.25);
        let outcome = writer
            .process_mem_cell(&episodic_cell("the same fact"), &routing())
            .await;
        let log_id = outcome.suppressed[0].clone();

        let before = index.len();
        let restored = writer.undo_dedup(&log_id).await.unwrap();
        assert!(restored.is_some());
        assert_eq!(index.len(), before + 1);
        assert_eq!(log.get(&log_id).await.unwrap().unwrap().rolled_back, 1);

        // Second undo is a no-op returning None.
        let again = writer.undo_dedup(&log_id).await.unwrap();
        assert!(again.is_none());
        assert_eq!(index.len(), before + 1);
    }

    #[tokio::test]
    async fn undo_dedup_unknown_id_is_none() {
        let (index, _judge, log) = writer_parts();
        let writer = MemoryWriter::new(index, None, log, 0.25);
        assert!(writer.undo_dedup("dl-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn group_deletes_return_zero_on_failure() {
        let (index, _judge, log) = writer_parts();
        index.seed(MemoryRecord::new(
            "fact",
            MemoryLayer::Episodic,
            Some("online".into()),
            "user1",
            serde_json::json!({}),
        ));
        index.fail_group_queries(true);

        let writer = MemoryWriter::new(index.clone(), None, log, 0.25);
        assert_eq!(writer.delete_by_group_id("online").await, 0);
        assert_eq!(writer.delete_by_group_prefix("online").await, 0);
        // Nothing was deleted.
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn group_prefix_delete_scopes_sessions() {
        let (index, _judge, log) = writer_parts();
        index.seed(MemoryRecord::new(
            "a",
            MemoryLayer::EventLog,
            Some("online:session:s1".into()),
            "user1",
            serde_json::json!({}),
        ));
        index.seed(MemoryRecord::new(
            "b",
            MemoryLayer::EventLog,
            Some("online:session:s2".into()),
            "user1",
            serde_json::json!({}),
        ));
        index.seed(MemoryRecord::new(
            "c",
            MemoryLayer::Episodic,
            Some("online".into()),
            "user1",
            serde_json::json!({}),
        ));

        let writer = MemoryWriter::new(index.clone(), None, log, 0.25);
        let n = writer.delete_by_group_prefix("online:session:").await;
        assert_eq!(n, 2);
        assert_eq!(index.len(), 1);
    }
}
