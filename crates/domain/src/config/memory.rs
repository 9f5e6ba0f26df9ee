use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Master switch for memory injection + extraction.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Vector distance at or below which a candidate is a dedup suspect.
    #[serde(default = "d_dedup_threshold")]
    pub dedup_distance_threshold: f32,
    /// Embedding dimensionality of the external vector backend.
    #[serde(default = "d_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dedup_distance_threshold: d_dedup_threshold(),
            embedding_dim: d_embedding_dim(),
            embedding_model: None,
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_dedup_threshold() -> f32 {
    0.25
}
fn d_embedding_dim() -> usize {
    768
}
