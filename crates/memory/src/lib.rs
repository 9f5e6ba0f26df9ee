//! Semantic memory writer.
//!
//! The chat core and background manager consume memory through this
//! narrow interface: route extracted cells into layered group ids,
//! suppress near-duplicates (with an auditable, undoable dedup log), and
//! delete by group on rollback. The heavy backends - vector search and
//! the LLM judge - stay behind traits; SQLite/embedding engines are
//! external collaborators.

mod backend;
mod reader;
mod types;
mod writer;

pub use backend::{
    DedupLogStore, InMemoryDedupLog, InMemoryVectorIndex, MemoryJudge, ScriptedJudge, VectorHit,
    VectorIndex,
};
pub use reader::{
    MemoryExtractor, MemoryReader, NoopMemoryExtractor, NoopMemoryReader, StaticMemoryReader,
};
pub use types::{DedupLogEntry, ExtractedMemory, MemCell, MemoryLayer, MemoryRecord, Routing};
pub use writer::{MemoryWriter, ProcessOutcome};
