//! Workspace entities: documents as Markdown with YAML frontmatter,
//! todo lists as JSON, clipboard items under `.prizm/clipboard/`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prizm_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoList {
    pub id: String,
    pub items: Vec<TodoItem>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardItem {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn docs_dir(&self, scope: &str) -> PathBuf {
        self.root.join(scope).join("docs")
    }

    fn doc_path(&self, scope: &str, id: &str) -> PathBuf {
        self.docs_dir(scope).join(format!("{id}.md"))
    }

    fn todos_dir(&self, scope: &str) -> PathBuf {
        self.root.join(scope).join("todos")
    }

    fn clipboard_path(&self, scope: &str) -> PathBuf {
        self.root
            .join(scope)
            .join(".prizm")
            .join("clipboard")
            .join("items.json")
    }

    // ── documents ───────────────────────────────────────────────────

    pub fn create_document(&self, scope: &str, title: &str, content: &str) -> Result<Document> {
        let now = Utc::now();
        let doc = Document {
            id: format!("doc-{}", uuid::Uuid::new_v4()),
            title: title.to_owned(),
            created_at: now,
            updated_at: now,
            content: content.to_owned(),
        };
        self.write_document(scope, &doc)?;
        Ok(doc)
    }

    pub fn get_document(&self, scope: &str, id: &str) -> Option<Document> {
        let raw = std::fs::read_to_string(self.doc_path(scope, id)).ok()?;
        parse_frontmatter(&raw)
    }

    /// Raw on-disk markdown, used by the snapshot collector.
    pub fn document_raw(&self, scope: &str, id: &str) -> Option<String> {
        std::fs::read_to_string(self.doc_path(scope, id)).ok()
    }

    pub fn update_document(
        &self,
        scope: &str,
        id: &str,
        title: Option<&str>,
        content: Option<&str>,
    ) -> Result<Document> {
        let mut doc = self
            .get_document(scope, id)
            .ok_or_else(|| Error::NotFound(format!("document {id}")))?;
        if let Some(t) = title {
            doc.title = t.to_owned();
        }
        if let Some(c) = content {
            doc.content = c.to_owned();
        }
        doc.updated_at = Utc::now();
        self.write_document(scope, &doc)?;
        Ok(doc)
    }

    pub fn delete_document(&self, scope: &str, id: &str) -> bool {
        std::fs::remove_file(self.doc_path(scope, id)).is_ok()
    }

    /// Restore a document file from a snapshot pre-image (rollback). An
    /// empty pre-image means the document didn't exist - delete it.
    pub fn restore_document_raw(&self, scope: &str, id: &str, raw: &str) -> Result<()> {
        if raw.is_empty() {
            self.delete_document(scope, id);
            return Ok(());
        }
        std::fs::create_dir_all(self.docs_dir(scope))?;
        std::fs::write(self.doc_path(scope, id), raw)?;
        Ok(())
    }

    pub fn list_documents(&self, scope: &str) -> Vec<Document> {
        let mut docs = Vec::new();
        if let Ok(entries) = std::fs::read_dir(self.docs_dir(scope)) {
            for entry in entries.flatten() {
                if let Ok(raw) = std::fs::read_to_string(entry.path()) {
                    if let Some(doc) = parse_frontmatter(&raw) {
                        docs.push(doc);
                    }
                }
            }
        }
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        docs
    }

    fn write_document(&self, scope: &str, doc: &Document) -> Result<()> {
        std::fs::create_dir_all(self.docs_dir(scope))?;
        let frontmatter = serde_yaml::to_string(doc)
            .map_err(|e| Error::Internal(format!("frontmatter serialize: {e}")))?;
        let raw = format!("---\n{frontmatter}---\n{}", doc.content);
        std::fs::write(self.doc_path(scope, &doc.id), raw)?;
        Ok(())
    }

    // ── todo lists ──────────────────────────────────────────────────

    pub fn get_todo_list(&self, scope: &str, list_id: &str) -> Option<TodoList> {
        let path = self.todos_dir(scope).join(format!("{list_id}.json"));
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn upsert_todo_list(
        &self,
        scope: &str,
        list_id: &str,
        items: Vec<TodoItem>,
    ) -> Result<TodoList> {
        let list = TodoList {
            id: list_id.to_owned(),
            items,
            updated_at: Utc::now(),
        };
        let dir = self.todos_dir(scope);
        std::fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(&list)?;
        std::fs::write(dir.join(format!("{list_id}.json")), json)?;
        Ok(list)
    }

    // ── clipboard ───────────────────────────────────────────────────

    pub fn clipboard_add(
        &self,
        scope: &str,
        content: &str,
        source: Option<&str>,
    ) -> Result<ClipboardItem> {
        let mut items = self.clipboard_list(scope);
        let item = ClipboardItem {
            id: format!("clip-{}", uuid::Uuid::new_v4()),
            content: content.to_owned(),
            source: source.map(str::to_owned),
            created_at: Utc::now(),
        };
        items.push(item.clone());
        let path = self.clipboard_path(scope);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&items)?)?;
        Ok(item)
    }

    pub fn clipboard_list(&self, scope: &str) -> Vec<ClipboardItem> {
        std::fs::read_to_string(self.clipboard_path(scope))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }
}

/// Split `---\n<yaml>\n---\n<body>` into a Document.
fn parse_frontmatter(raw: &str) -> Option<Document> {
    let rest = raw.strip_prefix("---\n")?;
    let (yaml, body) = rest.split_once("\n---\n")?;
    let mut doc: Document = serde_yaml::from_str(yaml).ok()?;
    doc.content = body.to_owned();
    Some(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, WorkspaceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn document_round_trip() {
        let (_dir, store) = store();
        let doc = store
            .create_document("online", "Notes", "# Heading\n\nBody text")
            .unwrap();
        let loaded = store.get_document("online", &doc.id).unwrap();
        assert_eq!(loaded.title, "Notes");
        assert_eq!(loaded.content, "# Heading\n\nBody text");
    }

    #[test]
    fn update_document_partial_fields() {
        let (_dir, store) = store();
        let doc = store.create_document("online", "Notes", "v1").unwrap();
        let updated = store
            .update_document("online", &doc.id, None, Some("v2"))
            .unwrap();
        assert_eq!(updated.title, "Notes");
        assert_eq!(updated.content, "v2");
        assert!(updated.updated_at >= doc.updated_at);
    }

    #[test]
    fn update_missing_document_is_not_found() {
        let (_dir, store) = store();
        let err = store
            .update_document("online", "doc-ghost", None, Some("x"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn restore_with_empty_preimage_deletes() {
        let (_dir, store) = store();
        let doc = store.create_document("online", "Notes", "body").unwrap();
        store.restore_document_raw("online", &doc.id, "").unwrap();
        assert!(store.get_document("online", &doc.id).is_none());
    }

    #[test]
    fn restore_rewrites_raw_markdown() {
        let (_dir, store) = store();
        let doc = store.create_document("online", "Notes", "v1").unwrap();
        let pre_image = store.document_raw("online", &doc.id).unwrap();

        store
            .update_document("online", &doc.id, Some("Changed"), Some("v2"))
            .unwrap();
        store
            .restore_document_raw("online", &doc.id, &pre_image)
            .unwrap();

        let restored = store.get_document("online", &doc.id).unwrap();
        assert_eq!(restored.title, "Notes");
        assert_eq!(restored.content, "v1");
    }

    #[test]
    fn todo_list_round_trip() {
        let (_dir, store) = store();
        store
            .upsert_todo_list(
                "online",
                "groceries",
                vec![TodoItem {
                    text: "milk".into(),
                    done: false,
                }],
            )
            .unwrap();
        let list = store.get_todo_list("online", "groceries").unwrap();
        assert_eq!(list.items.len(), 1);
        assert!(!list.items[0].done);
    }

    #[test]
    fn clipboard_appends() {
        let (_dir, store) = store();
        store.clipboard_add("online", "first", None).unwrap();
        store
            .clipboard_add("online", "second", Some("doc-1"))
            .unwrap();
        let items = store.clipboard_list("online");
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].source.as_deref(), Some("doc-1"));
    }
}
