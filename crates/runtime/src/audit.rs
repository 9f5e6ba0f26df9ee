//! Audit trail: a bus subscriber that persists the significant domain
//! events as JSONL, one file per scope.

use std::path::PathBuf;
use std::sync::Arc;

use prizm_events::{DomainEvent, EventBus};

/// Event names worth a durable audit row.
fn is_audited(name: &str) -> bool {
    name == "tool:executed"
        || name == "resource:lock.changed"
        || name == "agent:session.rolledBack"
        || name.starts_with("bg:")
        || name.starts_with("workflow:")
}

pub fn register_audit(bus: &EventBus, data_dir: impl Into<PathBuf>) {
    let audit_dir = data_dir.into().join("audit");
    bus.subscribe_all(
        "audit-trail",
        Arc::new(move |event: DomainEvent| {
            let audit_dir = audit_dir.clone();
            async move {
                if !is_audited(event.name()) {
                    return Ok(());
                }
                let row = serde_json::json!({
                    "at": chrono::Utc::now(),
                    "event": event,
                });
                let path = audit_dir.join(format!("{}.jsonl", event.scope()));
                let write = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                    std::fs::create_dir_all(&audit_dir)?;
                    use std::io::Write;
                    let mut file = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)?;
                    writeln!(file, "{row}")?;
                    Ok(())
                })
                .await;
                match write {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "audit append failed"),
                    Err(e) => tracing::warn!(error = %e, "audit task failed"),
                }
                Ok(())
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audited_names() {
        assert!(is_audited("tool:executed"));
        assert!(is_audited("resource:lock.changed"));
        assert!(is_audited("bg:session.completed"));
        assert!(is_audited("workflow:paused"));
        assert!(!is_audited("agent:session.chatStatusChanged"));
        assert!(!is_audited("clipboard:mutated"));
    }

    #[tokio::test]
    async fn writes_jsonl_rows() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        register_audit(&bus, dir.path());

        bus.emit(DomainEvent::ToolExecuted {
            scope: "online".into(),
            session_id: Some("s1".into()),
            tool_name: "prizm_file_write".into(),
            call_id: Some("tc_1".into()),
            action: None,
            is_error: false,
        })
        .await;

        let raw = std::fs::read_to_string(dir.path().join("audit/online.jsonl")).unwrap();
        let row: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(row["event"]["type"], "tool:executed");
        assert_eq!(row["event"]["tool_name"], "prizm_file_write");
    }
}
