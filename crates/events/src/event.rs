//! The closed set of domain events.
//!
//! The serde `type` tag is the wire name broadcast to WebSocket clients,
//! so variant renames here are protocol changes.

use serde::Serialize;

use prizm_domain::checkpoint::FileAction;
use prizm_domain::session::SessionKind;

/// Lock transition kinds carried by `resource:lock.changed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockAction {
    Locked,
    Unlocked,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // ── agent sessions ─────────────────────────────────────────────
    #[serde(rename = "agent:session.created")]
    SessionCreated {
        scope: String,
        session_id: String,
        kind: SessionKind,
    },
    #[serde(rename = "agent:session.deleted")]
    SessionDeleted { scope: String, session_id: String },
    #[serde(rename = "agent:session.rolledBack")]
    SessionRolledBack {
        scope: String,
        session_id: String,
        checkpoint_id: String,
        removed_checkpoint_ids: Vec<String>,
        removed_message_count: usize,
        deleted_memory_ids: Vec<String>,
        deleted_document_ids: Vec<String>,
    },
    #[serde(rename = "agent:session.chatStatusChanged")]
    ChatStatusChanged {
        scope: String,
        session_id: String,
        streaming: bool,
    },
    #[serde(rename = "agent:message.completed")]
    MessageCompleted {
        scope: String,
        session_id: String,
        message_id: String,
        stopped: bool,
    },
    #[serde(rename = "agent:session.compressing")]
    SessionCompressing {
        scope: String,
        session_id: String,
        rounds: usize,
    },

    // ── tools & workspace ──────────────────────────────────────────
    #[serde(rename = "tool:executed")]
    ToolExecuted {
        scope: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        is_error: bool,
    },
    #[serde(rename = "document:saved")]
    DocumentSaved {
        scope: String,
        document_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    #[serde(rename = "document:deleted")]
    DocumentDeleted { scope: String, document_id: String },
    #[serde(rename = "document:memory.updated")]
    DocumentMemoryUpdated { scope: String, document_id: String },
    #[serde(rename = "file:operation")]
    FileOperation {
        scope: String,
        path: String,
        action: FileAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        from_path: Option<String>,
    },
    #[serde(rename = "todo:mutated")]
    TodoMutated { scope: String, list_id: String },
    #[serde(rename = "clipboard:mutated")]
    ClipboardMutated { scope: String },

    // ── locks ──────────────────────────────────────────────────────
    #[serde(rename = "resource:lock.changed")]
    LockChanged {
        scope: String,
        resource_type: String,
        resource_id: String,
        action: LockAction,
        session_id: String,
    },

    // ── background sessions ────────────────────────────────────────
    #[serde(rename = "bg:session.completed")]
    BgCompleted {
        scope: String,
        session_id: String,
        result: String,
        duration_ms: u64,
    },
    #[serde(rename = "bg:session.failed")]
    BgFailed {
        scope: String,
        session_id: String,
        error: String,
    },
    #[serde(rename = "bg:session.timeout")]
    BgTimeout { scope: String, session_id: String },
    #[serde(rename = "bg:session.cancelled")]
    BgCancelled { scope: String, session_id: String },

    // ── workflows ──────────────────────────────────────────────────
    #[serde(rename = "workflow:started")]
    WorkflowStarted {
        scope: String,
        run_id: String,
        workflow_name: String,
    },
    #[serde(rename = "workflow:step.completed")]
    WorkflowStepCompleted {
        scope: String,
        run_id: String,
        step_id: String,
        status: String,
    },
    #[serde(rename = "workflow:paused")]
    WorkflowPaused {
        scope: String,
        run_id: String,
        approve_prompt: String,
    },
    #[serde(rename = "workflow:completed")]
    WorkflowCompleted { scope: String, run_id: String },
    #[serde(rename = "workflow:failed")]
    WorkflowFailed {
        scope: String,
        run_id: String,
        error: String,
    },
    #[serde(rename = "workflow:def.registered")]
    WorkflowDefRegistered { scope: String, name: String },
    #[serde(rename = "workflow:def.deleted")]
    WorkflowDefDeleted { scope: String, name: String },

    // ── external collaborators (scheduler, cron, task fan-out) ─────
    #[serde(rename = "schedule:created")]
    ScheduleCreated {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "schedule:updated")]
    ScheduleUpdated {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "schedule:deleted")]
    ScheduleDeleted {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "schedule:reminded")]
    ScheduleReminded {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "cron:job.created")]
    CronJobCreated {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "cron:job.executed")]
    CronJobExecuted {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "cron:job.failed")]
    CronJobFailed {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "task:started")]
    TaskStarted {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "task:completed")]
    TaskCompleted {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "task:failed")]
    TaskFailed {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "task:cancelled")]
    TaskCancelled {
        scope: String,
        payload: serde_json::Value,
    },
    #[serde(rename = "notification:requested")]
    NotificationRequested {
        scope: String,
        payload: serde_json::Value,
    },
}

impl DomainEvent {
    /// The wire name, identical to the serde `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::SessionCreated { .. } => "agent:session.created",
            DomainEvent::SessionDeleted { .. } => "agent:session.deleted",
            DomainEvent::SessionRolledBack { .. } => "agent:session.rolledBack",
            DomainEvent::ChatStatusChanged { .. } => "agent:session.chatStatusChanged",
            DomainEvent::MessageCompleted { .. } => "agent:message.completed",
            DomainEvent::SessionCompressing { .. } => "agent:session.compressing",
            DomainEvent::ToolExecuted { .. } => "tool:executed",
            DomainEvent::DocumentSaved { .. } => "document:saved",
            DomainEvent::DocumentDeleted { .. } => "document:deleted",
            DomainEvent::DocumentMemoryUpdated { .. } => "document:memory.updated",
            DomainEvent::FileOperation { .. } => "file:operation",
            DomainEvent::TodoMutated { .. } => "todo:mutated",
            DomainEvent::ClipboardMutated { .. } => "clipboard:mutated",
            DomainEvent::LockChanged { .. } => "resource:lock.changed",
            DomainEvent::BgCompleted { .. } => "bg:session.completed",
            DomainEvent::BgFailed { .. } => "bg:session.failed",
            DomainEvent::BgTimeout { .. } => "bg:session.timeout",
            DomainEvent::BgCancelled { .. } => "bg:session.cancelled",
            DomainEvent::WorkflowStarted { .. } => "workflow:started",
            DomainEvent::WorkflowStepCompleted { .. } => "workflow:step.completed",
            DomainEvent::WorkflowPaused { .. } => "workflow:paused",
            DomainEvent::WorkflowCompleted { .. } => "workflow:completed",
            DomainEvent::WorkflowFailed { .. } => "workflow:failed",
            DomainEvent::WorkflowDefRegistered { .. } => "workflow:def.registered",
            DomainEvent::WorkflowDefDeleted { .. } => "workflow:def.deleted",
            DomainEvent::ScheduleCreated { .. } => "schedule:created",
            DomainEvent::ScheduleUpdated { .. } => "schedule:updated",
            DomainEvent::ScheduleDeleted { .. } => "schedule:deleted",
            DomainEvent::ScheduleReminded { .. } => "schedule:reminded",
            DomainEvent::CronJobCreated { .. } => "cron:job.created",
            DomainEvent::CronJobExecuted { .. } => "cron:job.executed",
            DomainEvent::CronJobFailed { .. } => "cron:job.failed",
            DomainEvent::TaskStarted { .. } => "task:started",
            DomainEvent::TaskCompleted { .. } => "task:completed",
            DomainEvent::TaskFailed { .. } => "task:failed",
            DomainEvent::TaskCancelled { .. } => "task:cancelled",
            DomainEvent::NotificationRequested { .. } => "notification:requested",
        }
    }

    /// The owning scope, used for per-client WebSocket filtering.
    pub fn scope(&self) -> &str {
        match self {
            DomainEvent::SessionCreated { scope, .. }
            | DomainEvent::SessionDeleted { scope, .. }
            | DomainEvent::SessionRolledBack { scope, .. }
            | DomainEvent::ChatStatusChanged { scope, .. }
            | DomainEvent::MessageCompleted { scope, .. }
            | DomainEvent::SessionCompressing { scope, .. }
            | DomainEvent::ToolExecuted { scope, .. }
            | DomainEvent::DocumentSaved { scope, .. }
            | DomainEvent::DocumentDeleted { scope, .. }
            | DomainEvent::DocumentMemoryUpdated { scope, .. }
            | DomainEvent::FileOperation { scope, .. }
            | DomainEvent::TodoMutated { scope, .. }
            | DomainEvent::ClipboardMutated { scope, .. }
            | DomainEvent::LockChanged { scope, .. }
            | DomainEvent::BgCompleted { scope, .. }
            | DomainEvent::BgFailed { scope, .. }
            | DomainEvent::BgTimeout { scope, .. }
            | DomainEvent::BgCancelled { scope, .. }
            | DomainEvent::WorkflowStarted { scope, .. }
            | DomainEvent::WorkflowStepCompleted { scope, .. }
            | DomainEvent::WorkflowPaused { scope, .. }
            | DomainEvent::WorkflowCompleted { scope, .. }
            | DomainEvent::WorkflowFailed { scope, .. }
            | DomainEvent::WorkflowDefRegistered { scope, .. }
            | DomainEvent::WorkflowDefDeleted { scope, .. }
            | DomainEvent::ScheduleCreated { scope, .. }
            | DomainEvent::ScheduleUpdated { scope, .. }
            | DomainEvent::ScheduleDeleted { scope, .. }
            | DomainEvent::ScheduleReminded { scope, .. }
            | DomainEvent::CronJobCreated { scope, .. }
            | DomainEvent::CronJobExecuted { scope, .. }
            | DomainEvent::CronJobFailed { scope, .. }
            | DomainEvent::TaskStarted { scope, .. }
            | DomainEvent::TaskCompleted { scope, .. }
            | DomainEvent::TaskFailed { scope, .. }
            | DomainEvent::TaskCancelled { scope, .. }
            | DomainEvent::NotificationRequested { scope, .. } => scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_name_matches_serde_tag() {
        let ev = DomainEvent::SessionDeleted {
            scope: "online".into(),
            session_id: "s1".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], ev.name());
        assert_eq!(json["scope"], "online");
    }

    #[test]
    fn lock_changed_payload_shape() {
        let ev = DomainEvent::LockChanged {
            scope: "docs".into(),
            resource_type: "document".into(),
            resource_id: "d1".into(),
            action: LockAction::Unlocked,
            session_id: "s1".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "resource:lock.changed");
        assert_eq!(json["action"], "unlocked");
    }
}
