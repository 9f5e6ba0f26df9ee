//! Workflow definitions: YAML in, validated step graph out.

use serde::{Deserialize, Serialize};

use prizm_domain::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RunConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub error_strategy: ErrorStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    #[default]
    FailFast,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Agent,
    Approve,
    Transform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approve_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_actions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
    #[serde(default = "d_retry_on")]
    pub retry_on: Vec<RetryOn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    Failed,
    Timeout,
}

fn d_retry_on() -> Vec<RetryOn> {
    vec![RetryOn::Failed, RetryOn::Timeout]
}

impl WorkflowDef {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let def: WorkflowDef = serde_yaml::from_str(raw)
            .map_err(|e| Error::Validation(format!("workflow yaml: {e}")))?;
        def.validate()?;
        Ok(def)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::Internal(format!("workflow yaml serialize: {e}")))
    }

    /// Parse-time invariants: unique ids, per-type required fields, and
    /// no forward `$stepId` references.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("workflow name is required".into()));
        }
        if self.steps.is_empty() {
            return Err(Error::Validation(format!(
                "workflow {} has no steps",
                self.name
            )));
        }

        let mut earlier: Vec<&str> = Vec::new();
        for step in &self.steps {
            if earlier.contains(&step.id.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate step id: {}",
                    step.id
                )));
            }

            match step.step_type {
                StepType::Agent => {
                    if step.prompt.as_deref().map_or(true, str::is_empty) {
                        return Err(Error::Validation(format!(
                            "agent step {} requires a prompt",
                            step.id
                        )));
                    }
                }
                StepType::Approve => {
                    if step.approve_prompt.is_none() && step.prompt.is_none() {
                        return Err(Error::Validation(format!(
                            "approve step {} requires an approve_prompt or prompt",
                            step.id
                        )));
                    }
                }
                StepType::Transform => {
                    if step.transform.as_deref().map_or(true, str::is_empty) {
                        return Err(Error::Validation(format!(
                            "transform step {} requires a transform expression",
                            step.id
                        )));
                    }
                }
            }

            for source in [&step.input, &step.condition, &step.transform] {
                if let Some(text) = source {
                    for token in super::expr::referenced_steps(text) {
                        if token != "prev" && !earlier.contains(&token.as_str()) {
                            return Err(Error::Validation(format!(
                                "step {} references ${token} before it runs",
                                step.id
                            )));
                        }
                    }
                }
            }

            earlier.push(&step.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAFT_REVIEW_PUBLISH: &str = r#"
name: publish-pipeline
description: draft, approve, publish
steps:
  - id: draft
    type: agent
    prompt: "起草"
  - id: review
    type: approve
    approve_prompt: "是否发布?"
  - id: publish
    type: agent
    prompt: "发布"
    condition: "$review.approved"
    input: "$draft.output"
"#;

    #[test]
    fn parses_and_validates() {
        let def = WorkflowDef::from_yaml(DRAFT_REVIEW_PUBLISH).unwrap();
        assert_eq!(def.name, "publish-pipeline");
        assert_eq!(def.steps.len(), 3);
        assert_eq!(def.steps[1].step_type, StepType::Approve);
    }

    #[test]
    fn yaml_round_trip_preserves_named_fields() {
        let def = WorkflowDef::from_yaml(DRAFT_REVIEW_PUBLISH).unwrap();
        let reparsed = WorkflowDef::from_yaml(&def.to_yaml().unwrap()).unwrap();
        assert_eq!(def, reparsed);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let yaml = r#"
name: dup
steps:
  - id: a
    type: agent
    prompt: x
  - id: a
    type: agent
    prompt: y
"#;
        let err = WorkflowDef::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate step id"));
    }

    #[test]
    fn unknown_step_type_rejected() {
        let yaml = r#"
name: bad
steps:
  - id: a
    type: teleport
    prompt: x
"#;
        assert!(WorkflowDef::from_yaml(yaml).is_err());
    }

    #[test]
    fn forward_reference_rejected() {
        let yaml = r#"
name: fwd
steps:
  - id: a
    type: agent
    prompt: x
    input: "$later.output"
  - id: later
    type: agent
    prompt: y
"#;
        let err = WorkflowDef::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("references $later"));
    }

    #[test]
    fn prev_reference_is_allowed() {
        let yaml = r#"
name: prev-ok
steps:
  - id: a
    type: agent
    prompt: x
  - id: b
    type: transform
    transform: "result: $prev.output"
"#;
        assert!(WorkflowDef::from_yaml(yaml).is_ok());
    }

    #[test]
    fn missing_required_fields_rejected() {
        for yaml in [
            "name: x\nsteps:\n  - id: a\n    type: agent\n",
            "name: x\nsteps:\n  - id: a\n    type: approve\n",
            "name: x\nsteps:\n  - id: a\n    type: transform\n",
        ] {
            assert!(WorkflowDef::from_yaml(yaml).is_err(), "should reject: {yaml}");
        }
    }
}
