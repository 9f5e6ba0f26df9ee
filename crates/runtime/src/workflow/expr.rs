//! `$stepId.field` expression evaluation for inputs, conditions, and
//! transforms.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::workflow::store::{StepRecord, StepStatus};

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$([A-Za-z0-9_-]+)(?:\.([A-Za-z0-9_]+))?").expect("token regex")
    })
}

/// Step ids referenced by `$token` occurrences (fields stripped).
pub fn referenced_steps(text: &str) -> Vec<String> {
    token_regex()
        .captures_iter(text)
        .map(|c| c[1].to_owned())
        .collect()
}

fn field_value(record: &StepRecord, field: &str) -> String {
    match field {
        "output" => record.output.clone().unwrap_or_default(),
        "approved" => record
            .approved
            .map(|a| a.to_string())
            .unwrap_or_default(),
        "status" => match record.status {
            StepStatus::Completed => "completed".into(),
            StepStatus::Failed => "failed".into(),
            StepStatus::Timeout => "timeout".into(),
            StepStatus::Skipped => "skipped".into(),
        },
        "session_id" => record.session_id.clone().unwrap_or_default(),
        "duration_ms" => record
            .duration_ms
            .map(|d| d.to_string())
            .unwrap_or_default(),
        _ => record
            .structured
            .as_ref()
            .and_then(|v| v.get(field))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default(),
    }
}

/// Replace every `$stepId.field` (default field: `output`) with the
/// recorded value. `$prev` resolves to the immediately preceding step.
/// Unknown steps resolve to the empty string.
pub fn resolve_refs(
    template: &str,
    results: &HashMap<String, StepRecord>,
    prev: Option<&str>,
) -> String {
    token_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let step = if &caps[1] == "prev" {
                match prev {
                    Some(p) => p,
                    None => return String::new(),
                }
            } else {
                &caps[1]
            };
            let field = caps.get(2).map(|m| m.as_str()).unwrap_or("output");
            results
                .get(step)
                .map(|r| field_value(r, field))
                .unwrap_or_default()
        })
        .into_owned()
}

fn truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "false" | "0" | "null")
}

/// Evaluate a condition expression. Supports `==`/`!=` comparisons on
/// resolved values, `!` negation, and bare truthiness.
pub fn eval_condition(
    expr: &str,
    results: &HashMap<String, StepRecord>,
    prev: Option<&str>,
) -> bool {
    let expr = expr.trim();

    if let Some((lhs, rhs)) = expr.split_once("==") {
        return resolve_side(lhs, results, prev) == resolve_side(rhs, results, prev);
    }
    if let Some((lhs, rhs)) = expr.split_once("!=") {
        return resolve_side(lhs, results, prev) != resolve_side(rhs, results, prev);
    }
    if let Some(inner) = expr.strip_prefix('!') {
        return !truthy(&resolve_refs(inner, results, prev));
    }
    truthy(&resolve_refs(expr, results, prev))
}

fn resolve_side(
    side: &str,
    results: &HashMap<String, StepRecord>,
    prev: Option<&str>,
) -> String {
    let resolved = resolve_refs(side.trim(), results, prev);
    resolved.trim().trim_matches(['"', '\'']).to_owned()
}

/// Transforms are template interpolation over prior step outputs.
pub fn eval_transform(
    expr: &str,
    results: &HashMap<String, StepRecord>,
    prev: Option<&str>,
) -> String {
    resolve_refs(expr, results, prev)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(output: Option<&str>, approved: Option<bool>) -> StepRecord {
        StepRecord {
            status: StepStatus::Completed,
            output: output.map(str::to_owned),
            approved,
            session_id: None,
            duration_ms: Some(12),
            structured: None,
        }
    }

    fn results() -> HashMap<String, StepRecord> {
        let mut map = HashMap::new();
        map.insert("draft".to_string(), record(Some("the draft text"), None));
        map.insert("review".to_string(), record(None, Some(true)));
        map
    }

    #[test]
    fn referenced_steps_finds_tokens() {
        assert_eq!(
            referenced_steps("use $draft.output and $prev"),
            vec!["draft".to_string(), "prev".to_string()]
        );
    }

    #[test]
    fn resolve_default_field_is_output() {
        assert_eq!(resolve_refs("$draft", &results(), None), "the draft text");
        assert_eq!(
            resolve_refs("before $draft.output after", &results(), None),
            "before the draft text after"
        );
    }

    #[test]
    fn prev_resolves_to_preceding_step() {
        assert_eq!(
            resolve_refs("$prev.output", &results(), Some("draft")),
            "the draft text"
        );
        assert_eq!(resolve_refs("$prev.output", &results(), None), "");
    }

    #[test]
    fn unknown_step_resolves_empty() {
        assert_eq!(resolve_refs("$ghost.output", &results(), None), "");
    }

    #[test]
    fn condition_on_approved() {
        assert!(eval_condition("$review.approved", &results(), None));
        assert!(!eval_condition("!$review.approved", &results(), None));
    }

    #[test]
    fn condition_equality() {
        assert!(eval_condition(
            "$draft.status == \"completed\"",
            &results(),
            None
        ));
        assert!(eval_condition("$draft.status != failed", &results(), None));
    }

    #[test]
    fn condition_falsy_forms() {
        let mut map = results();
        map.insert("empty".to_string(), record(Some(""), None));
        assert!(!eval_condition("$empty.output", &map, None));
        assert!(!eval_condition("$missing.output", &map, None));
    }

    #[test]
    fn transform_interpolates() {
        assert_eq!(
            eval_transform("published: $draft.output ($draft.duration_ms ms)", &results(), None),
            "published: the draft text (12 ms)"
        );
    }

    #[test]
    fn structured_field_lookup() {
        let mut map = HashMap::new();
        map.insert(
            "fetch".to_string(),
            StepRecord {
                status: StepStatus::Completed,
                output: None,
                approved: None,
                session_id: None,
                duration_ms: None,
                structured: Some(serde_json::json!({"url": "https://example.com"})),
            },
        );
        assert_eq!(
            resolve_refs("$fetch.url", &map, None),
            "https://example.com"
        );
    }
}
