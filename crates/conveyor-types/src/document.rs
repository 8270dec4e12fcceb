//! Declarative JSON document shapes consumed by the workflow loader.
//!
//! These are plain serde types with no behavior; validation (scalar-only
//! parameters, registry resolution, tuple parsing) happens in the loader.

use serde::Deserialize;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Document root
// ---------------------------------------------------------------------------

/// The root of a workflow document.
///
/// Either a full workflow object (`{"name": ..., "timeout": ..., "steps":
/// [...]}`) or, as a shorthand, a bare array of step objects for an unnamed,
/// untimed workflow.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DocumentRoot {
    /// A workflow object with optional metadata.
    Workflow(WorkflowDocument),
    /// A bare list of steps.
    Steps(Vec<StepDocument>),
}

// ---------------------------------------------------------------------------
// WorkflowDocument
// ---------------------------------------------------------------------------

/// The declarative form of a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDocument {
    /// Workflow name; blank or missing means unnamed.
    #[serde(default)]
    pub name: Option<String>,
    /// Overall timeout as a time-tuple string (e.g. `"5 MINUTES"`).
    #[serde(default)]
    pub timeout: Option<String>,
    /// Steps, executed in declared order.
    #[serde(default)]
    pub steps: Vec<StepDocument>,
}

// ---------------------------------------------------------------------------
// StepDocument
// ---------------------------------------------------------------------------

/// The declarative form of a single step.
///
/// `kind` is the registry identifier of the step implementation. Every field
/// not listed here is collected into `params` and becomes an initial
/// parameter on the constructed step; only scalar values are allowed there.
#[derive(Debug, Clone, Deserialize)]
pub struct StepDocument {
    /// Registry identifier of the step implementation.
    #[serde(rename = "type")]
    pub kind: String,
    /// Step name override.
    #[serde(default)]
    pub name: Option<String>,
    /// Per-attempt timeout as a time-tuple string.
    #[serde(default)]
    pub timeout: Option<String>,
    /// How many times to retry after a failed attempt.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Pause between a failed attempt and its retry, as a time-tuple string.
    #[serde(default)]
    pub wait_between_tries: Option<String>,
    /// Whether an exhausted failure of this step is ignored.
    #[serde(default)]
    pub optional: bool,
    /// Whether this step runs even after the workflow has already failed.
    #[serde(default)]
    pub always_run: bool,
    /// Initial parameters: every unrecognized field lands here.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_object_root() {
        let doc: DocumentRoot = serde_json::from_value(json!({
            "name": "nightly",
            "timeout": "5 MINUTES",
            "steps": [{ "type": "noop" }]
        }))
        .unwrap();

        match doc {
            DocumentRoot::Workflow(wf) => {
                assert_eq!(wf.name.as_deref(), Some("nightly"));
                assert_eq!(wf.timeout.as_deref(), Some("5 MINUTES"));
                assert_eq!(wf.steps.len(), 1);
                assert_eq!(wf.steps[0].kind, "noop");
            }
            DocumentRoot::Steps(_) => panic!("expected workflow root"),
        }
    }

    #[test]
    fn test_bare_array_root() {
        let doc: DocumentRoot = serde_json::from_value(json!([
            { "type": "noop" },
            { "type": "noop", "name": "second" }
        ]))
        .unwrap();

        match doc {
            DocumentRoot::Steps(steps) => {
                assert_eq!(steps.len(), 2);
                assert_eq!(steps[1].name.as_deref(), Some("second"));
            }
            DocumentRoot::Workflow(_) => panic!("expected steps root"),
        }
    }

    #[test]
    fn test_extra_fields_become_params() {
        let step: StepDocument = serde_json::from_value(json!({
            "type": "fetch",
            "timeout": "10 SECONDS",
            "url": "https://example.com",
            "attempts": 3,
            "audit": null
        }))
        .unwrap();

        assert_eq!(step.kind, "fetch");
        assert_eq!(step.timeout.as_deref(), Some("10 SECONDS"));
        assert_eq!(step.params.len(), 3);
        assert_eq!(step.params["url"], json!("https://example.com"));
        assert_eq!(step.params["attempts"], json!(3));
        assert_eq!(step.params["audit"], Value::Null);
    }

    #[test]
    fn test_missing_kind_is_an_error() {
        let result: Result<StepDocument, _> =
            serde_json::from_value(json!({ "name": "typeless" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_flag_defaults() {
        let step: StepDocument = serde_json::from_value(json!({ "type": "noop" })).unwrap();
        assert!(!step.optional);
        assert!(!step.always_run);
        assert_eq!(step.max_retries, None);
    }
}
