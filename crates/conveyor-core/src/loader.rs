//! Declarative loader: JSON documents to ready-to-execute workflows.
//!
//! The document shapes live in `conveyor-types::document`; this module
//! validates them, resolves step types through the [`StepRegistry`], applies
//! the configuration fields via the validating setters, and seeds initial
//! parameters. Parameters are set before the step is added to the workflow,
//! so they stay step-local and do not bubble into the workflow store.

use std::fs;
use std::io::Read;
use std::path::Path;

use conveyor_types::document::{DocumentRoot, StepDocument, WorkflowDocument};
use serde_json::Value;
use thiserror::Error;

use crate::params::ParamsError;
use crate::registry::{RegistryError, StepRegistry};
use crate::step::{ConfigError, Step};
use crate::workflow::Workflow;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building a workflow from a document.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The document was not valid JSON of the expected shape.
    #[error("invalid workflow document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The document could not be read.
    #[error("failed to read workflow document: {0}")]
    Io(#[from] std::io::Error),

    /// A step's `type` is not in the registry.
    #[error(transparent)]
    UnknownKind(#[from] RegistryError),

    /// A configuration field failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A parameter key failed validation.
    #[error(transparent)]
    Params(#[from] ParamsError),

    /// An initial parameter carried an array or object value.
    #[error("cannot assign value '{value}' to parameter '{key}' on step '{step}' - only scalar values are supported")]
    NonScalarParameter {
        step: String,
        key: String,
        value: Value,
    },
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Builds workflows from declarative JSON documents.
pub struct Loader {
    registry: StepRegistry,
}

impl Loader {
    pub fn new(registry: StepRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Build a workflow from a JSON string.
    pub fn from_str(&self, json: &str) -> Result<Workflow, LoadError> {
        let root: DocumentRoot = serde_json::from_str(json)?;
        self.build(root)
    }

    /// Build a workflow from a JSON reader.
    pub fn from_reader(&self, reader: impl Read) -> Result<Workflow, LoadError> {
        let root: DocumentRoot = serde_json::from_reader(reader)?;
        self.build(root)
    }

    /// Build a workflow from a JSON file on disk.
    pub fn from_file(&self, path: impl AsRef<Path>) -> Result<Workflow, LoadError> {
        let data = fs::read_to_string(path)?;
        self.from_str(&data)
    }

    fn build(&self, root: DocumentRoot) -> Result<Workflow, LoadError> {
        let doc = match root {
            DocumentRoot::Workflow(doc) => doc,
            DocumentRoot::Steps(steps) => WorkflowDocument {
                name: None,
                timeout: None,
                steps,
            },
        };

        let mut workflow = Workflow::new();
        if let Some(name) = &doc.name {
            workflow.set_name(name);
        }
        if let Some(timeout) = &doc.timeout {
            workflow.set_timeout(timeout)?;
        }
        for step_doc in doc.steps {
            let step = self.build_step(step_doc)?;
            workflow.add(step);
        }

        tracing::debug!(
            workflow = workflow.name().unwrap_or(""),
            steps = workflow.steps().len(),
            "loaded workflow document"
        );
        Ok(workflow)
    }

    fn build_step(&self, doc: StepDocument) -> Result<Step, LoadError> {
        let mut step = self.registry.create(&doc.kind)?;
        if let Some(name) = &doc.name {
            step.set_name(name)?;
        }
        if let Some(timeout) = &doc.timeout {
            step.set_timeout(timeout)?;
        }
        if let Some(max_retries) = doc.max_retries {
            step.set_max_retries(max_retries);
        }
        if let Some(wait) = &doc.wait_between_tries {
            step.set_wait_between_tries(wait)?;
        }
        step.set_optional(doc.optional);
        step.set_always_run(doc.always_run);

        for (key, value) in doc.params {
            if value.is_array() || value.is_object() {
                return Err(LoadError::NonScalarParameter {
                    step: step.name().to_string(),
                    key,
                    value,
                });
            }
            step.params().add(key, value)?;
        }
        Ok(step)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
