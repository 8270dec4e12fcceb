//! Mapping from step type identifiers to step factories.
//!
//! The declarative loader resolves the `type` field of a step document
//! through this registry instead of any runtime reflection: embedders
//! register every step implementation once at startup, under the identifier
//! their documents use.

use std::collections::HashMap;

use thiserror::Error;

use crate::step::{Step, Work};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from registry lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No factory is registered under the requested identifier.
    #[error("no step type registered under '{0}'")]
    UnknownKind(String),
}

// ---------------------------------------------------------------------------
// StepRegistry
// ---------------------------------------------------------------------------

type StepFactory = Box<dyn Fn() -> Step + Send + Sync>;

/// Registry of step factories keyed by type identifier.
#[derive(Default)]
pub struct StepRegistry {
    factories: HashMap<String, StepFactory>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `Default`-constructible work type under `kind`.
    pub fn register<W: Work + Default>(&mut self, kind: impl Into<String>) {
        self.register_fn(kind, || Step::new(W::default()));
    }

    /// Register an arbitrary step factory under `kind`, for work types that
    /// need construction arguments.
    pub fn register_fn(
        &mut self,
        kind: impl Into<String>,
        factory: impl Fn() -> Step + Send + Sync + 'static,
    ) {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Construct a fresh, unconfigured step of the given kind.
    pub fn create(&self, kind: &str) -> Result<Step, RegistryError> {
        self.factories
            .get(kind)
            .map(|factory| factory())
            .ok_or_else(|| RegistryError::UnknownKind(kind.to_string()))
    }

    /// Whether a factory is registered under `kind`.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// All registered identifiers, sorted ascending.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;

    #[derive(Default)]
    struct Probe;

    impl Work for Probe {
        async fn execute(&self, _params: Params) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = StepRegistry::new();
        registry.register::<Probe>("probe");

        assert!(registry.contains("probe"));
        let step = registry.create("probe").unwrap();
        assert_eq!(step.name(), "Probe");
    }

    #[test]
    fn test_unknown_kind() {
        let registry = StepRegistry::new();
        let err = registry.create("missing").unwrap_err();
        assert_eq!(err, RegistryError::UnknownKind("missing".to_string()));
        assert_eq!(
            err.to_string(),
            "no step type registered under 'missing'"
        );
    }

    #[test]
    fn test_register_fn_with_preconfigured_step() {
        let mut registry = StepRegistry::new();
        registry.register_fn("tuned-probe", || {
            let mut step = Step::new(Probe);
            step.set_max_retries(3);
            step
        });

        let step = registry.create("tuned-probe").unwrap();
        assert_eq!(step.max_retries(), 3);
    }

    #[test]
    fn test_each_create_returns_a_fresh_step() {
        let mut registry = StepRegistry::new();
        registry.register::<Probe>("probe");

        let first = registry.create("probe").unwrap();
        first.params().add("scratch", 1).unwrap();
        let second = registry.create("probe").unwrap();
        assert!(!second.params().has("scratch"));
    }

    #[test]
    fn test_kinds_sorted() {
        let mut registry = StepRegistry::new();
        registry.register::<Probe>("zeta");
        registry.register::<Probe>("alpha");
        assert_eq!(registry.kinds(), vec!["alpha", "zeta"]);
    }
}
