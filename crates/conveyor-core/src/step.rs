//! The unit of work: configuration, lifecycle state, and the `Work` trait
//! concrete steps implement.
//!
//! A `Step` owns its metadata (name, timeout, retry policy, optional and
//! always-run flags), a private parameter store chained to the owning
//! workflow once added, and the runtime state the orchestrator drives
//! through `start`/`complete`/`skip`. The only thing a step author writes
//! is the `Work` body.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use conveyor_types::duration::{TimeSpan, TimeSpanError};
use thiserror::Error;

use crate::params::{ParameterStore, Params};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from step and workflow configuration setters.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A step name was empty or all whitespace.
    #[error("step names may not be blank")]
    BlankName,

    /// A time-tuple string did not parse.
    #[error(transparent)]
    Span(#[from] TimeSpanError),
}

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

/// The body of a step. This is the single operation a concrete step
/// implements; everything else (timeouts, retries, rollback, skipping) is
/// the orchestrator's business.
///
/// Bodies receive a [`Params`] handle whose writes bubble to the owning
/// workflow, and report failure through `anyhow::Error`; whatever error a
/// body returns is what the workflow re-raises once retries are exhausted.
/// A body must reach an `.await` point to be cancellable.
pub trait Work: Send + Sync + 'static {
    fn execute(&self, params: Params) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Object-safe version of [`Work`] with a boxed future.
///
/// Exists solely to enable dynamic dispatch; a blanket implementation
/// covers every `Work` type.
pub trait WorkDyn: Send + Sync {
    fn execute_dyn<'a>(
        &'a self,
        params: Params,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

impl<W: Work> WorkDyn for W {
    fn execute_dyn<'a>(
        &'a self,
        params: Params,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(self.execute(params))
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Mutable runtime state, driven only by the orchestrator.
#[derive(Debug, Default)]
struct StepState {
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    ended: Option<Instant>,
    ended_at: Option<DateTime<Utc>>,
    completed: bool,
    skipped: bool,
    tries: u32,
    failure: Option<String>,
}

/// A single unit of work inside a workflow.
///
/// Created detached, configured through the validating setters, then moved
/// into a workflow with [`Workflow::add`](crate::workflow::Workflow::add),
/// which binds the parameter delegation chain and hands back an
/// `Arc<Step>` for later inspection.
pub struct Step {
    name: String,
    timeout: TimeSpan,
    max_retries: u32,
    wait_between_tries: TimeSpan,
    optional: bool,
    always_run: bool,
    params: Params,
    state: Mutex<StepState>,
    work: Arc<dyn WorkDyn>,
}

impl Step {
    /// Create a step around a work body. The name defaults to the body's
    /// type name and can be overridden with [`Step::set_name`].
    pub fn new<W: Work>(work: W) -> Self {
        Self {
            name: derived_name::<W>(),
            timeout: TimeSpan::disabled(),
            max_retries: 0,
            wait_between_tries: TimeSpan::disabled(),
            optional: false,
            always_run: false,
            params: Params::detached(),
            state: Mutex::new(StepState::default()),
            work: Arc::new(work),
        }
    }

    // -- configuration ---------------------------------------------------

    /// Rename the step. Blank names are rejected.
    pub fn set_name(&mut self, name: &str) -> Result<(), ConfigError> {
        if name.trim().is_empty() {
            return Err(ConfigError::BlankName);
        }
        self.name = name.to_string();
        Ok(())
    }

    /// Set the per-attempt timeout from a tuple string such as
    /// `"10 SECONDS"`.
    pub fn set_timeout(&mut self, tuple: &str) -> Result<(), ConfigError> {
        self.timeout = TimeSpan::parse(tuple)?;
        Ok(())
    }

    /// Set the per-attempt timeout directly. Non-positive spans disable it.
    pub fn set_timeout_span(&mut self, span: TimeSpan) {
        self.timeout = span;
    }

    /// How many times to retry after a failed or timed-out attempt.
    pub fn set_max_retries(&mut self, max_retries: u32) {
        self.max_retries = max_retries;
    }

    /// Set the pause between a failed attempt and its retry from a tuple
    /// string.
    pub fn set_wait_between_tries(&mut self, tuple: &str) -> Result<(), ConfigError> {
        self.wait_between_tries = TimeSpan::parse(tuple)?;
        Ok(())
    }

    /// Set the retry pause directly. Non-positive spans disable it.
    pub fn set_wait_between_tries_span(&mut self, span: TimeSpan) {
        self.wait_between_tries = span;
    }

    /// An optional step's exhausted failure does not fail the workflow.
    pub fn set_optional(&mut self, optional: bool) {
        self.optional = optional;
    }

    /// An always-run step executes even after the workflow has already
    /// failed.
    pub fn set_always_run(&mut self, always_run: bool) {
        self.always_run = always_run;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> TimeSpan {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn wait_between_tries(&self) -> TimeSpan {
        self.wait_between_tries
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_always_run(&self) -> bool {
        self.always_run
    }

    /// The step's parameter handle. Reads fall back to the owning
    /// workflow's store; writes bubble to it.
    pub fn params(&self) -> &Params {
        &self.params
    }

    // -- runtime state ---------------------------------------------------

    /// Whether the step reached a terminal state (succeeded, failed, or
    /// skipped).
    pub fn is_completed(&self) -> bool {
        self.state().completed
    }

    /// Whether no failure cause has been recorded.
    pub fn is_successful(&self) -> bool {
        self.state().failure.is_none()
    }

    /// Whether the step was bypassed because a prior non-optional step had
    /// already failed.
    pub fn was_skipped(&self) -> bool {
        self.state().skipped
    }

    /// How many times the step entered execution.
    pub fn times_tried(&self) -> u32 {
        self.state().tries
    }

    /// The recorded failure cause, if any.
    pub fn failure(&self) -> Option<String> {
        self.state().failure.clone()
    }

    /// Elapsed execution time: `None` if the step never started, a running
    /// total while executing, and a frozen total once completed.
    pub fn time_running(&self) -> Option<Duration> {
        let state = self.state();
        let started = state.started?;
        if state.completed {
            state.ended.map(|ended| ended.duration_since(started))
        } else {
            Some(started.elapsed())
        }
    }

    /// Wall-clock time the current (or last) attempt started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state().started_at
    }

    /// Wall-clock time the step completed or was skipped.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.state().ended_at
    }

    // -- orchestrator-only lifecycle -------------------------------------

    /// Begin an attempt: clears the completed flag, records the start time,
    /// and counts the try.
    pub(crate) fn start(&self) {
        let mut state = self.state();
        state.completed = false;
        state.started = Some(Instant::now());
        state.started_at = Some(Utc::now());
        state.tries += 1;
    }

    /// Finish the step. `cause` of `None` means success.
    pub(crate) fn complete(&self, cause: Option<String>) {
        let mut state = self.state();
        state.ended = Some(Instant::now());
        state.ended_at = Some(Utc::now());
        state.completed = true;
        state.failure = cause;
    }

    /// Bypass the step entirely: completed and skipped, with zero elapsed
    /// time.
    pub(crate) fn skip(&self) {
        let now = Instant::now();
        let wall = Utc::now();
        let mut state = self.state();
        state.started = Some(now);
        state.started_at = Some(wall);
        state.ended = Some(now);
        state.ended_at = Some(wall);
        state.completed = true;
        state.skipped = true;
    }

    /// Chain this step's parameter reads/writes to the owning workflow's
    /// store. Called once, by `Workflow::add`.
    pub(crate) fn bind(&mut self, parent: Arc<Mutex<ParameterStore>>) {
        self.params.bind_parent(parent);
    }

    /// The work body, shared so an attempt can be spawned as a task.
    pub(crate) fn work(&self) -> Arc<dyn WorkDyn> {
        Arc::clone(&self.work)
    }

    fn state(&self) -> MutexGuard<'_, StepState> {
        self.state.lock().expect("step state lock poisoned")
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("optional", &self.optional)
            .field("always_run", &self.always_run)
            .finish_non_exhaustive()
    }
}

/// Last path segment of the work type's name, e.g. `my_app::steps::Fetch`
/// becomes `Fetch`.
fn derived_name<W>() -> String {
    let full = type_name::<W>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_types::duration::TimeUnit;

    struct Noop;

    impl Work for Noop {
        async fn execute(&self, _params: Params) -> anyhow::Result<()> {
            Ok(())
        }
    }

    // -------------------------------------------------------------------
    // Naming
    // -------------------------------------------------------------------

    #[test]
    fn test_default_name_is_type_derived() {
        let step = Step::new(Noop);
        assert_eq!(step.name(), "Noop");
    }

    #[test]
    fn test_explicit_name() {
        let mut step = Step::new(Noop);
        step.set_name("fetch-artifacts").unwrap();
        assert_eq!(step.name(), "fetch-artifacts");
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut step = Step::new(Noop);
        assert!(matches!(step.set_name("   "), Err(ConfigError::BlankName)));
        assert!(matches!(step.set_name(""), Err(ConfigError::BlankName)));
        assert_eq!(step.name(), "Noop");
    }

    // -------------------------------------------------------------------
    // Timeout and retry configuration
    // -------------------------------------------------------------------

    #[test]
    fn test_default_config() {
        let step = Step::new(Noop);
        assert!(!step.timeout().is_enabled());
        assert_eq!(step.max_retries(), 0);
        assert!(!step.wait_between_tries().is_enabled());
        assert!(!step.is_optional());
        assert!(!step.is_always_run());
    }

    #[test]
    fn test_timeout_from_tuple_string() {
        let mut step = Step::new(Noop);
        step.set_timeout("1 MINUTE").unwrap();
        assert_eq!(step.timeout().value(), 1);
        assert_eq!(step.timeout().unit(), Some(TimeUnit::Minutes));

        step.set_timeout("5 HOURS").unwrap();
        assert_eq!(step.timeout().value(), 5);
        assert_eq!(step.timeout().unit(), Some(TimeUnit::Hours));

        step.set_timeout("5").unwrap();
        assert_eq!(step.timeout().unit(), Some(TimeUnit::Seconds));
    }

    #[test]
    fn test_bad_timeout_strings_rejected() {
        let mut step = Step::new(Noop);
        assert!(step.set_timeout("").is_err());
        assert!(step.set_timeout("   ").is_err());
        assert!(step.set_timeout("1 LIGHTYEAR").is_err());
        assert!(step.set_timeout("Q MINUTES").is_err());
    }

    #[test]
    fn test_negative_timeout_collapses_to_disabled() {
        let mut step = Step::new(Noop);
        step.set_timeout_span(TimeSpan::new(-5, TimeUnit::Seconds));
        assert_eq!(step.timeout().value(), -1);
        assert!(!step.timeout().is_enabled());
    }

    #[test]
    fn test_wait_between_tries_from_tuple_string() {
        let mut step = Step::new(Noop);
        step.set_wait_between_tries("1 MINUTE").unwrap();
        assert_eq!(step.wait_between_tries().value(), 1);
        assert_eq!(step.wait_between_tries().unit(), Some(TimeUnit::Minutes));

        assert!(step.set_wait_between_tries("1 LIGHTYEAR").is_err());
    }

    #[test]
    fn test_optional_and_always_run_flags() {
        let mut step = Step::new(Noop);
        step.set_optional(true);
        assert!(step.is_optional());
        step.set_optional(false);
        assert!(!step.is_optional());
        step.set_always_run(true);
        assert!(step.is_always_run());
    }

    // -------------------------------------------------------------------
    // Lifecycle and time-running
    // -------------------------------------------------------------------

    #[test]
    fn test_time_running_lifecycle() {
        let step = Step::new(Noop);
        assert_eq!(step.time_running(), None);

        step.start();
        std::thread::sleep(Duration::from_millis(2));
        assert!(!step.is_completed());

        let running = step.time_running().unwrap();
        assert!(running > Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(step.time_running().unwrap() > running);

        step.complete(None);
        assert!(step.is_completed());
        assert!(step.is_successful());

        let frozen = step.time_running().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(step.time_running().unwrap(), frozen);
    }

    #[test]
    fn test_start_counts_tries_and_clears_completed() {
        let step = Step::new(Noop);
        assert_eq!(step.times_tried(), 0);
        step.start();
        step.complete(Some("boom".to_string()));
        assert!(step.is_completed());
        assert!(!step.is_successful());
        assert_eq!(step.failure().as_deref(), Some("boom"));

        step.start();
        assert!(!step.is_completed());
        assert_eq!(step.times_tried(), 2);

        step.complete(None);
        assert!(step.is_successful());
        assert_eq!(step.failure(), None);
    }

    #[test]
    fn test_skip_marks_completed_with_zero_elapsed() {
        let step = Step::new(Noop);
        step.skip();
        assert!(step.is_completed());
        assert!(step.was_skipped());
        assert!(step.is_successful());
        assert_eq!(step.time_running(), Some(Duration::ZERO));
        assert!(step.started_at().is_some());
        assert_eq!(step.started_at(), step.ended_at());
    }
}
