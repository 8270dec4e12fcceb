//! The orchestration engine: ordered step execution with per-step and
//! whole-workflow timeouts, retries with parameter rollback, optional and
//! always-run failure rules, and cooperative halt.
//!
//! # Execution flow
//!
//! 1. `execute` spawns the step-iteration routine as a detached task and
//!    awaits it, bounded by the workflow timeout if one is set.
//! 2. The iteration routine walks steps in declared order. Once a
//!    non-optional step has exhausted its retries, later steps are skipped
//!    unless marked always-run; the first fatal error is remembered and
//!    re-raised only after always-run steps had their chance.
//! 3. Each attempt runs the step body on its own task so it can be
//!    time-bounded and aborted. Before the attempt the parameter stores are
//!    snapshotted; after a failed attempt they are rolled back, so a retry
//!    never sees half-applied writes.
//!
//! Interruption (via [`Workflow::halt`] or task abort) is never retried and
//! fails the whole run immediately.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use conveyor_types::duration::TimeSpan;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::params::{ParameterStore, Params};
use crate::step::{ConfigError, Step};

// ---------------------------------------------------------------------------
// WorkflowError
// ---------------------------------------------------------------------------

/// Errors surfaced by [`Workflow::execute`].
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The whole workflow exceeded its configured timeout.
    #[error("execution of workflow{} timed out after {}", quoted(.workflow), .timeout)]
    WorkflowTimeout {
        workflow: Option<String>,
        timeout: TimeSpan,
    },

    /// A non-optional step exhausted its retries on timeouts.
    #[error("execution of workflow step '{step}' timed out after {timeout}")]
    StepTimeout { step: String, timeout: TimeSpan },

    /// The run was halted, or a step task was aborted from outside.
    #[error("workflow execution interrupted")]
    Interrupted,

    /// `execute` was called while a run was already in flight.
    #[error("workflow is already executing")]
    AlreadyExecuting,

    /// The original error a non-optional step raised, re-surfaced as-is.
    #[error(transparent)]
    Step(#[from] anyhow::Error),

    /// A join failure that is neither a panic nor a cancellation.
    #[error("unexpected execution failure: {0}")]
    Internal(String),
}

fn quoted(workflow: &Option<String>) -> String {
    match workflow {
        Some(name) => format!(" '{name}'"),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// RetryWait
// ---------------------------------------------------------------------------

/// Hook invoked between a failed attempt and its retry.
///
/// The default implementation sleeps for the step's configured
/// wait-between-tries span; embedders may substitute backoff policies or
/// instrumentation via [`Workflow::set_retry_wait`].
pub trait RetryWait: Send + Sync + 'static {
    fn wait<'a>(
        &'a self,
        step: &'a str,
        span: TimeSpan,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Plain constant-time sleep.
struct SleepRetryWait;

impl RetryWait for SleepRetryWait {
    fn wait<'a>(
        &'a self,
        _step: &'a str,
        span: TimeSpan,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if let Some(pause) = span.to_duration() {
                tokio::time::sleep(pause).await;
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// The in-flight step attempt, tracked for introspection and halt.
struct CurrentStep {
    step: Arc<Step>,
    abort: AbortHandle,
}

/// Transient execution state shared with the iteration task.
#[derive(Default)]
struct ExecState {
    executing: AtomicBool,
    successful: AtomicBool,
    current: Mutex<Option<CurrentStep>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ExecState {
    fn current(&self) -> MutexGuard<'_, Option<CurrentStep>> {
        self.current.lock().expect("current step lock poisoned")
    }

    fn cancel(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().expect("cancel token lock poisoned")
    }
}

/// An ordered collection of steps executed sequentially under an overall
/// timeout.
///
/// Build it, [`add`](Workflow::add) configured steps (which binds their
/// parameter delegation), then [`execute`](Workflow::execute). Wrap in an
/// `Arc` to observe or [`halt`](Workflow::halt) a run from elsewhere.
pub struct Workflow {
    name: Option<String>,
    timeout: TimeSpan,
    steps: Vec<Arc<Step>>,
    store: Arc<Mutex<ParameterStore>>,
    params: Params,
    retry_wait: Arc<dyn RetryWait>,
    exec: Arc<ExecState>,
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

impl Workflow {
    pub fn new() -> Self {
        let store = Arc::new(Mutex::new(ParameterStore::new()));
        Self {
            name: None,
            timeout: TimeSpan::disabled(),
            steps: Vec::new(),
            params: Params::over(Arc::clone(&store)),
            store,
            retry_wait: Arc::new(SleepRetryWait),
            exec: Arc::new(ExecState::default()),
        }
    }

    // -- configuration ---------------------------------------------------

    /// Name the workflow. The name is trimmed; blank collapses to unnamed.
    pub fn set_name(&mut self, name: &str) {
        let trimmed = name.trim();
        self.name = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set the overall timeout from a tuple string such as `"5 MINUTES"`.
    pub fn set_timeout(&mut self, tuple: &str) -> Result<(), ConfigError> {
        self.timeout = TimeSpan::parse(tuple)?;
        Ok(())
    }

    /// Set the overall timeout directly. Non-positive spans disable it.
    pub fn set_timeout_span(&mut self, span: TimeSpan) {
        self.timeout = span;
    }

    pub fn timeout(&self) -> TimeSpan {
        self.timeout
    }

    /// Replace the pause-between-retries hook.
    pub fn set_retry_wait(&mut self, hook: impl RetryWait) {
        self.retry_wait = Arc::new(hook);
    }

    /// Append a step, binding its parameter reads/writes to this workflow's
    /// store. Returns a shared handle for inspection after execution.
    pub fn add(&mut self, mut step: Step) -> Arc<Step> {
        step.bind(Arc::clone(&self.store));
        let step = Arc::new(step);
        self.steps.push(Arc::clone(&step));
        step
    }

    /// The steps in declared order.
    pub fn steps(&self) -> &[Arc<Step>] {
        &self.steps
    }

    /// The workflow-level parameter handle.
    pub fn params(&self) -> &Params {
        &self.params
    }

    // -- introspection ---------------------------------------------------

    /// Whether a run is currently in flight.
    pub fn is_executing(&self) -> bool {
        self.exec.executing.load(Ordering::SeqCst)
    }

    /// Whether the last run completed successfully.
    pub fn is_successful(&self) -> bool {
        self.exec.successful.load(Ordering::SeqCst)
    }

    /// The step whose attempt is currently in flight, if any.
    pub fn current_step(&self) -> Option<Arc<Step>> {
        self.exec.current().as_ref().map(|c| Arc::clone(&c.step))
    }

    /// Try count of the in-flight step, if any.
    pub fn current_step_tries(&self) -> Option<u32> {
        self.current_step().map(|step| step.times_tried())
    }

    // -- execution -------------------------------------------------------

    /// Run all steps to completion or failure.
    ///
    /// Resolves with `Ok(())` on success (including runs where only
    /// optional steps failed), or with exactly one error: a workflow- or
    /// step-scoped timeout, [`WorkflowError::Interrupted`] after a halt, or
    /// the original error a non-optional step raised.
    pub async fn execute(&self) -> Result<(), WorkflowError> {
        if self
            .exec
            .executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WorkflowError::AlreadyExecuting);
        }
        self.exec.successful.store(false, Ordering::SeqCst);

        let token = CancellationToken::new();
        *self.exec.cancel() = Some(token.clone());

        tracing::info!(
            workflow = self.name.as_deref().unwrap_or(""),
            steps = self.steps.len(),
            "starting workflow execution"
        );

        let runner = Runner {
            steps: self.steps.clone(),
            retry_wait: Arc::clone(&self.retry_wait),
            exec: Arc::clone(&self.exec),
            token: token.clone(),
        };
        let mut task: JoinHandle<Result<(), WorkflowError>> = tokio::spawn(runner.run());

        let result = match self.timeout.to_duration() {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => flatten_join(joined),
                Err(_elapsed) => {
                    task.abort();
                    Err(WorkflowError::WorkflowTimeout {
                        workflow: self.name.clone(),
                        timeout: self.timeout,
                    })
                }
            },
            None => flatten_join((&mut task).await),
        };

        // Cleanup, on every path: nothing may outlive the run.
        task.abort();
        token.cancel();
        if let Some(current) = self.exec.current().take() {
            current.abort.abort();
        }
        *self.exec.cancel() = None;
        self.exec.executing.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => tracing::info!(
                workflow = self.name.as_deref().unwrap_or(""),
                "workflow execution completed"
            ),
            Err(err) => tracing::warn!(
                workflow = self.name.as_deref().unwrap_or(""),
                error = %err,
                "workflow execution failed"
            ),
        }
        result
    }

    /// Best-effort cooperative cancellation of an in-flight run: signals the
    /// run's cancellation token and aborts the active step task. Safe to
    /// call from any thread at any phase; a no-op when not executing. A
    /// step body that never yields cannot be forcibly stopped.
    pub fn halt(&self) {
        if !self.is_executing() {
            return;
        }
        tracing::info!(
            workflow = self.name.as_deref().unwrap_or(""),
            "halting workflow execution"
        );
        if let Some(token) = self.exec.cancel().clone() {
            token.cancel();
        }
        if let Some(current) = self.exec.current().as_ref() {
            current.abort.abort();
        }
    }
}

/// Map the join result of the iteration task onto the error taxonomy.
fn flatten_join(joined: Result<Result<(), WorkflowError>, JoinError>) -> Result<(), WorkflowError> {
    match joined {
        Ok(inner) => inner,
        Err(join) if join.is_cancelled() => Err(WorkflowError::Interrupted),
        Err(join) => match join.try_into_panic() {
            Ok(payload) => Err(WorkflowError::Step(anyhow::anyhow!(
                "step body panicked: {}",
                panic_message(payload.as_ref())
            ))),
            Err(join) => Err(WorkflowError::Internal(join.to_string())),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Runner: the step-iteration routine
// ---------------------------------------------------------------------------

/// Outcome of a single step attempt, classified for the retry loop.
enum Outcome {
    Success,
    TimedOut,
    Interrupted,
    Failed(anyhow::Error),
}

/// Owns everything the spawned iteration task needs.
struct Runner {
    steps: Vec<Arc<Step>>,
    retry_wait: Arc<dyn RetryWait>,
    exec: Arc<ExecState>,
    token: CancellationToken,
}

impl Runner {
    async fn run(self) -> Result<(), WorkflowError> {
        let mut can_continue = true;
        let mut first_timeout: Option<WorkflowError> = None;
        let mut first_failure: Option<WorkflowError> = None;

        for step in &self.steps {
            if self.token.is_cancelled() {
                return Err(WorkflowError::Interrupted);
            }
            if !can_continue && !step.is_always_run() {
                tracing::debug!(step = step.name(), "skipping step after earlier failure");
                step.skip();
                continue;
            }
            match self.run_step(step).await {
                Ok(()) => {}
                Err(WorkflowError::Interrupted) => return Err(WorkflowError::Interrupted),
                Err(err @ WorkflowError::StepTimeout { .. }) => {
                    can_continue = false;
                    first_timeout.get_or_insert(err);
                }
                Err(err) => {
                    can_continue = false;
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_timeout.or(first_failure) {
            Some(err) => Err(err),
            None => {
                self.exec.successful.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    /// Execute one step through its retry budget.
    ///
    /// Returns `Ok` when the step succeeded or was an exhausted optional
    /// step; returns the fatal error otherwise. Interruption short-circuits
    /// everything.
    async fn run_step(&self, step: &Arc<Step>) -> Result<(), WorkflowError> {
        while step.times_tried() <= step.max_retries() {
            step.start();
            step.params().snapshot();
            tracing::debug!(
                step = step.name(),
                try_number = step.times_tried(),
                "starting step attempt"
            );

            let work = step.work();
            let params = step.params().clone();
            let handle = tokio::spawn(async move { work.execute_dyn(params).await });
            *self.exec.current() = Some(CurrentStep {
                step: Arc::clone(step),
                abort: handle.abort_handle(),
            });

            let outcome = self.wait_for_attempt(step, handle).await;
            *self.exec.current() = None;

            match outcome {
                Outcome::Success => {
                    step.complete(None);
                    tracing::debug!(step = step.name(), "step completed");
                    return Ok(());
                }
                Outcome::Interrupted => {
                    step.complete(Some("execution interrupted".to_string()));
                    tracing::info!(step = step.name(), "step interrupted");
                    return Err(WorkflowError::Interrupted);
                }
                Outcome::TimedOut => {
                    tracing::warn!(
                        step = step.name(),
                        timeout = %step.timeout(),
                        try_number = step.times_tried(),
                        "step attempt timed out"
                    );
                    if step.times_tried() > step.max_retries() {
                        step.complete(Some(format!("timed out after {}", step.timeout())));
                        if !step.is_optional() {
                            return Err(WorkflowError::StepTimeout {
                                step: step.name().to_string(),
                                timeout: step.timeout(),
                            });
                        }
                    }
                }
                Outcome::Failed(err) => {
                    tracing::warn!(
                        step = step.name(),
                        error = %err,
                        try_number = step.times_tried(),
                        "step attempt failed"
                    );
                    if step.times_tried() > step.max_retries() {
                        step.complete(Some(err.to_string()));
                        if !step.is_optional() {
                            return Err(WorkflowError::Step(err));
                        }
                    }
                }
            }

            // Retry path (also the exit path of an exhausted optional
            // step): pause, then undo the failed attempt's writes.
            self.wait_before_retry(step).await?;
            step.params().rollback();
        }
        Ok(())
    }

    /// Await the attempt task, bounded by the step timeout if one is set
    /// and racing the run's cancellation token.
    async fn wait_for_attempt(
        &self,
        step: &Arc<Step>,
        mut handle: JoinHandle<anyhow::Result<()>>,
    ) -> Outcome {
        let abort = handle.abort_handle();
        let wait = async {
            tokio::select! {
                joined = &mut handle => attempt_outcome(joined),
                _ = self.token.cancelled() => Outcome::Interrupted,
            }
        };
        let outcome = match step.timeout().to_duration() {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Outcome::TimedOut),
            None => wait.await,
        };
        // The attempt must not outlive our interest in it.
        abort.abort();
        outcome
    }

    async fn wait_before_retry(&self, step: &Arc<Step>) -> Result<(), WorkflowError> {
        tokio::select! {
            _ = self.retry_wait.wait(step.name(), step.wait_between_tries()) => Ok(()),
            _ = self.token.cancelled() => Err(WorkflowError::Interrupted),
        }
    }
}

/// Classify the join result of one attempt task.
fn attempt_outcome(joined: Result<anyhow::Result<()>, JoinError>) -> Outcome {
    match joined {
        Ok(Ok(())) => Outcome::Success,
        Ok(Err(err)) => Outcome::Failed(err),
        Err(join) if join.is_cancelled() => Outcome::Interrupted,
        Err(join) => match join.try_into_panic() {
            Ok(payload) => Outcome::Failed(anyhow::anyhow!(
                "step body panicked: {}",
                panic_message(payload.as_ref())
            )),
            Err(join) => Outcome::Failed(anyhow::anyhow!("step task failed: {join}")),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
