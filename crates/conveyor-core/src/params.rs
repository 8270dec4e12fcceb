//! Versioned parameter store with snapshot/rollback, and the shared handle
//! that bubbles step-level operations up to the owning workflow.
//!
//! Each key maps to a version stack of frames, most recent last. `snapshot`
//! duplicates the top frame of every existing key as a checkpoint; `rollback`
//! undoes everything since the previous snapshot, deleting keys that were
//! never snapshotted. This is what lets a retried step start from clean
//! state instead of seeing half-applied writes from its failed attempt.
//!
//! `ParameterStore` itself provides no thread-safety; sharing between the
//! orchestrator and a running step body goes through `Params`, which wraps
//! the store in `Arc<Mutex<..>>` and applies the delegation rules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from parameter mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    /// `add` was called with an empty key.
    #[error("parameter keys may not be empty")]
    EmptyKey,
}

// ---------------------------------------------------------------------------
// ParameterStore
// ---------------------------------------------------------------------------

/// A frame holds one value; `None` is the absent marker left by `remove`.
type Frame = Option<Value>;

/// Versioned key/value mapping supporting snapshot and rollback.
///
/// Read operations never fail; querying or removing a missing key is a
/// no-op. The only error is adding under an empty key.
#[derive(Debug, Default)]
pub struct ParameterStore {
    values: HashMap<String, Vec<Frame>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value` in the top frame, creating the key with a single
    /// frame if it does not exist. Never pushes a frame.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), ParamsError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ParamsError::EmptyKey);
        }
        let stack = self.values.entry(key).or_insert_with(|| vec![None]);
        *stack.last_mut().expect("version stacks are never empty") = Some(value.into());
        Ok(())
    }

    /// Blank out the top frame of `key` without popping it, so the key's
    /// version history survives for `num_versions`. Missing key is a no-op.
    pub fn remove(&mut self, key: &str) {
        if let Some(stack) = self.values.get_mut(key) {
            *stack.last_mut().expect("version stacks are never empty") = None;
        }
    }

    /// Whether `key` currently holds a value.
    pub fn has(&self, key: &str) -> bool {
        self.top(key).is_some()
    }

    /// The current value of `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.top(key).cloned()
    }

    /// The current value of `key`, or `default` if the key is absent.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.top(key).cloned().unwrap_or(default)
    }

    /// Count the frames of `key` that hold a value.
    pub fn num_versions(&self, key: &str) -> usize {
        self.values
            .get(key)
            .map(|stack| stack.iter().filter(|frame| frame.is_some()).count())
            .unwrap_or(0)
    }

    /// All keys currently in the mapping, sorted ascending.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.sort();
        names
    }

    /// Checkpoint: push a duplicate of the top frame onto every existing
    /// key's stack. Keys created after this call carry a single frame and
    /// are deleted entirely by the next `rollback`.
    pub fn snapshot(&mut self) {
        for stack in self.values.values_mut() {
            let top = stack.last().expect("version stacks are never empty").clone();
            stack.push(top);
        }
    }

    /// Undo everything since the previous snapshot: keys with more than one
    /// frame drop their top frame; keys with a single frame (never
    /// snapshotted since creation) are deleted entirely.
    pub fn rollback(&mut self) {
        self.values.retain(|_, stack| {
            if stack.len() > 1 {
                stack.pop();
                true
            } else {
                false
            }
        });
    }

    fn top(&self, key: &str) -> Option<&Value> {
        self.values
            .get(key)
            .and_then(|stack| stack.last().and_then(|frame| frame.as_ref()))
    }
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// Cheap-clone handle over a parameter store, optionally chained to the
/// owning workflow's store.
///
/// The delegation rules mirror how steps relate to their workflow:
/// - `get`/`has` consult the own store first, then fall back to the parent.
/// - `add`/`remove`/`snapshot`/`rollback` apply to the own store **and**
///   bubble to the parent, so workflow-level state tracks the union of all
///   step-level writes.
/// - `num_versions` and `parameter_names` are strictly local.
#[derive(Debug, Clone)]
pub struct Params {
    own: Arc<Mutex<ParameterStore>>,
    parent: Option<Arc<Mutex<ParameterStore>>>,
}

impl Params {
    /// A handle over a fresh store with no parent.
    pub(crate) fn detached() -> Self {
        Self {
            own: Arc::new(Mutex::new(ParameterStore::new())),
            parent: None,
        }
    }

    /// A handle over an existing store with no parent (the workflow's view
    /// of its own store).
    pub(crate) fn over(store: Arc<Mutex<ParameterStore>>) -> Self {
        Self { own: store, parent: None }
    }

    /// Wire the parent store. Called once, when a step is added to a
    /// workflow.
    pub(crate) fn bind_parent(&mut self, parent: Arc<Mutex<ParameterStore>>) {
        self.parent = Some(parent);
    }

    /// Set `key` to `value`, bubbling the write to the parent store.
    pub fn add(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), ParamsError> {
        let key = key.into();
        let value = value.into();
        lock(&self.own).add(key.clone(), value.clone())?;
        if let Some(parent) = &self.parent {
            lock(parent).add(key, value)?;
        }
        Ok(())
    }

    /// Remove `key`, bubbling the removal to the parent store.
    pub fn remove(&self, key: &str) {
        lock(&self.own).remove(key);
        if let Some(parent) = &self.parent {
            lock(parent).remove(key);
        }
    }

    /// Whether `key` holds a value here or in the parent store.
    pub fn has(&self, key: &str) -> bool {
        if lock(&self.own).has(key) {
            return true;
        }
        self.parent.as_ref().is_some_and(|parent| lock(parent).has(key))
    }

    /// The value of `key`, falling back to the parent store when absent
    /// locally.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = lock(&self.own).get(key) {
            return Some(value);
        }
        self.parent.as_ref().and_then(|parent| lock(parent).get(key))
    }

    /// The value of `key`, or `default` when absent both locally and in the
    /// parent store.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Local version count for `key`; the parent store is not consulted.
    pub fn num_versions(&self, key: &str) -> usize {
        lock(&self.own).num_versions(key)
    }

    /// Local key listing, sorted ascending.
    pub fn parameter_names(&self) -> Vec<String> {
        lock(&self.own).parameter_names()
    }

    /// Checkpoint the local store and the parent store.
    pub fn snapshot(&self) {
        lock(&self.own).snapshot();
        if let Some(parent) = &self.parent {
            lock(parent).snapshot();
        }
    }

    /// Roll the local store and the parent store back to their previous
    /// snapshots.
    pub fn rollback(&self) {
        lock(&self.own).rollback();
        if let Some(parent) = &self.parent {
            lock(parent).rollback();
        }
    }
}

fn lock(store: &Arc<Mutex<ParameterStore>>) -> MutexGuard<'_, ParameterStore> {
    store.lock().expect("parameter store lock poisoned")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
