//! Conveyor engine core: sequential step execution with retry and rollback.
//!
//! This crate contains the "brain" of the engine:
//! - `params` -- versioned parameter store with snapshot/rollback and
//!   step-to-workflow delegation
//! - `step` -- the unit of work: configuration, lifecycle state, and the
//!   `Work` trait concrete steps implement
//! - `workflow` -- the orchestrator: ordered execution, timeouts, retries,
//!   optional/always-run failure rules, cooperative halt
//! - `registry` -- string identifier to step factory mapping
//! - `loader` -- declarative JSON document to `Workflow` construction

pub mod loader;
pub mod params;
pub mod registry;
pub mod step;
pub mod workflow;
