//! Shared domain types for Conveyor.
//!
//! This crate contains the types shared between the engine and anything that
//! builds workflows declaratively: the human time-tuple (`TimeSpan`) and the
//! JSON document shapes consumed by the loader.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, and
//! thiserror.

pub mod document;
pub mod duration;
