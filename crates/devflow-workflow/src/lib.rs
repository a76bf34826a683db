//! Devflow Workflow
//!
//! This crate provides the executable representation of a workflow: the step
//! tree with its mutable runtime state, the selectors that address steps in
//! that tree, the append-only change log that records progress, and the
//! execution context derived from a change.
//!
//! Key differences from `devflow-config`:
//! - Each step is a tagged union ([`StepKind`]) with exactly one variant
//! - Step names are unique across the whole tree
//! - Every step carries a [`StepState`] that transitions mutate
//! - The workflow owns its variable scope and [`ChangeLog`]
//!
//! Nothing in this crate performs I/O or spawns tasks; the engine owns the
//! workflow and is its only writer.

mod change;
mod context;
mod convert;
mod error;
mod selector;
mod step;
mod workflow;

pub use change::{Change, ChangeLog, ChangeType};
pub use context::{ExecutionContext, is_compound_step_complete};
pub use error::WorkflowError;
pub use selector::StepSelector;
pub use step::{
  CherryPick, CompoundStep, DEFAULT_WORKDIR, ExternalStep, GeneratorStep, HealthCheck,
  PickedImage, Port, Probe, RunStep, ScriptOptions, ServiceStep, SourceFilter, StepKind,
  StepOptions, StepState, Volume, WorkflowStep,
};
pub use workflow::{Workflow, WorkflowPolicy, WorkflowState};
