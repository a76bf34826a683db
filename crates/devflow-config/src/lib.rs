//! Devflow Config
//!
//! This crate contains the serializable workflow definition types for devflow.
//! These types describe a workflow as written by a user (or printed by a
//! generator step) before it is converted into the executable step tree by
//! `devflow-workflow`.
//!
//! Definitions are written in YAML; JSON documents are accepted as well since
//! they are valid YAML.
//!
//! ```yaml
//! name: ci
//! steps:
//!   - name: test
//!     run:
//!       image: rust:1
//!       script: cargo test
//! ```

mod error;
mod health;
mod step;
mod workflow;

pub use error::ConfigError;
pub use health::{HealthCheckDef, HttpProbeDef, TcpProbeDef};
pub use step::{
  CallDef, GenerateDef, PickDef, PortDef, RunDef, ScriptDef, ServiceDef, SourceDef, StepDef,
  VolumeDef,
};
pub use workflow::WorkflowDef;
