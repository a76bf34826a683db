use devflow_config::ConfigError;
use thiserror::Error;

/// Errors raised while building a workflow from its definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("step '{step}' must define exactly one of run, service, call, generate or steps (found {count})")]
  StepVariant { step: String, count: usize },

  #[error("step name must not be empty")]
  EmptyStepName,

  #[error("duplicate step name '{step}'")]
  DuplicateStep { step: String },

  #[error("invalid probe on step '{step}': {message}")]
  Probe { step: String, message: String },
}
