//! Engine errors.

use std::path::PathBuf;

use devflow_coordinator::CoordinatorError;
use devflow_vars::{ExpandError, VarsError};
use devflow_workflow::WorkflowError;

/// Errors raised while preparing a step.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PrepareError {
  /// One or more placeholders could not be expanded.
  #[error("failed to expand step '{step}': {source}")]
  Expand {
    step: String,
    #[source]
    source: ExpandError,
  },

  /// The step's shape is invalid.
  #[error("invalid step '{step}': {message}")]
  Validation { step: String, message: String },
}

/// Errors that can abort a workflow execution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("no such workflow: {}", path.display())]
  WorkflowNotFound { path: PathBuf },

  #[error("failed to read workflow '{}'", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  #[error(transparent)]
  Prepare(#[from] PrepareError),

  /// An image could not be assembled, e.g. a source step has not run yet.
  #[error("failed to build step '{step}': {message}")]
  Build { step: String, message: String },

  /// A coordinator call failed on behalf of a step.
  #[error("step '{step}': {source}")]
  Coordinator {
    step: String,
    #[source]
    source: CoordinatorError,
  },

  /// The step's environment could not be loaded.
  #[error("failed to load environment for step '{step}'")]
  Environment {
    step: String,
    #[source]
    source: VarsError,
  },

  /// The step's pod terminated unsuccessfully.
  #[error("step '{step}' failed: {message}")]
  StepFailed { step: String, message: String },

  /// A called or generated workflow failed.
  #[error("workflow of step '{step}' failed: {source}")]
  Child {
    step: String,
    #[source]
    source: Box<EngineError>,
  },

  /// Execution was cancelled before the workflow finished.
  #[error("workflow execution cancelled")]
  Cancelled,
}

impl EngineError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, EngineError::Cancelled)
  }
}
