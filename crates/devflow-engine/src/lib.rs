//! Devflow Engine
//!
//! This crate executes workflows. An [`Engine`] holds the coordinator and
//! configuration for one invocation; every workflow it runs, including called
//! and generated child workflows, is driven by its own [`Controller`].
//!
//! Step lifecycle:
//! 1. The step is prepared once: placeholders expanded, shape validated
//! 2. Its image is built from a generated Dockerfile
//! 3. Its pod is launched, and pod callbacks drive it to ready and done
//!
//! Failures pass through the workflow's ignore gates. An ignored failure
//! completes the step as if it had succeeded; any other failure aborts the
//! workflow and everything it started.

mod build;
mod config;
mod controller;
mod error;
mod prepare;
mod run;
mod transition;

pub use build::{BuildPlan, Commit, image_tag, plan_build, sanitize};
pub use config::{DEFAULT_IMAGE_PREFIX, EngineConfig};
pub use controller::Controller;
pub use error::{EngineError, PrepareError};
pub use prepare::{check_step, expand_step, prepare_step, validate_step};
pub use run::{normalize_host_path, resolve_environment};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use devflow_coordinator::Coordinator;
use devflow_vars::Variables;
use devflow_workflow::{Workflow, WorkflowStep};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Entry point for running workflows against a coordinator.
pub struct Engine {
  coordinator: Arc<dyn Coordinator>,
  config: Arc<EngineConfig>,
}

impl Engine {
  pub fn new(coordinator: Arc<dyn Coordinator>, config: EngineConfig) -> Self {
    Self {
      coordinator,
      config: Arc::new(config),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Load a workflow definition file. `scope` overrides its variables.
  pub async fn load(&self, path: &Path, scope: &Variables) -> Result<Workflow, EngineError> {
    let text = tokio::fs::read_to_string(path)
      .await
      .map_err(|source| read_error(path.to_path_buf(), source))?;
    let workflow = Workflow::parse(&text, self.config.project_root.clone(), scope)?;
    info!(path = %path.display(), workflow = %workflow.name, "workflow_loaded");
    Ok(workflow)
  }

  /// Preparation errors of every step, regardless of the ignore gates.
  ///
  /// Variables captured from pod output at run time are unknown here, so
  /// references to them are reported as unresolved.
  pub fn check(&self, workflow: &Workflow) -> Vec<PrepareError> {
    fn walk(steps: &[WorkflowStep], scope: &Variables, errors: &mut Vec<PrepareError>) {
      for step in steps {
        match step.children() {
          Some(children) => walk(children, scope, errors),
          None => errors.extend(check_step(step, scope)),
        }
      }
    }

    let mut errors = Vec::new();
    walk(&workflow.steps, &workflow.state.variables, &mut errors);
    errors
  }

  /// Execute `workflow` until it completes, fails or `cancel` fires.
  pub async fn execute(
    &self,
    workflow: Workflow,
    cancel: &CancellationToken,
  ) -> Result<Workflow, EngineError> {
    Controller::new(workflow, self.coordinator.clone(), self.config.clone(), cancel)
      .execute()
      .await
  }
}

/// Map a failure to read a workflow file.
pub(crate) fn read_error(path: PathBuf, source: std::io::Error) -> EngineError {
  if source.kind() == ErrorKind::NotFound {
    EngineError::WorkflowNotFound { path }
  } else {
    EngineError::Io { path, source }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_read_error_maps_not_found() {
    let missing = std::io::Error::from(ErrorKind::NotFound);
    assert!(matches!(
      read_error(PathBuf::from("ci.yaml"), missing),
      EngineError::WorkflowNotFound { .. }
    ));
    let denied = std::io::Error::from(ErrorKind::PermissionDenied);
    assert!(matches!(
      read_error(PathBuf::from("ci.yaml"), denied),
      EngineError::Io { .. }
    ));
  }
}
