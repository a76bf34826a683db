use std::process::{Output, Stdio};

use devflow_coordinator::CoordinatorError;
use tokio::process::{Child, Command};
use tracing::debug;

/// Thin wrapper over the docker command line client.
#[derive(Debug, Clone)]
pub(crate) struct Docker {
  binary: String,
}

impl Docker {
  pub(crate) fn new(binary: impl Into<String>) -> Self {
    Self {
      binary: binary.into(),
    }
  }

  fn command(&self, args: &[String]) -> Command {
    let mut command = Command::new(&self.binary);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);
    command
  }

  /// Run to completion and capture output.
  pub(crate) async fn output(&self, args: &[String]) -> Result<Output, CoordinatorError> {
    debug!(binary = %self.binary, args = ?args, "docker_command");
    self
      .command(args)
      .output()
      .await
      .map_err(|source| CoordinatorError::Io {
        message: format!("failed to run {}", self.binary),
        source,
      })
  }

  /// Run to completion, returning stdout. A non-zero exit becomes the error
  /// built by `failure` from stderr.
  pub(crate) async fn run<F>(&self, args: &[String], failure: F) -> Result<String, CoordinatorError>
  where
    F: FnOnce(String) -> CoordinatorError,
  {
    let output = self.output(args).await?;
    if output.status.success() {
      return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = match stderr.trim() {
      "" => format!("docker exited with {}", output.status),
      text => text.to_string(),
    };
    Err(failure(message))
  }

  /// Start a long-running command with piped stdout and stderr.
  pub(crate) fn spawn(&self, args: &[String]) -> std::io::Result<Child> {
    debug!(binary = %self.binary, args = ?args, "docker_spawn");
    self
      .command(args)
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
  }
}
