use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use devflow_workflow::{HealthCheck, Port, SourceFilter, Volume};

use crate::listener::{OutputReceiver, PodListener};

/// Everything needed to build one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
  /// Directory the build context is taken from.
  pub context_dir: PathBuf,
  /// A user-supplied Dockerfile, built as-is instead of `dockerfile`.
  pub dockerfile_path: Option<PathBuf>,
  /// Generated Dockerfile contents.
  pub dockerfile: String,
  /// Generated step script, staged into the context when present.
  pub script: Option<String>,
  /// Globs selecting which context files are sent to the builder.
  pub source: SourceFilter,
}

/// Path of the generated script inside the build context.
pub const CONTEXT_SCRIPT_PATH: &str = ".devflow/script.sh";

/// Path of the generated script inside the image.
pub const IMAGE_SCRIPT_PATH: &str = "/devflow/script.sh";

/// Everything needed to launch one step pod.
#[derive(Clone)]
pub struct RunSpec {
  /// Pod name, unique per workflow instance.
  pub name: String,
  pub image: String,
  /// `None` keeps the image's own entrypoint and command.
  pub command: Option<Vec<String>>,
  pub workdir: String,
  pub env: BTreeMap<String, String>,
  /// Host paths are absolute and use forward slashes.
  pub volumes: Vec<Volume>,
  pub ports: Vec<Port>,
  pub readiness: Option<HealthCheck>,
  pub liveness: Option<HealthCheck>,
  /// Enable the workflow-block detector on pod output.
  pub capture_workflow: bool,
  pub listener: Arc<dyn PodListener>,
  pub receiver: Arc<dyn OutputReceiver>,
}

impl fmt::Debug for RunSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RunSpec")
      .field("name", &self.name)
      .field("image", &self.image)
      .field("command", &self.command)
      .field("workdir", &self.workdir)
      .field("env", &self.env.keys().collect::<Vec<_>>())
      .field("volumes", &self.volumes)
      .field("ports", &self.ports)
      .field("readiness", &self.readiness)
      .field("liveness", &self.liveness)
      .field("capture_workflow", &self.capture_workflow)
      .finish_non_exhaustive()
  }
}
