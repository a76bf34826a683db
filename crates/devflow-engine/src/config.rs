use std::path::PathBuf;

/// Prefix used for image tags and pod names when none is configured.
pub const DEFAULT_IMAGE_PREFIX: &str = "devflow";

/// Engine configuration, fixed for one engine invocation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Directory that relative paths in step definitions resolve against.
  pub project_root: PathBuf,
  pub image_prefix: String,
}

impl EngineConfig {
  pub fn new(project_root: impl Into<PathBuf>) -> Self {
    Self {
      project_root: project_root.into(),
      image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
    }
  }

  pub fn with_image_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.image_prefix = prefix.into();
    self
  }
}
