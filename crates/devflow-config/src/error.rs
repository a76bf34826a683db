use thiserror::Error;

/// Errors raised while parsing workflow definitions.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to parse workflow definition: {0}")]
  Parse(#[from] serde_yaml::Error),
}
