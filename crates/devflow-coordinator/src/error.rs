/// Errors reported by a coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
  #[error("failed to build image '{image}': {message}")]
  Build { image: String, message: String },

  #[error("failed to commit container '{container}': {message}")]
  Commit { container: String, message: String },

  #[error("failed to run pod '{pod}': {message}")]
  Run { pod: String, message: String },

  #[error("{message}")]
  Io {
    message: String,
    #[source]
    source: std::io::Error,
  },

  /// The operation was interrupted by cancellation.
  #[error("coordinator operation cancelled")]
  Cancelled,
}
