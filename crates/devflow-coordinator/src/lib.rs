//! Devflow Coordinator
//!
//! This crate defines the seam between the workflow engine and the container
//! runtime. The engine only ever talks to a [`Coordinator`]:
//! - [`Coordinator::build_image`] turns a generated Dockerfile and a build
//!   context into a tagged image
//! - [`Coordinator::commit_container`] snapshots a step's container
//! - [`Coordinator::run_step`] launches a pod and reports its lifecycle to a
//!   [`PodListener`]
//!
//! Pod output is fed through a [`LogProcessor`], which recognises variable
//! declarations and generated workflow blocks and hands them to an
//! [`OutputReceiver`].

mod error;
mod listener;
mod processor;
mod spec;

pub use error::CoordinatorError;
pub use listener::{OutputReceiver, PodListener};
pub use processor::{
  LogProcessor, MAX_VARIABLE_NAME_LEN, MAX_VARIABLE_VALUE_LEN, VariableDetector, WorkflowDetector,
};
pub use spec::{BuildOptions, CONTEXT_SCRIPT_PATH, IMAGE_SCRIPT_PATH, RunSpec};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Façade over the image builder and the pod runtime.
///
/// One coordinator is created per engine invocation and shared by every task
/// spawned for it.
#[async_trait]
pub trait Coordinator: Send + Sync {
  /// Build `options` into an image tagged `tag`.
  async fn build_image(
    &self,
    cancel: CancellationToken,
    tag: &str,
    options: BuildOptions,
  ) -> Result<(), CoordinatorError>;

  /// Commit a container's filesystem to an image tagged `tag`.
  async fn commit_container(
    &self,
    cancel: CancellationToken,
    container_id: &str,
    tag: &str,
  ) -> Result<(), CoordinatorError>;

  /// Launch a pod for `spec` and watch it until `cancel` fires.
  ///
  /// Returns an error only when the pod could not be started. Once running,
  /// progress is reported through `spec.listener`, and the pod is deleted
  /// exactly once when `cancel` fires, after which this returns `Ok`.
  async fn run_step(&self, cancel: CancellationToken, spec: RunSpec) -> Result<(), CoordinatorError>;
}
