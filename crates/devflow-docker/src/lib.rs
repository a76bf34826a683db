//! Devflow Docker
//!
//! A [`Coordinator`] backed by the `docker` command line client. Images are
//! built from a staged copy of the project, pods are plain detached
//! containers, and pod output is followed with `docker logs`.

mod args;
mod cli;
mod context;
mod probe;

use std::time::Duration;

use async_trait::async_trait;
use devflow_coordinator::{BuildOptions, Coordinator, CoordinatorError, LogProcessor, RunSpec};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cli::Docker;
use crate::probe::Prober;

/// How long to wait for the log follower to flush after a pod exits.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordinator driving the local docker daemon.
pub struct DockerCoordinator {
  docker: Docker,
  http: reqwest::Client,
}

impl DockerCoordinator {
  pub fn new() -> Self {
    Self::with_binary("docker")
  }

  /// Use a docker compatible client other than `docker`, such as `podman`.
  pub fn with_binary(binary: impl Into<String>) -> Self {
    Self {
      docker: Docker::new(binary),
      http: probe::http_client(),
    }
  }

  /// Follow the container's output until it exits.
  fn follow_logs(&self, container: &str, spec: &RunSpec) -> JoinHandle<()> {
    let spawned = self.docker.spawn(&args::logs_args(container));
    let mut processor = LogProcessor::new(spec.receiver.clone(), spec.capture_workflow);
    let pod = spec.name.clone();

    tokio::spawn(async move {
      let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
          warn!(pod = %pod, error = %e, "log_follow_failed");
          return;
        }
      };

      let stderr = child.stderr.take().map(|stderr| {
        let pod = pod.clone();
        tokio::spawn(async move {
          let mut lines = BufReader::new(stderr).lines();
          while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "devflow::pod", pod = %pod, stream = "stderr", "{line}");
          }
        })
      });

      if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
          info!(target: "devflow::pod", pod = %pod, stream = "stdout", "{line}");
          processor.process_line(&line);
        }
      }

      if let Some(stderr) = stderr {
        let _ = stderr.await;
      }
      let _ = child.wait().await;
    })
  }

  /// Drive a started container to a terminal outcome: `(failed, message)`.
  async fn lifecycle(&self, container: &str, spec: &RunSpec) -> (bool, String) {
    let prober = Prober {
      docker: &self.docker,
      http: &self.http,
      container,
      pod: &spec.name,
    };

    let exit = self.wait_exit(container, &spec.name);
    tokio::pin!(exit);

    if let Some(check) = &spec.readiness {
      tokio::select! {
        outcome = &mut exit => return outcome,
        () = prober.until_ready(check) => {}
      }
    }
    info!(pod = %spec.name, "pod_ready");
    spec.listener.ready();

    match &spec.liveness {
      None => exit.await,
      Some(check) => tokio::select! {
        outcome = &mut exit => outcome,
        message = prober.until_unhealthy(check) => (true, format!("liveness probe failed: {message}")),
      },
    }
  }

  async fn wait_exit(&self, container: &str, pod: &str) -> (bool, String) {
    let waited = self
      .docker
      .run(&args::wait_args(container), |message| CoordinatorError::Run {
        pod: pod.to_string(),
        message,
      })
      .await;

    match waited {
      Ok(output) => match output.trim().parse::<i64>() {
        Ok(0) => (false, "exited with status 0".to_string()),
        Ok(code) => (true, format!("exited with status {code}")),
        Err(_) => (true, format!("unexpected wait output '{}'", output.trim())),
      },
      Err(e) => (true, e.to_string()),
    }
  }

  async fn remove(&self, container: &str, pod: &str) {
    let removed = self
      .docker
      .run(&args::remove_args(container), |message| CoordinatorError::Run {
        pod: pod.to_string(),
        message,
      })
      .await;
    match removed {
      Ok(_) => info!(pod = %pod, "pod_deleted"),
      Err(e) => warn!(pod = %pod, error = %e, "pod_delete_failed"),
    }
  }
}

impl Default for DockerCoordinator {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Coordinator for DockerCoordinator {
  #[instrument(name = "build_image", skip_all, fields(image = %tag))]
  async fn build_image(
    &self,
    cancel: CancellationToken,
    tag: &str,
    options: BuildOptions,
  ) -> Result<(), CoordinatorError> {
    let failure = |message| CoordinatorError::Build {
      image: tag.to_string(),
      message,
    };

    if let Some(dockerfile) = &options.dockerfile_path {
      let args = args::build_args(tag, dockerfile, &options.context_dir);
      let build = self.docker.run(&args, failure);
      cancel
        .run_until_cancelled(build)
        .await
        .unwrap_or(Err(CoordinatorError::Cancelled))?;
      info!("image_built");
      return Ok(());
    }

    let staging = tempfile::Builder::new()
      .prefix("devflow-context-")
      .tempdir()
      .map_err(|source| CoordinatorError::Io {
        message: "failed to create build context".to_string(),
        source,
      })?;

    let staged = {
      let tag = tag.to_string();
      let root = staging.path().to_path_buf();
      tokio::task::spawn_blocking(move || context::stage_context(&tag, &options, &root))
    };
    let dockerfile = staged.await.map_err(|e| CoordinatorError::Build {
      image: tag.to_string(),
      message: format!("context staging panicked: {e}"),
    })??;
    debug!(context = %staging.path().display(), "context_staged");

    let args = args::build_args(tag, &dockerfile, staging.path());
    let build = self.docker.run(&args, failure);
    cancel
      .run_until_cancelled(build)
      .await
      .unwrap_or(Err(CoordinatorError::Cancelled))?;
    info!("image_built");
    Ok(())
  }

  #[instrument(name = "commit_container", skip_all, fields(container = %container_id, image = %tag))]
  async fn commit_container(
    &self,
    cancel: CancellationToken,
    container_id: &str,
    tag: &str,
  ) -> Result<(), CoordinatorError> {
    let commit_args = args::commit_args(container_id, tag);
    let commit = self.docker.run(&commit_args, |message| {
      CoordinatorError::Commit {
        container: container_id.to_string(),
        message,
      }
    });
    cancel
      .run_until_cancelled(commit)
      .await
      .unwrap_or(Err(CoordinatorError::Cancelled))?;
    info!("container_committed");
    Ok(())
  }

  #[instrument(name = "run_step", skip_all, fields(pod = %spec.name))]
  async fn run_step(&self, cancel: CancellationToken, spec: RunSpec) -> Result<(), CoordinatorError> {
    let run_args = args::run_args(&spec);
    let start = self.docker.run(&run_args, |message| CoordinatorError::Run {
      pod: spec.name.clone(),
      message,
    });
    let container = cancel
      .run_until_cancelled(start)
      .await
      .unwrap_or(Err(CoordinatorError::Cancelled))?
      .trim()
      .to_string();

    info!(container = %container, image = %spec.image, "pod_started");
    spec.listener.container(&container);

    let mut logs = self.follow_logs(&container, &spec);

    tokio::select! {
      (failed, message) = self.lifecycle(&container, &spec) => {
        if tokio::time::timeout(LOG_DRAIN_TIMEOUT, &mut logs).await.is_err() {
          debug!("log_drain_timed_out");
        }
        info!(failed, message = %message, "pod_done");
        spec.listener.done(failed, &message);
      }
      () = cancel.cancelled() => {}
    }

    cancel.cancelled().await;
    self.remove(&container, &spec.name).await;
    logs.abort();
    Ok(())
  }
}
