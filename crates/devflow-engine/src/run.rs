//! Pod spec assembly and pod callbacks.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use devflow_coordinator::{IMAGE_SCRIPT_PATH, OutputReceiver, PodListener, RunSpec};
use devflow_vars::{ExpandError, Variables, VarsError};
use devflow_workflow::{ChangeType, ScriptOptions, StepKind, StepSelector, Volume, Workflow, WorkflowStep};
use tracing::{debug, info};

use crate::build::sanitize;
use crate::config::EngineConfig;
use crate::error::{EngineError, PrepareError};
use crate::transition::{Flow, Transitions, append};

/// Assemble the pod spec for the built step at `selector`.
pub(crate) fn run_spec(
  workflow: &Workflow,
  selector: &StepSelector,
  step: &WorkflowStep,
  config: &EngineConfig,
  transitions: &Transitions,
) -> Result<RunSpec, EngineError> {
  let script = step.script().ok_or_else(|| EngineError::Build {
    step: step.name().to_string(),
    message: "step has no script to run".to_string(),
  })?;
  let image = step
    .state
    .generated_image
    .clone()
    .ok_or_else(|| EngineError::Build {
      step: step.name().to_string(),
      message: "image has not been built".to_string(),
    })?;

  let (env, missing) = resolve_environment(script, &workflow.state.variables, &config.project_root)
    .map_err(|source| EngineError::Environment {
      step: step.name().to_string(),
      source,
    })?;
  if let Some(source) = missing {
    let error = PrepareError::Expand {
      step: step.name().to_string(),
      source,
    };
    if !workflow.should_ignore_missing(step) {
      return Err(error.into());
    }
    debug!(step = %step.name(), error = %error, "ignoring missing variables");
  }

  let command = (!script.cache && step.state.generated_script.is_some())
    .then(|| vec!["/bin/sh".to_string(), IMAGE_SCRIPT_PATH.to_string()]);

  let volumes = script
    .volumes
    .iter()
    .map(|volume| Volume {
      host: normalize_host_path(&config.project_root, &volume.host),
      container: volume.container.clone(),
      readonly: volume.readonly,
    })
    .collect();

  let (ports, readiness, liveness) = match &step.kind {
    StepKind::Service(service) => (
      service.ports.clone(),
      service.readiness.clone(),
      service.liveness.clone(),
    ),
    _ => (Vec::new(), None, None),
  };

  let output = Arc::new(Mutex::new(CapturedOutput::default()));
  let short_id: String = workflow.id().chars().take(8).collect();

  Ok(RunSpec {
    name: format!(
      "{}-{}-{}",
      sanitize(&config.image_prefix),
      sanitize(step.name()),
      short_id
    ),
    image,
    command,
    workdir: script.workdir.clone(),
    env,
    volumes,
    ports,
    readiness,
    liveness,
    capture_workflow: matches!(step.kind, StepKind::Generator(_)),
    listener: Arc::new(StepListener {
      selector: selector.clone(),
      transitions: transitions.clone(),
      output: output.clone(),
    }),
    receiver: Arc::new(CaptureReceiver { output }),
  })
}

/// Merge env files, then literal env, and resolve the result against `scope`.
pub fn resolve_environment(
  script: &ScriptOptions,
  scope: &Variables,
  project_root: &Path,
) -> Result<(BTreeMap<String, String>, Option<ExpandError>), VarsError> {
  let mut declared = Variables::new();
  for file in &script.env_files {
    declared.merge(&Variables::load(&project_root.join(file))?);
  }
  declared.merge(&script.env);

  let (resolved, error) = declared.resolve_from_lossy(scope);
  let env = resolved
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
  Ok((env, error))
}

/// Make a host path absolute against the project root and convert it to the
/// forward-slash form container runtimes expect. `C:\data` becomes `/c/data`.
pub fn normalize_host_path(project_root: &Path, host: &str) -> String {
  let path = if is_absolute(host) {
    host.to_string()
  } else {
    project_root
      .join(host.trim_start_matches("./"))
      .to_string_lossy()
      .into_owned()
  };

  let path = path.replace('\\', "/");
  let bytes = path.as_bytes();
  if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
    let drive = (bytes[0] as char).to_ascii_lowercase();
    let rest = path[2..].trim_start_matches('/');
    return format!("/{drive}/{rest}");
  }
  path
}

fn is_absolute(path: &str) -> bool {
  let bytes = path.as_bytes();
  path.starts_with('/')
    || path.starts_with('\\')
    || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// Values captured from pod output, held until the step completes.
#[derive(Debug, Default)]
struct CapturedOutput {
  variables: Variables,
  workflow: Option<String>,
}

struct CaptureReceiver {
  output: Arc<Mutex<CapturedOutput>>,
}

impl OutputReceiver for CaptureReceiver {
  fn variable(&self, name: &str, value: &str) {
    let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
    output.variables.set(name, value);
  }

  fn workflow(&self, text: &str) {
    let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
    output.workflow = Some(text.to_string());
  }
}

/// Turns pod callbacks into transitions on the owning controller.
struct StepListener {
  selector: StepSelector,
  transitions: Transitions,
  output: Arc<Mutex<CapturedOutput>>,
}

impl PodListener for StepListener {
  fn container(&self, id: &str) {
    let selector = self.selector.clone();
    let id = id.to_string();
    self.transitions.send(move |workflow| {
      if let Some(step) = workflow.step_mut(&selector) {
        debug!(step = %step.name(), container = %id, "container_observed");
        step.state.generated_container = Some(id);
      }
      Ok(Flow::Continue)
    });
  }

  fn ready(&self) {
    let selector = self.selector.clone();
    self.transitions.send(move |workflow| {
      let Some(step) = workflow.step_mut(&selector) else {
        return Ok(Flow::Continue);
      };
      if step.state.ready || step.state.done {
        return Ok(Flow::Continue);
      }
      step.state.ready = true;
      info!(step = %step.name(), "step_ready");
      if step.is_service() {
        append(workflow, &selector, ChangeType::StepReady);
      }
      Ok(Flow::Continue)
    });
  }

  fn done(&self, failed: bool, message: &str) {
    let selector = self.selector.clone();
    let message = message.to_string();
    let output = std::mem::take(&mut *self.output.lock().unwrap_or_else(PoisonError::into_inner));

    self.transitions.send(move |workflow| {
      let Some(step) = workflow.step(&selector) else {
        return Ok(Flow::Continue);
      };
      if step.state.done {
        return Ok(Flow::Continue);
      }
      let name = step.name().to_string();

      if failed {
        let error = EngineError::StepFailed {
          step: name.clone(),
          message: message.clone(),
        };
        if !workflow.should_ignore_failure(step) {
          return Err(error);
        }
        debug!(step = %name, error = %error, "ignoring step failure");
      }

      workflow.state.variables.merge(&output.variables);
      if let Some(step) = workflow.step_mut(&selector) {
        step.state.generated_workflow = output.workflow;
        step.state.ready = true;
        step.state.done = true;
      }
      info!(step = %name, failed, captured = output.variables.len(), "step_done");
      append(workflow, &selector, ChangeType::StepDone);
      Ok(Flow::Continue)
    });
  }
}
