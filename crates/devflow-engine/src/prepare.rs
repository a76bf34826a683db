//! Step preparation: placeholder expansion and shape validation.
//!
//! Preparation is pure. It returns a prepared copy of the step which the
//! controller installs through a transition, so a step is prepared at most
//! once no matter how many changes point at it.

use devflow_vars::{ExpandError, Variables};
use devflow_workflow::{Probe, ScriptOptions, StepKind, Workflow, WorkflowStep};
use tracing::debug;

use crate::error::PrepareError;

/// Expand and validate `step` against the workflow's scope, applying the
/// workflow's ignore gates.
///
/// Ignored errors are logged and the step is prepared anyway, with
/// unresolved placeholders left in place.
pub fn prepare_step(workflow: &Workflow, step: &WorkflowStep) -> Result<WorkflowStep, PrepareError> {
  let (mut prepared, missing) = expand_step(step, &workflow.state.variables);

  if let Some(source) = missing {
    let error = PrepareError::Expand {
      step: step.name().to_string(),
      source,
    };
    if !workflow.should_ignore_missing(step) {
      return Err(error);
    }
    debug!(step = %step.name(), error = %error, "ignoring missing variables");
  }

  if let Err(error) = validate_step(&prepared) {
    if !workflow.should_ignore_validation(step) {
      return Err(error);
    }
    debug!(step = %step.name(), error = %error, "ignoring validation error");
  }

  prepared.state.prepared = true;
  Ok(prepared)
}

/// Every preparation error of `step`, ignoring the workflow's gates.
pub fn check_step(step: &WorkflowStep, scope: &Variables) -> Vec<PrepareError> {
  let (expanded, missing) = expand_step(step, scope);
  let mut errors = Vec::new();
  if let Some(source) = missing {
    errors.push(PrepareError::Expand {
      step: step.name().to_string(),
      source,
    });
  }
  if let Err(error) = validate_step(&expanded) {
    errors.push(error);
  }
  errors
}

/// Expand every placeholder-bearing field of a step.
///
/// Environment values are not touched here: they are resolved when the pod
/// is launched, against the scope as it is at that point.
pub fn expand_step(step: &WorkflowStep, scope: &Variables) -> (WorkflowStep, Option<ExpandError>) {
  let mut expander = Expander {
    scope,
    error: ExpandError::default(),
  };
  let mut step = step.clone();

  match &mut step.kind {
    StepKind::Run(run) => expander.script(&mut run.script),
    StepKind::Generator(generator) => expander.script(&mut generator.script),
    StepKind::Service(service) => {
      expander.script(&mut service.script);
      for check in service.readiness.iter_mut().chain(service.liveness.iter_mut()) {
        match &mut check.probe {
          Probe::Http { path, .. } | Probe::Https { path, .. } => expander.text(path),
          Probe::Script { script } => expander.text(script),
          Probe::Tcp { .. } => {}
        }
      }
    }
    StepKind::External(external) => expander.text(&mut external.workflow),
    StepKind::Compound(_) => {}
  }

  let error = (!expander.error.is_empty()).then_some(expander.error);
  (step, error)
}

struct Expander<'a> {
  scope: &'a Variables,
  error: ExpandError,
}

impl Expander<'_> {
  fn text(&mut self, text: &mut String) {
    let (expanded, error) = self.scope.expand_lossy(text);
    if let Some(error) = error {
      self.error.absorb(error);
    }
    *text = expanded;
  }

  fn script(&mut self, script: &mut ScriptOptions) {
    if let Some(image) = &mut script.image {
      self.text(image);
    }
    if let Some(dockerfile) = &mut script.dockerfile {
      self.text(dockerfile);
    }
    self.text(&mut script.script);
    self.text(&mut script.workdir);
    for file in &mut script.env_files {
      self.text(file);
    }
    for volume in &mut script.volumes {
      self.text(&mut volume.host);
      self.text(&mut volume.container);
    }
    for pick in &mut script.picks {
      self.text(&mut pick.source);
      self.text(&mut pick.destination);
    }
    for pattern in script
      .source
      .include
      .iter_mut()
      .chain(script.source.exclude.iter_mut())
    {
      self.text(pattern);
    }
  }
}

/// Check the shape of a step.
pub fn validate_step(step: &WorkflowStep) -> Result<(), PrepareError> {
  let mut problems = Vec::new();

  if let Some(script) = step.script() {
    let sources = [
      script.image.as_deref().is_some_and(|i| !i.trim().is_empty()),
      script.dockerfile.as_deref().is_some_and(|d| !d.trim().is_empty()),
      script.previous,
    ];
    match sources.iter().filter(|set| **set).count() {
      0 => problems.push("one of image, dockerfile or previous is required".to_string()),
      1 => {}
      _ => problems.push("image, dockerfile and previous are mutually exclusive".to_string()),
    }

    if script.workdir.trim().is_empty() {
      problems.push("workdir must not be empty".to_string());
    }

    for pick in &script.picks {
      if pick.step.trim().is_empty() || pick.source.trim().is_empty() || pick.destination.trim().is_empty() {
        problems.push("picks need a step, a source and a destination".to_string());
      } else if pick.step == step.name() {
        problems.push("a step cannot pick files from itself".to_string());
      }
    }

    for volume in &script.volumes {
      if volume.host.trim().is_empty() || volume.container.trim().is_empty() {
        problems.push("volumes need a host and a container path".to_string());
      }
    }
  }

  match &step.kind {
    StepKind::Service(service) => {
      if service.script.cache {
        problems.push("services cannot be cached".to_string());
      }
      if service.ports.iter().any(|p| p.port == 0 || p.host == Some(0)) {
        problems.push("ports must be non-zero".to_string());
      }
    }
    StepKind::Generator(generator) => {
      if generator.script.cache {
        problems.push("generators cannot be cached".to_string());
      }
      if generator.script.script.trim().is_empty() {
        problems.push("generators need a script".to_string());
      }
    }
    StepKind::External(external) => {
      if external.workflow.trim().is_empty() {
        problems.push("a workflow path is required".to_string());
      }
    }
    StepKind::Run(_) | StepKind::Compound(_) => {}
  }

  if problems.is_empty() {
    Ok(())
  } else {
    Err(PrepareError::Validation {
      step: step.name().to_string(),
      message: problems.join("; "),
    })
  }
}
