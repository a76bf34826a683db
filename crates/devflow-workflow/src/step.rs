//! The step tree and per-step runtime state.

use std::time::Duration;

use devflow_vars::{VariableFilter, Variables};

/// Working directory used when a step does not declare one.
pub const DEFAULT_WORKDIR: &str = "/workspace";

/// A step in the workflow tree.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
  pub options: StepOptions,
  pub state: StepState,
  pub kind: StepKind,
}

/// Options shared by every step variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOptions {
  pub name: String,
  /// Per-step overrides of the workflow policy. `None` defers to the workflow.
  pub ignore_failure: Option<bool>,
  pub ignore_missing: Option<bool>,
  pub ignore_validation: Option<bool>,
}

/// Runtime fields mutated by transitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepState {
  /// Variables expanded and shape validated. Set at most once.
  pub prepared: bool,
  /// Readiness observed. For compound steps: traversal has passed the last child.
  pub ready: bool,
  /// Terminal state observed. Set at most once.
  pub done: bool,
  pub generated_script: Option<String>,
  pub generated_image: Option<String>,
  pub generated_container: Option<String>,
  pub generated_base_image: Option<String>,
  pub generated_workflow: Option<String>,
  /// Images committed from cherry-pick source steps, one per source step.
  pub picks: Vec<PickedImage>,
}

impl StepState {
  /// Returns false when the step was already prepared.
  pub fn mark_prepared(&mut self) -> bool {
    !std::mem::replace(&mut self.prepared, true)
  }

  /// Returns false when the step was already done.
  pub fn mark_done(&mut self) -> bool {
    !std::mem::replace(&mut self.done, true)
  }
}

/// The step variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
  Run(RunStep),
  Service(ServiceStep),
  External(ExternalStep),
  Generator(GeneratorStep),
  Compound(CompoundStep),
}

/// Fields of every step that executes a script in a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptOptions {
  pub image: Option<String>,
  pub dockerfile: Option<String>,
  /// Chain off the previous step's container.
  pub previous: bool,
  pub script: String,
  /// Execute the script during the image build.
  pub cache: bool,
  pub workdir: String,
  pub env: Variables,
  pub env_files: Vec<String>,
  pub volumes: Vec<Volume>,
  pub picks: Vec<CherryPick>,
  pub source: SourceFilter,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStep {
  pub script: ScriptOptions,
  pub parallel: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceStep {
  pub script: ScriptOptions,
  pub ports: Vec<Port>,
  pub readiness: Option<HealthCheck>,
  pub liveness: Option<HealthCheck>,
  pub skip_wait: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalStep {
  /// Workflow file, relative to the project root.
  pub workflow: String,
  pub parallel: bool,
  pub variables: VariableFilter,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratorStep {
  pub script: ScriptOptions,
  pub parallel: bool,
  pub variables: VariableFilter,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompoundStep {
  pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
  pub port: u16,
  pub host: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
  pub host: String,
  pub container: String,
  pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CherryPick {
  pub step: String,
  pub source: String,
  pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedImage {
  pub step: String,
  pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilter {
  pub include: Vec<String>,
  pub exclude: Vec<String>,
}

/// A readiness or liveness probe with its timing policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
  pub probe: Probe,
  pub grace: Duration,
  pub interval: Duration,
  pub timeout: Duration,
  pub retries: u32,
}

impl HealthCheck {
  pub const DEFAULT_GRACE: Duration = Duration::from_secs(0);
  pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
  pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
  pub const DEFAULT_RETRIES: u32 = 3;

  pub fn new(probe: Probe) -> Self {
    Self {
      probe,
      grace: Self::DEFAULT_GRACE,
      interval: Self::DEFAULT_INTERVAL,
      timeout: Self::DEFAULT_TIMEOUT,
      retries: Self::DEFAULT_RETRIES,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
  Tcp { port: u16 },
  Http { port: u16, path: String },
  Https { port: u16, path: String },
  Script { script: String },
}

impl WorkflowStep {
  pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
    Self {
      options: StepOptions {
        name: name.into(),
        ..StepOptions::default()
      },
      state: StepState::default(),
      kind,
    }
  }

  pub fn name(&self) -> &str {
    &self.options.name
  }

  /// Script options for steps that run in a container.
  pub fn script(&self) -> Option<&ScriptOptions> {
    match &self.kind {
      StepKind::Run(run) => Some(&run.script),
      StepKind::Service(service) => Some(&service.script),
      StepKind::Generator(generator) => Some(&generator.script),
      StepKind::External(_) | StepKind::Compound(_) => None,
    }
  }

  pub fn script_mut(&mut self) -> Option<&mut ScriptOptions> {
    match &mut self.kind {
      StepKind::Run(run) => Some(&mut run.script),
      StepKind::Service(service) => Some(&mut service.script),
      StepKind::Generator(generator) => Some(&mut generator.script),
      StepKind::External(_) | StepKind::Compound(_) => None,
    }
  }

  /// Only steps with an executable script need an image.
  pub fn requires_build(&self) -> bool {
    self.script().is_some()
  }

  pub fn is_service(&self) -> bool {
    matches!(self.kind, StepKind::Service(_))
  }

  pub fn is_parallel(&self) -> bool {
    match &self.kind {
      StepKind::Run(run) => run.parallel,
      StepKind::Generator(generator) => generator.parallel,
      StepKind::External(external) => external.parallel,
      StepKind::Service(_) | StepKind::Compound(_) => false,
    }
  }

  /// Async steps need not complete before the workflow moves on.
  pub fn is_async(&self) -> bool {
    match &self.kind {
      StepKind::Service(service) => service.skip_wait,
      _ => self.is_parallel(),
    }
  }

  /// A service that holds the workflow until its readiness check passes.
  pub fn waits_for_readiness(&self) -> bool {
    match &self.kind {
      StepKind::Service(service) => service.readiness.is_some() && !service.skip_wait,
      _ => false,
    }
  }

  pub fn children(&self) -> Option<&[WorkflowStep]> {
    match &self.kind {
      StepKind::Compound(compound) => Some(&compound.steps),
      _ => None,
    }
  }
}
