//! The workflow controller.
//!
//! A controller drives one workflow instance. Its loop picks the most recent
//! unhandled change, derives an [`ExecutionContext`] and dispatches to a
//! handler. Handlers read the workflow, start side effects on background
//! tasks and queue transitions. Only the loop applies transitions, so pod
//! watchers and child workflows never race on workflow state.

use std::path::PathBuf;
use std::sync::Arc;

use devflow_coordinator::{Coordinator, CoordinatorError};
use devflow_vars::Variables;
use devflow_workflow::{
  Change, ChangeType, ExecutionContext, StepKind, StepSelector, Workflow, WorkflowStep,
  is_compound_step_complete,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, instrument};

use crate::build::{BuildPlan, plan_build};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::prepare::prepare_step;
use crate::run::run_spec;
use crate::transition::{FailedAt, Flow, Transition, Transitions, append, fail_step, handled};

/// Drives a single workflow instance to completion.
pub struct Controller {
  workflow: Workflow,
  coordinator: Arc<dyn Coordinator>,
  config: Arc<EngineConfig>,
  cancel: CancellationToken,
  tracker: TaskTracker,
  transitions: Transitions,
  rx: mpsc::UnboundedReceiver<Transition>,
  outcome: Option<Result<(), EngineError>>,
}

/// Where a child workflow's definition comes from.
enum ChildSource {
  File(PathBuf),
  Text(String),
}

impl Controller {
  /// Create a controller whose lifetime is bounded by `parent`.
  pub fn new(
    workflow: Workflow,
    coordinator: Arc<dyn Coordinator>,
    config: Arc<EngineConfig>,
    parent: &CancellationToken,
  ) -> Self {
    let (transitions, rx) = Transitions::channel();
    Self {
      workflow,
      coordinator,
      config,
      cancel: parent.child_token(),
      tracker: TaskTracker::new(),
      transitions,
      rx,
      outcome: None,
    }
  }

  pub fn workflow(&self) -> &Workflow {
    &self.workflow
  }

  /// Run the workflow until it finishes, fails or is cancelled.
  ///
  /// Returns only after every task the workflow started has exited, so no
  /// pod outlives the call. The finished workflow is returned on success.
  #[instrument(
    name = "workflow",
    skip_all,
    fields(workflow_id = %self.workflow.id(), workflow = %self.workflow.name)
  )]
  pub async fn execute(mut self) -> Result<Workflow, EngineError> {
    if self.workflow.state.changes.is_empty() {
      append(&mut self.workflow, &StepSelector::root(), ChangeType::StepStarted);
    }
    info!(steps = self.workflow.leaves().len(), "workflow_started");

    loop {
      while let Ok(transition) = self.rx.try_recv() {
        self.apply(transition);
      }
      if self.cancel.is_cancelled() {
        break;
      }

      if let Some(change) = self.workflow.state.changes.next_unhandled().cloned() {
        self.dispatch(&change);
        continue;
      }

      tokio::select! {
        transition = self.rx.recv() => {
          if let Some(transition) = transition {
            self.apply(transition);
          }
        }
        _ = self.cancel.cancelled() => break,
      }
    }

    self.cancel.cancel();
    self.tracker.close();
    self.tracker.wait().await;

    match self.outcome.take() {
      Some(Ok(())) => {
        info!("workflow_completed");
        Ok(self.workflow)
      }
      Some(Err(error)) => Err(error),
      None => {
        info!("workflow_cancelled");
        Err(EngineError::Cancelled)
      }
    }
  }

  fn apply(&mut self, transition: Transition) {
    match transition(&mut self.workflow) {
      Ok(Flow::Continue) => {}
      Ok(Flow::Finish) => {
        self.outcome.get_or_insert(Ok(()));
        self.cancel.cancel();
      }
      Err(error) => {
        if self.outcome.is_some() || self.cancel.is_cancelled() {
          debug!(error = %error, "ignoring failure after shutdown");
          return;
        }
        error!(error = %error, "workflow_aborted");
        self.outcome = Some(Err(error));
        self.cancel.cancel();
      }
    }
  }

  /// Route a change to exactly one handler. Every handler queues a
  /// transition that marks the change handled.
  fn dispatch(&self, change: &Change) {
    let ctx = ExecutionContext::new(&self.workflow, change);
    debug!(
      change_id = change.id,
      change = %change.kind,
      selector = %change.selector,
      "dispatching change"
    );

    let is_generator = ctx
      .step()
      .is_some_and(|step| matches!(step.kind, StepKind::Generator(_)));

    if change.kind == ChangeType::StepImageBuilt {
      self.run_step(&ctx);
    } else if change.kind == ChangeType::StepDone && is_generator {
      self.run_generated(&ctx);
    } else if ctx.is_workflow_boundary() && ctx.can_proceed_to_next_step() {
      self.finish(change.id);
    } else if let Some(last) = self.completed_compound(&ctx) {
      self.advance(change.id, last);
    } else if ctx.can_proceed_to_next_step() {
      self.advance(change.id, ctx.selector().clone());
    } else {
      self.skip(change.id);
    }
  }

  /// The last leaf of a launched compound that this change completed.
  fn completed_compound(&self, ctx: &ExecutionContext<'_>) -> Option<StepSelector> {
    let settles = matches!(
      ctx.change().kind,
      ChangeType::StepDone | ChangeType::StepReady | ChangeType::WorkflowWaitDone
    );
    if !settles {
      return None;
    }
    let compound = ctx.pending_compound()?;
    let step = self.workflow.step(&compound)?;
    if !is_compound_step_complete(step) {
      return None;
    }
    compound.last_leaf(&self.workflow.steps)
  }

  fn skip(&self, id: u64) {
    self.transitions.send(move |workflow| {
      handled(workflow, id);
      Ok(Flow::Continue)
    });
  }

  fn finish(&self, id: u64) {
    self.transitions.send(move |workflow| {
      handled(workflow, id);
      Ok(Flow::Finish)
    });
  }

  /// Move past `from`: settle the compounds it exits, then start the next
  /// step or finish.
  fn advance(&self, id: u64, from: StepSelector) {
    let mut completed = Vec::new();
    for compound in self.workflow.exited_compounds(&from) {
      let Some(step) = self.workflow.step(&compound) else {
        continue;
      };
      if step.state.done {
        continue;
      }
      if is_compound_step_complete(step) {
        completed.push(compound);
        continue;
      }

      // Launched but still running; a later change completes it.
      debug!(compound = %step.name(), "waiting for compound step");
      self.transitions.send(move |workflow| {
        settle(workflow, id, &completed);
        if let Some(step) = workflow.step_mut(&compound) {
          step.state.ready = true;
        }
        Ok(Flow::Continue)
      });
      return;
    }

    let next = from.increment(&self.workflow.steps);
    if next.is_root() {
      self.transitions.send(move |workflow| {
        settle(workflow, id, &completed);
        Ok(Flow::Finish)
      });
      return;
    }
    self.start_step(id, next, completed);
  }

  /// Prepare the step at `selector` and start its build, or launch it
  /// directly when it needs no image.
  fn start_step(&self, id: u64, selector: StepSelector, completed: Vec<StepSelector>) {
    let Some(step) = self.workflow.step(&selector) else {
      self.skip(id);
      return;
    };

    // Already started by an earlier change.
    if step.state.prepared {
      self.transitions.send(move |workflow| {
        settle(workflow, id, &completed);
        Ok(Flow::Continue)
      });
      return;
    }

    let prepared = match prepare_step(&self.workflow, step) {
      Ok(prepared) => prepared,
      Err(error) => {
        self.transitions.send(move |workflow| {
          settle(workflow, id, &completed);
          Err(error.into())
        });
        return;
      }
    };
    debug!(step = %prepared.name(), selector = %selector, "step_prepared");

    let call = match &prepared.kind {
      StepKind::External(external) => Some((
        self.config.project_root.join(&external.workflow),
        self.workflow.state.variables.filter(&external.variables),
      )),
      _ => None,
    };
    let Some((path, scope)) = call else {
      self.start_build(id, selector, prepared, completed);
      return;
    };

    // Calls never build; they wait on a child workflow instead.
    let name = prepared.name().to_string();
    let child_selector = selector.clone();
    self.transitions.send(move |workflow| {
      settle(workflow, id, &completed);
      install(workflow, &selector, prepared);
      info!(step = %name, selector = %selector, "step_started");
      append(workflow, &selector, ChangeType::StepStarted);
      append(workflow, &selector, ChangeType::WorkflowWait);
      Ok(Flow::Continue)
    });
    self.spawn_child(child_selector, ChildSource::File(path), scope);
  }

  fn start_build(
    &self,
    id: u64,
    selector: StepSelector,
    prepared: WorkflowStep,
    completed: Vec<StepSelector>,
  ) {
    let name = prepared.name().to_string();
    let plan = match plan_build(&self.workflow, &selector, &prepared, &self.config) {
      Ok(plan) => plan,
      Err(error) => {
        self.transitions.send(move |workflow| {
          settle(workflow, id, &completed);
          install(workflow, &selector, prepared);
          fail_step(workflow, &selector, error, FailedAt::Build)
        });
        return;
      }
    };

    let install_selector = selector.clone();
    let image = plan.tag.clone();
    self.transitions.send(move |workflow| {
      settle(workflow, id, &completed);
      install(workflow, &install_selector, prepared);
      Ok(Flow::Continue)
    });

    info!(step = %name, image = %image, "image_build_started");
    let coordinator = self.coordinator.clone();
    let transitions = self.transitions.clone();
    let cancel = self.cancel.clone();
    self.tracker.spawn(
      async move {
        let result = build(coordinator.as_ref(), &cancel, &plan).await;
        if cancel.is_cancelled() {
          return;
        }
        transitions.send(move |workflow| match result {
          Ok(()) => {
            if let Some(step) = workflow.step_mut(&selector) {
              step.state.generated_image = Some(plan.tag);
              step.state.generated_base_image = plan.base.map(|(tag, _)| tag);
              step.state.generated_script = plan.script;
              step.state.picks = plan.picks;
            }
            info!(step = %name, image = %image, "image_built");
            append(workflow, &selector, ChangeType::StepImageBuilt);
            Ok(Flow::Continue)
          }
          Err(source) => {
            let error = EngineError::Coordinator { step: name, source };
            fail_step(workflow, &selector, error, FailedAt::Build)
          }
        });
      }
      .in_current_span(),
    );
  }

  /// Launch the pod of a step whose image was built.
  fn run_step(&self, ctx: &ExecutionContext<'_>) {
    let id = ctx.change().id;
    let selector = ctx.selector().clone();
    let Some(step) = ctx.step() else {
      self.skip(id);
      return;
    };
    // Settled by an ignored build failure; there is no image to run.
    if step.state.done {
      self.skip(id);
      return;
    }
    let name = step.name().to_string();

    let spec = match run_spec(&self.workflow, &selector, step, &self.config, &self.transitions) {
      Ok(spec) => spec,
      Err(error) => {
        self.transitions.send(move |workflow| {
          handled(workflow, id);
          fail_step(workflow, &selector, error, FailedAt::Launch)
        });
        return;
      }
    };

    let started = selector.clone();
    let pod = spec.name.clone();
    self.transitions.send(move |workflow| {
      handled(workflow, id);
      info!(step = %name, pod = %pod, "step_started");
      append(workflow, &started, ChangeType::StepStarted);
      Ok(Flow::Continue)
    });

    let coordinator = self.coordinator.clone();
    let transitions = self.transitions.clone();
    let cancel = self.cancel.child_token();
    let name = step.name().to_string();
    self.tracker.spawn(
      async move {
        if let Err(source) = coordinator.run_step(cancel.clone(), spec).await {
          if cancel.is_cancelled() {
            return;
          }
          transitions.send(move |workflow| {
            let error = EngineError::Coordinator { step: name, source };
            fail_step(workflow, &selector, error, FailedAt::Run)
          });
        }
      }
      .in_current_span(),
    );
  }

  /// Run the workflow a generator step printed.
  fn run_generated(&self, ctx: &ExecutionContext<'_>) {
    let id = ctx.change().id;
    let selector = ctx.selector().clone();
    let Some(step) = ctx.step() else {
      self.skip(id);
      return;
    };
    let StepKind::Generator(generator) = &step.kind else {
      self.skip(id);
      return;
    };

    let text = step.state.generated_workflow.clone().unwrap_or_default();
    let scope = self.workflow.state.variables.filter(&generator.variables);
    let wait = selector.clone();
    self.transitions.send(move |workflow| {
      handled(workflow, id);
      append(workflow, &wait, ChangeType::WorkflowWait);
      Ok(Flow::Continue)
    });
    self.spawn_child(selector, ChildSource::Text(text), scope);
  }

  /// Execute a child workflow on its own controller and report back with a
  /// `WorkflowWaitDone` change.
  fn spawn_child(&self, selector: StepSelector, source: ChildSource, scope: Variables) {
    let coordinator = self.coordinator.clone();
    let config = self.config.clone();
    let transitions = self.transitions.clone();
    let cancel = self.cancel.child_token();

    self.tracker.spawn(
      async move {
        let result = match load_child(source, &config, &scope).await {
          Ok(child) => run_child(child, coordinator, config, cancel.clone()).await,
          Err(error) => Err(error),
        };
        if cancel.is_cancelled() {
          return;
        }

        transitions.send(move |workflow| {
          let Some(step) = workflow.step(&selector) else {
            return Ok(Flow::Continue);
          };
          let name = step.name().to_string();

          if let Err(source) = result {
            let error = EngineError::Child {
              step: name.clone(),
              source: Box::new(source),
            };
            if !workflow.should_ignore_failure(step) {
              return Err(error);
            }
            debug!(step = %name, error = %error, "ignoring child workflow failure");
          }

          if let Some(step) = workflow.step_mut(&selector) {
            step.state.ready = true;
            step.state.done = true;
          }
          info!(step = %name, "child_workflow_done");
          append(workflow, &selector, ChangeType::WorkflowWaitDone);
          Ok(Flow::Continue)
        });
      }
      .in_current_span(),
    );
  }
}

/// Mark the dispatched change handled and complete the compounds it exited.
fn settle(workflow: &mut Workflow, id: u64, completed: &[StepSelector]) {
  handled(workflow, id);
  for compound in completed {
    if let Some(step) = workflow.step_mut(compound) {
      step.state.ready = true;
      if step.state.mark_done() {
        info!(step = %step.name(), "compound_step_done");
      }
    }
  }
}

/// Install a prepared step's expanded fields.
fn install(workflow: &mut Workflow, selector: &StepSelector, prepared: WorkflowStep) {
  if let Some(step) = workflow.step_mut(selector) {
    if step.state.mark_prepared() {
      step.kind = prepared.kind;
    }
  }
}

async fn build(
  coordinator: &dyn Coordinator,
  cancel: &CancellationToken,
  plan: &BuildPlan,
) -> Result<(), CoordinatorError> {
  for commit in &plan.commits {
    coordinator
      .commit_container(cancel.clone(), &commit.container, &commit.tag)
      .await?;
  }
  if let Some((tag, options)) = &plan.base {
    coordinator
      .build_image(cancel.clone(), tag, options.clone())
      .await?;
  }
  coordinator
    .build_image(cancel.clone(), &plan.tag, plan.options.clone())
    .await
}

async fn load_child(
  source: ChildSource,
  config: &EngineConfig,
  scope: &Variables,
) -> Result<Workflow, EngineError> {
  let text = match source {
    ChildSource::Text(text) => text,
    ChildSource::File(path) => tokio::fs::read_to_string(&path)
      .await
      .map_err(|source| crate::read_error(path, source))?,
  };
  Ok(Workflow::parse(&text, config.project_root.clone(), scope)?)
}

fn run_child(
  workflow: Workflow,
  coordinator: Arc<dyn Coordinator>,
  config: Arc<EngineConfig>,
  cancel: CancellationToken,
) -> BoxFuture<'static, Result<Workflow, EngineError>> {
  async move {
    Controller::new(workflow, coordinator, config, &cancel)
      .execute()
      .await
  }
  .boxed()
}
