//! Transitions: the only way workflow state changes.
//!
//! Handlers and background tasks never touch the workflow. They send boxed
//! closures to the controller, which applies them one at a time on its own
//! task.

use devflow_workflow::{ChangeType, StepSelector, Workflow};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::EngineError;

/// What the controller does after applying a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
  Continue,
  /// The workflow completed; cancel everything it started.
  Finish,
}

pub(crate) type Transition = Box<dyn FnOnce(&mut Workflow) -> Result<Flow, EngineError> + Send>;

/// Sending half of a controller's transition queue.
///
/// Unbounded: the controller loop queues transitions for itself, so a full
/// bounded queue would block the only task that drains it.
#[derive(Clone)]
pub(crate) struct Transitions {
  tx: mpsc::UnboundedSender<Transition>,
}

impl Transitions {
  pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Transition>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  /// Queue a transition. Dropped silently once the controller has exited.
  pub(crate) fn send<F>(&self, transition: F)
  where
    F: FnOnce(&mut Workflow) -> Result<Flow, EngineError> + Send + 'static,
  {
    let _ = self.tx.send(Box::new(transition));
  }
}

/// How far a failed step got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailedAt {
  /// Planning or building its image.
  Build,
  /// Assembling its pod after the image was built.
  Launch,
  /// Its pod had already started.
  Run,
}

/// Settle a step that failed after it was selected.
///
/// When the step ignores failures it is marked ready and done and the
/// workflow moves on as if it had succeeded: the changes the step never got
/// are appended in the order a successful step produces them.
pub(crate) fn fail_step(
  workflow: &mut Workflow,
  selector: &StepSelector,
  error: EngineError,
  at: FailedAt,
) -> Result<Flow, EngineError> {
  let Some(step) = workflow.step(selector) else {
    return Err(error);
  };
  if !workflow.should_ignore_failure(step) {
    return Err(error);
  }
  debug!(step = %step.name(), selector = %selector, error = %error, "ignoring step failure");

  if let Some(step) = workflow.step_mut(selector) {
    step.state.ready = true;
    if !step.state.mark_done() {
      return Ok(Flow::Continue);
    }
  }
  if at == FailedAt::Build {
    append(workflow, selector, ChangeType::StepImageBuilt);
  }
  if at != FailedAt::Run {
    append(workflow, selector, ChangeType::StepStarted);
  }
  append(workflow, selector, ChangeType::StepDone);
  Ok(Flow::Continue)
}

/// Mark the change `id` handled.
pub(crate) fn handled(workflow: &mut Workflow, id: u64) {
  workflow.state.changes.mark_handled(id);
}

pub(crate) fn append(workflow: &mut Workflow, selector: &StepSelector, kind: ChangeType) {
  let id = workflow.state.changes.append(selector.clone(), kind);
  debug!(
    workflow_id = %workflow.id(),
    selector = %selector,
    change = %kind,
    change_id = id,
    "change_appended"
  );
}
