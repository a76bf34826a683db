//! Execution context derived from a change.
//!
//! The context is rebuilt for every dispatched change and never stored. It
//! answers where the change sits in the step tree and whether the workflow
//! may move past it.

use crate::change::{Change, ChangeType};
use crate::selector::StepSelector;
use crate::step::{StepKind, WorkflowStep};
use crate::workflow::Workflow;

pub struct ExecutionContext<'a> {
  workflow: &'a Workflow,
  change: &'a Change,
  next: StepSelector,
}

impl<'a> ExecutionContext<'a> {
  pub fn new(workflow: &'a Workflow, change: &'a Change) -> Self {
    let next = change.selector.increment(&workflow.steps);
    Self {
      workflow,
      change,
      next,
    }
  }

  pub fn workflow(&self) -> &'a Workflow {
    self.workflow
  }

  pub fn change(&self) -> &'a Change {
    self.change
  }

  pub fn selector(&self) -> &'a StepSelector {
    &self.change.selector
  }

  /// The step the change refers to; `None` at the root.
  pub fn step(&self) -> Option<&'a WorkflowStep> {
    self.workflow.step(&self.change.selector)
  }

  pub fn next_step_selector(&self) -> &StepSelector {
    &self.next
  }

  pub fn next_step(&self) -> Option<&'a WorkflowStep> {
    self.workflow.step(&self.next)
  }

  /// Moving on from this change leaves the workflow.
  pub fn is_workflow_boundary(&self) -> bool {
    self.next.is_root()
  }

  /// Compound steps left when moving on from this change, innermost first.
  pub fn exited_compounds(&self) -> Vec<StepSelector> {
    self.workflow.exited_compounds(&self.change.selector)
  }

  /// Whether this change unblocks the step after it.
  ///
  /// - a readiness-gated service unblocks once ready, whether or not done
  /// - the root start, and the start of an async step, unblock immediately
  /// - a synchronous step unblocks only when done
  /// - a finished child workflow always unblocks
  pub fn can_proceed_to_next_step(&self) -> bool {
    let step = self.step();
    match self.change.kind {
      ChangeType::StepReady => step.is_some_and(WorkflowStep::waits_for_readiness),
      ChangeType::StepStarted => step.is_none_or(WorkflowStep::is_async),
      ChangeType::StepDone => step.is_some_and(|s| !s.is_async()),
      ChangeType::WorkflowWaitDone => true,
      ChangeType::StepImageBuilt | ChangeType::WorkflowWait => false,
    }
  }

  /// The innermost enclosing compound whose children have all been launched
  /// but which has not completed yet.
  pub fn pending_compound(&self) -> Option<StepSelector> {
    self.change.selector.ancestors().find(|ancestor| {
      self
        .workflow
        .step(ancestor)
        .is_some_and(|step| step.state.ready && !step.state.done)
    })
  }
}

/// A compound step is complete when every service child is ready and done,
/// every parallel child is done, and every nested compound is complete.
/// Other children do not gate completion.
pub fn is_compound_step_complete(step: &WorkflowStep) -> bool {
  let Some(children) = step.children() else {
    return true;
  };

  children.iter().all(|child| match &child.kind {
    StepKind::Service(_) => child.state.ready && child.state.done,
    StepKind::Compound(_) => is_compound_step_complete(child),
    _ if child.is_parallel() => child.state.done,
    _ => true,
  })
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;
  use crate::change::ChangeLog;
  use crate::step::{CompoundStep, HealthCheck, Probe, RunStep, ServiceStep};

  fn run(name: &str, parallel: bool) -> WorkflowStep {
    WorkflowStep::new(
      name,
      StepKind::Run(RunStep {
        parallel,
        ..RunStep::default()
      }),
    )
  }

  fn service(name: &str, skip_wait: bool) -> WorkflowStep {
    WorkflowStep::new(
      name,
      StepKind::Service(ServiceStep {
        readiness: Some(HealthCheck::new(Probe::Tcp { port: 5432 })),
        skip_wait,
        ..ServiceStep::default()
      }),
    )
  }

  fn change(selector: Vec<usize>, kind: ChangeType) -> Change {
    let mut log = ChangeLog::new();
    log.append(selector.into(), kind);
    log.next_unhandled().cloned().unwrap()
  }

  fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
    Workflow::new("test", steps, PathBuf::from("/project"))
  }

  fn can_proceed(workflow: &Workflow, selector: Vec<usize>, kind: ChangeType) -> bool {
    let change = change(selector, kind);
    ExecutionContext::new(workflow, &change).can_proceed_to_next_step()
  }

  #[test]
  fn test_root_start_proceeds() {
    let wf = workflow(vec![run("a", false)]);
    assert!(can_proceed(&wf, vec![], ChangeType::StepStarted));
  }

  #[test]
  fn test_sync_step_waits_for_done() {
    let wf = workflow(vec![run("a", false), run("b", false)]);
    assert!(!can_proceed(&wf, vec![0], ChangeType::StepStarted));
    assert!(!can_proceed(&wf, vec![0], ChangeType::StepImageBuilt));
    assert!(can_proceed(&wf, vec![0], ChangeType::StepDone));
  }

  #[test]
  fn test_parallel_step_proceeds_on_start_not_done() {
    let wf = workflow(vec![run("a", true), run("b", false)]);
    assert!(can_proceed(&wf, vec![0], ChangeType::StepStarted));
    assert!(!can_proceed(&wf, vec![0], ChangeType::StepDone));
  }

  #[test]
  fn test_service_readiness_gating() {
    let wf = workflow(vec![service("db", false), service("cache", true), run("b", false)]);

    assert!(can_proceed(&wf, vec![0], ChangeType::StepReady));
    assert!(!can_proceed(&wf, vec![0], ChangeType::StepStarted));

    assert!(can_proceed(&wf, vec![1], ChangeType::StepStarted));
    assert!(!can_proceed(&wf, vec![1], ChangeType::StepReady));
  }

  #[test]
  fn test_wait_done_always_proceeds() {
    let wf = workflow(vec![run("a", true)]);
    assert!(can_proceed(&wf, vec![0], ChangeType::WorkflowWaitDone));
    assert!(!can_proceed(&wf, vec![0], ChangeType::WorkflowWait));
  }

  #[test]
  fn test_boundaries() {
    let wf = workflow(vec![
      run("a", false),
      WorkflowStep::new(
        "group",
        StepKind::Compound(CompoundStep {
          steps: vec![run("x", false), run("y", false)],
        }),
      ),
    ]);

    let first = change(vec![0], ChangeType::StepDone);
    let ctx = ExecutionContext::new(&wf, &first);
    assert_eq!(ctx.next_step_selector(), &StepSelector::from(vec![1, 0]));
    assert_eq!(ctx.next_step().map(WorkflowStep::name), Some("x"));
    assert!(!ctx.is_workflow_boundary());

    let last = change(vec![1, 1], ChangeType::StepDone);
    let ctx = ExecutionContext::new(&wf, &last);
    assert!(ctx.is_workflow_boundary());
    assert_eq!(ctx.exited_compounds(), vec![StepSelector::from(vec![1])]);
  }

  #[test]
  fn test_compound_completion() {
    let mut group = WorkflowStep::new(
      "group",
      StepKind::Compound(CompoundStep {
        steps: vec![service("db", false), run("p", true), run("s", false)],
      }),
    );
    assert!(!is_compound_step_complete(&group));

    let StepKind::Compound(compound) = &mut group.kind else {
      unreachable!()
    };
    compound.steps[0].state.ready = true;
    compound.steps[0].state.done = true;
    assert!(!is_compound_step_complete(&group));

    let StepKind::Compound(compound) = &mut group.kind else {
      unreachable!()
    };
    compound.steps[1].state.done = true;
    assert!(is_compound_step_complete(&group));
  }

  #[test]
  fn test_pending_compound() {
    let mut wf = workflow(vec![WorkflowStep::new(
      "group",
      StepKind::Compound(CompoundStep {
        steps: vec![run("p", true), run("s", false)],
      }),
    )]);

    let done = change(vec![0, 0], ChangeType::StepDone);
    assert_eq!(ExecutionContext::new(&wf, &done).pending_compound(), None);

    wf.step_mut(&vec![0].into()).unwrap().state.ready = true;
    assert_eq!(
      ExecutionContext::new(&wf, &done).pending_compound(),
      Some(StepSelector::from(vec![0]))
    );
  }
}
