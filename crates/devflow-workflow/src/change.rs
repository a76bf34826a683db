//! The per-workflow change log.
//!
//! Changes are the only record of where a workflow is. They are appended by
//! transitions and marked handled exactly once, by the transition that
//! consumes them.

use std::fmt;

use crate::selector::StepSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
  StepStarted,
  StepReady,
  StepImageBuilt,
  StepDone,
  WorkflowWait,
  WorkflowWaitDone,
}

impl fmt::Display for ChangeType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ChangeType::StepStarted => "step_started",
      ChangeType::StepReady => "step_ready",
      ChangeType::StepImageBuilt => "step_image_built",
      ChangeType::StepDone => "step_done",
      ChangeType::WorkflowWait => "workflow_wait",
      ChangeType::WorkflowWaitDone => "workflow_wait_done",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
  pub id: u64,
  pub selector: StepSelector,
  pub kind: ChangeType,
  pub handled: bool,
}

/// Append-only list of changes with monotonic IDs.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
  changes: Vec<Change>,
  next_id: u64,
}

impl ChangeLog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append an unhandled change and return its ID.
  pub fn append(&mut self, selector: StepSelector, kind: ChangeType) -> u64 {
    let id = self.next_id;
    self.next_id += 1;
    self.changes.push(Change {
      id,
      selector,
      kind,
      handled: false,
    });
    id
  }

  /// The most recently appended change that has not been handled.
  ///
  /// The scan runs newest to oldest, so a freshly appended change pre-empts
  /// older unhandled ones.
  pub fn next_unhandled(&self) -> Option<&Change> {
    self.changes.iter().rev().find(|change| !change.handled)
  }

  /// Mark a change handled. Returns false if it was already handled or does
  /// not exist.
  pub fn mark_handled(&mut self, id: u64) -> bool {
    match self.changes.iter_mut().find(|change| change.id == id) {
      Some(change) if !change.handled => {
        change.handled = true;
        true
      }
      _ => false,
    }
  }

  pub fn get(&self, id: u64) -> Option<&Change> {
    self.changes.iter().find(|change| change.id == id)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Change> {
    self.changes.iter()
  }

  pub fn len(&self) -> usize {
    self.changes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.changes.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_next_unhandled_is_lifo() {
    let mut log = ChangeLog::new();
    let c0 = log.append(StepSelector::root(), ChangeType::StepStarted);
    let _c1 = log.append(vec![0].into(), ChangeType::StepImageBuilt);
    let c2 = log.append(vec![0].into(), ChangeType::StepStarted);
    log.mark_handled(c0);

    assert_eq!(log.next_unhandled().map(|c| c.id), Some(c2));
  }

  #[test]
  fn test_mark_handled_once() {
    let mut log = ChangeLog::new();
    let id = log.append(StepSelector::root(), ChangeType::StepStarted);

    assert!(log.mark_handled(id));
    assert!(!log.mark_handled(id));
    assert!(!log.mark_handled(99));
    assert!(log.next_unhandled().is_none());
  }

  #[test]
  fn test_ids_are_monotonic() {
    let mut log = ChangeLog::new();
    let a = log.append(StepSelector::root(), ChangeType::StepStarted);
    let b = log.append(StepSelector::root(), ChangeType::StepDone);
    assert!(b > a);
    assert_eq!(log.len(), 2);
    assert_eq!(log.get(b).map(|c| c.kind), Some(ChangeType::StepDone));
  }
}
