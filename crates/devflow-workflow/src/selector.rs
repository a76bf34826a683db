//! Step selectors: index paths into the step tree.

use std::fmt;

use crate::step::{StepKind, WorkflowStep};

/// An index path addressing a step in a (possibly nested) step tree.
///
/// The empty selector is the workflow boundary: before the first step and
/// after the last one. Selectors produced by [`StepSelector::increment`]
/// always address leaf steps; compound steps are entered, never stopped at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepSelector(Vec<usize>);

impl StepSelector {
  pub fn root() -> Self {
    Self(Vec::new())
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  pub fn indices(&self) -> &[usize] {
    &self.0
  }

  pub fn depth(&self) -> usize {
    self.0.len()
  }

  /// The enclosing selector, `None` for the root.
  pub fn parent(&self) -> Option<StepSelector> {
    let (_, parent) = self.0.split_last()?;
    Some(Self(parent.to_vec()))
  }

  pub fn child(&self, index: usize) -> StepSelector {
    let mut path = self.0.clone();
    path.push(index);
    Self(path)
  }

  /// Every strict ancestor except the root, innermost first.
  pub fn ancestors(&self) -> impl Iterator<Item = StepSelector> + '_ {
    (1..self.0.len()).rev().map(|len| Self(self.0[..len].to_vec()))
  }

  /// True when `self` is a strict prefix of `other`.
  pub fn contains(&self, other: &StepSelector) -> bool {
    self.0.len() < other.0.len() && other.0.starts_with(&self.0)
  }

  pub fn lookup<'a>(&self, steps: &'a [WorkflowStep]) -> Option<&'a WorkflowStep> {
    let (first, rest) = self.0.split_first()?;
    let mut step = steps.get(*first)?;
    for index in rest {
      step = match &step.kind {
        StepKind::Compound(compound) => compound.steps.get(*index)?,
        _ => return None,
      };
    }
    Some(step)
  }

  pub fn lookup_mut<'a>(&self, steps: &'a mut [WorkflowStep]) -> Option<&'a mut WorkflowStep> {
    let (first, rest) = self.0.split_first()?;
    let mut step = steps.get_mut(*first)?;
    for index in rest {
      step = match &mut step.kind {
        StepKind::Compound(compound) => compound.steps.get_mut(*index)?,
        _ => return None,
      };
    }
    Some(step)
  }

  /// The next leaf in depth-first order, or the root when past the last step.
  ///
  /// The last segment is advanced; a segment that overflows its siblings is
  /// popped and its parent advanced instead, and landing on a compound step
  /// pushes a `0` segment to enter it.
  pub fn increment(&self, steps: &[WorkflowStep]) -> StepSelector {
    let mut path = self.0.clone();
    match self.lookup(steps) {
      Some(step) if matches!(step.kind, StepKind::Compound(_)) => path.push(0),
      _ => match path.last_mut() {
        Some(last) => *last += 1,
        None => path.push(0),
      },
    }
    settle(path, steps)
  }

  /// The last leaf inside the step at this selector, or the selector itself
  /// for a leaf. `None` for an empty compound.
  pub fn last_leaf(&self, steps: &[WorkflowStep]) -> Option<StepSelector> {
    let mut selector = self.clone();
    loop {
      match selector.lookup(steps)?.children() {
        Some(children) if children.is_empty() => return None,
        Some(children) => selector = selector.child(children.len() - 1),
        None => return Some(selector),
      }
    }
  }
}

fn siblings<'a>(parent: &[usize], steps: &'a [WorkflowStep]) -> &'a [WorkflowStep] {
  if parent.is_empty() {
    return steps;
  }
  StepSelector(parent.to_vec())
    .lookup(steps)
    .and_then(WorkflowStep::children)
    .unwrap_or(&[])
}

fn settle(mut path: Vec<usize>, steps: &[WorkflowStep]) -> StepSelector {
  loop {
    let Some((&last, parent)) = path.split_last() else {
      return StepSelector::root();
    };

    let level = siblings(parent, steps);
    if last >= level.len() {
      path.pop();
      if let Some(parent_last) = path.last_mut() {
        *parent_last += 1;
      }
      continue;
    }

    if matches!(level[last].kind, StepKind::Compound(_)) {
      path.push(0);
    } else {
      return StepSelector(path);
    }
  }
}

impl From<Vec<usize>> for StepSelector {
  fn from(path: Vec<usize>) -> Self {
    Self(path)
  }
}

impl fmt::Display for StepSelector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, index) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ".")?;
      }
      write!(f, "{index}")?;
    }
    write!(f, "]")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::step::{CompoundStep, RunStep};

  fn run(name: &str) -> WorkflowStep {
    WorkflowStep::new(name, StepKind::Run(RunStep::default()))
  }

  fn compound(name: &str, steps: Vec<WorkflowStep>) -> WorkflowStep {
    WorkflowStep::new(name, StepKind::Compound(CompoundStep { steps }))
  }

  fn walk(steps: &[WorkflowStep]) -> Vec<StepSelector> {
    let mut visited = Vec::new();
    let mut selector = StepSelector::root().increment(steps);
    while !selector.is_root() {
      visited.push(selector.clone());
      selector = selector.increment(steps);
    }
    visited
  }

  #[test]
  fn test_flat_walk() {
    let steps = vec![run("a"), run("b")];
    assert_eq!(walk(&steps), vec![vec![0].into(), vec![1].into()]);
  }

  #[test]
  fn test_walk_enters_compound_before_advancing_past_it() {
    let steps = vec![
      run("a"),
      compound("group", vec![run("x"), run("y"), run("z")]),
      run("b"),
    ];

    let expected: Vec<StepSelector> = vec![
      vec![0].into(),
      vec![1, 0].into(),
      vec![1, 1].into(),
      vec![1, 2].into(),
      vec![2].into(),
    ];
    assert_eq!(walk(&steps), expected);
  }

  #[test]
  fn test_walk_skips_empty_compounds_and_nests() {
    let steps = vec![
      compound("empty", vec![]),
      compound("outer", vec![compound("inner", vec![run("deep")])]),
    ];
    assert_eq!(walk(&steps), vec![StepSelector::from(vec![1, 0, 0])]);
  }

  #[test]
  fn test_increment_from_compound_selector_enters_it() {
    let steps = vec![compound("group", vec![run("x")])];
    let next = StepSelector::from(vec![0]).increment(&steps);
    assert_eq!(next, StepSelector::from(vec![0, 0]));
  }

  #[test]
  fn test_empty_workflow_increments_to_root() {
    assert!(StepSelector::root().increment(&[]).is_root());
  }

  #[test]
  fn test_lookup_mut_and_last_leaf() {
    let mut steps = vec![compound("g", vec![run("x"), compound("h", vec![run("y")])])];
    let selector = StepSelector::from(vec![0, 1, 0]);
    selector.lookup_mut(&mut steps).unwrap().state.done = true;
    assert!(selector.lookup(&steps).unwrap().state.done);

    assert_eq!(
      StepSelector::from(vec![0]).last_leaf(&steps),
      Some(StepSelector::from(vec![0, 1, 0]))
    );
  }

  #[test]
  fn test_ancestors_and_display() {
    let selector = StepSelector::from(vec![2, 0, 1]);
    let ancestors: Vec<StepSelector> = selector.ancestors().collect();
    assert_eq!(ancestors, vec![vec![2, 0].into(), vec![2].into()]);
    assert!(StepSelector::from(vec![2]).contains(&selector));
    assert_eq!(selector.to_string(), "[2.0.1]");
    assert_eq!(StepSelector::root().to_string(), "[]");
  }
}
