use std::path::PathBuf;

use devflow_config::WorkflowDef;
use devflow_vars::Variables;

use crate::change::ChangeLog;
use crate::convert::convert_steps;
use crate::error::WorkflowError;
use crate::selector::StepSelector;
use crate::step::WorkflowStep;

/// Workflow-level defaults for the ignore gates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowPolicy {
  pub ignore_failure: bool,
  pub ignore_missing: bool,
  pub ignore_validation: bool,
}

#[derive(Debug, Clone)]
pub struct WorkflowState {
  /// Generated per instance.
  pub id: String,
  pub project_root: PathBuf,
  pub variables: Variables,
  pub changes: ChangeLog,
}

/// An executable workflow: step tree, policy and runtime state.
#[derive(Debug, Clone)]
pub struct Workflow {
  pub name: String,
  pub policy: WorkflowPolicy,
  pub steps: Vec<WorkflowStep>,
  pub state: WorkflowState,
}

impl Workflow {
  /// Create a workflow directly from a step tree.
  pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>, project_root: PathBuf) -> Self {
    Self {
      name: name.into(),
      policy: WorkflowPolicy::default(),
      steps,
      state: WorkflowState {
        id: uuid::Uuid::new_v4().to_string(),
        project_root,
        variables: Variables::new(),
        changes: ChangeLog::new(),
      },
    }
  }

  /// Build a workflow from its definition.
  ///
  /// The definition's variables are defaults; `scope` overrides them.
  pub fn from_def(
    def: WorkflowDef,
    project_root: PathBuf,
    scope: &Variables,
  ) -> Result<Self, WorkflowError> {
    let steps = convert_steps(def.steps)?;

    let mut variables = Variables::from(def.variables);
    variables.merge(scope);

    let mut workflow = Self::new(def.name, steps, project_root);
    workflow.policy = WorkflowPolicy {
      ignore_failure: def.ignore_failure,
      ignore_missing: def.ignore_missing,
      ignore_validation: def.ignore_validation,
    };
    workflow.state.variables = variables;
    Ok(workflow)
  }

  /// Parse definition text and build a workflow from it.
  pub fn parse(text: &str, project_root: PathBuf, scope: &Variables) -> Result<Self, WorkflowError> {
    Self::from_def(WorkflowDef::parse(text)?, project_root, scope)
  }

  pub fn id(&self) -> &str {
    &self.state.id
  }

  pub fn step(&self, selector: &StepSelector) -> Option<&WorkflowStep> {
    selector.lookup(&self.steps)
  }

  pub fn step_mut(&mut self, selector: &StepSelector) -> Option<&mut WorkflowStep> {
    selector.lookup_mut(&mut self.steps)
  }

  /// Find a step anywhere in the tree by name.
  pub fn find_step(&self, name: &str) -> Option<(StepSelector, &WorkflowStep)> {
    fn search<'a>(
      steps: &'a [WorkflowStep],
      prefix: &StepSelector,
      name: &str,
    ) -> Option<(StepSelector, &'a WorkflowStep)> {
      for (index, step) in steps.iter().enumerate() {
        let selector = prefix.child(index);
        if step.name() == name {
          return Some((selector, step));
        }
        if let Some(found) = step.children().and_then(|c| search(c, &selector, name)) {
          return Some(found);
        }
      }
      None
    }
    search(&self.steps, &StepSelector::root(), name)
  }

  /// Every leaf selector in traversal order.
  pub fn leaves(&self) -> Vec<StepSelector> {
    let mut leaves = Vec::new();
    let mut selector = StepSelector::root().increment(&self.steps);
    while !selector.is_root() {
      let next = selector.increment(&self.steps);
      leaves.push(selector);
      selector = next;
    }
    leaves
  }

  /// The leaf traversed immediately before `selector`.
  pub fn previous_leaf(&self, selector: &StepSelector) -> Option<StepSelector> {
    let leaves = self.leaves();
    let position = leaves.iter().position(|leaf| leaf == selector)?;
    position.checked_sub(1).map(|i| leaves[i].clone())
  }

  /// Compound steps left when moving from `from` to the next leaf,
  /// innermost first.
  pub fn exited_compounds(&self, from: &StepSelector) -> Vec<StepSelector> {
    let next = from.increment(&self.steps);
    from
      .ancestors()
      .filter(|ancestor| !ancestor.contains(&next))
      .collect()
  }

  pub fn should_ignore_failure(&self, step: &WorkflowStep) -> bool {
    step.options.ignore_failure.unwrap_or(self.policy.ignore_failure)
  }

  pub fn should_ignore_missing(&self, step: &WorkflowStep) -> bool {
    step.options.ignore_missing.unwrap_or(self.policy.ignore_missing)
  }

  pub fn should_ignore_validation(&self, step: &WorkflowStep) -> bool {
    step
      .options
      .ignore_validation
      .unwrap_or(self.policy.ignore_validation)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const DEFINITION: &str = r#"
name: demo
ignoreFailure: true
variables: { A: default, B: kept }
steps:
  - name: first
    run: { image: alpine, script: "true" }
  - name: group
    steps:
      - name: inner-a
        run: { image: alpine, script: "true" }
      - name: inner-b
        ignoreFailure: false
        run: { image: alpine, script: "true" }
  - name: last
    run: { previous: true, script: "true" }
"#;

  fn demo() -> Workflow {
    let mut scope = Variables::new();
    scope.set("A", "override");
    Workflow::parse(DEFINITION, PathBuf::from("/project"), &scope).unwrap()
  }

  #[test]
  fn test_scope_overrides_definition_variables() {
    let workflow = demo();
    assert_eq!(workflow.state.variables.get("A"), Some("override"));
    assert_eq!(workflow.state.variables.get("B"), Some("kept"));
    assert!(!workflow.id().is_empty());
  }

  #[test]
  fn test_find_step_and_previous_leaf() {
    let workflow = demo();
    let (selector, step) = workflow.find_step("inner-b").unwrap();
    assert_eq!(selector, StepSelector::from(vec![1, 1]));
    assert_eq!(step.name(), "inner-b");

    let (last, _) = workflow.find_step("last").unwrap();
    assert_eq!(workflow.previous_leaf(&last), Some(StepSelector::from(vec![1, 1])));
    assert_eq!(workflow.previous_leaf(&StepSelector::from(vec![0])), None);
  }

  #[test]
  fn test_exited_compounds() {
    let workflow = demo();
    assert_eq!(
      workflow.exited_compounds(&vec![1, 1].into()),
      vec![StepSelector::from(vec![1])]
    );
    assert!(workflow.exited_compounds(&vec![1, 0].into()).is_empty());
    assert!(workflow.exited_compounds(&vec![0].into()).is_empty());
  }

  #[test]
  fn test_policy_resolution_prefers_step_override() {
    let workflow = demo();
    let (_, first) = workflow.find_step("first").unwrap();
    let (_, inner_b) = workflow.find_step("inner-b").unwrap();

    assert!(workflow.should_ignore_failure(first));
    assert!(!workflow.should_ignore_failure(inner_b));
    assert!(!workflow.should_ignore_missing(first));
  }
}
