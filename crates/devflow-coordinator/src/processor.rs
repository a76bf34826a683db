//! Line processors for pod output.

use std::sync::Arc;

use tracing::debug;

use crate::listener::OutputReceiver;

pub const MAX_VARIABLE_NAME_LEN: usize = 64;
pub const MAX_VARIABLE_VALUE_LEN: usize = 4096;

/// Recognises `var NAME=VALUE` lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct VariableDetector;

impl VariableDetector {
  /// Parse a declaration. `NAME` must be an identifier of at most
  /// [`MAX_VARIABLE_NAME_LEN`] characters and `VALUE` at most
  /// [`MAX_VARIABLE_VALUE_LEN`] characters.
  pub fn detect<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
    let (name, value) = line.strip_prefix("var ")?.split_once('=')?;

    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
      return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
      return None;
    }
    if name.len() > MAX_VARIABLE_NAME_LEN || value.chars().count() > MAX_VARIABLE_VALUE_LEN {
      return None;
    }
    Some((name, value))
  }
}

/// Captures the body of a `workflow {` ... `}` block.
#[derive(Debug, Default)]
pub struct WorkflowDetector {
  block: Option<Vec<String>>,
}

impl WorkflowDetector {
  pub fn is_open(&self) -> bool {
    self.block.is_some()
  }

  /// Feed one line. Returns the block body when this line closes a block.
  pub fn process(&mut self, line: &str) -> Option<String> {
    match &mut self.block {
      None => {
        if line.trim_end() == "workflow {" {
          self.block = Some(Vec::new());
        }
        None
      }
      Some(lines) => {
        if line.trim_end() == "}" {
          let body = lines.join("\n");
          self.block = None;
          return Some(body);
        }
        lines.push(line.to_string());
        None
      }
    }
  }
}

/// Tees pod output lines into the detectors.
pub struct LogProcessor {
  variables: VariableDetector,
  workflow: Option<WorkflowDetector>,
  receiver: Arc<dyn OutputReceiver>,
}

impl LogProcessor {
  /// The workflow detector only runs when `capture_workflow` is set.
  pub fn new(receiver: Arc<dyn OutputReceiver>, capture_workflow: bool) -> Self {
    Self {
      variables: VariableDetector,
      workflow: capture_workflow.then(WorkflowDetector::default),
      receiver,
    }
  }

  pub fn process_line(&mut self, line: &str) {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(detector) = &mut self.workflow {
      let inside = detector.is_open();
      if let Some(body) = detector.process(line) {
        debug!(lines = body.lines().count(), "workflow_detected");
        self.receiver.workflow(&body);
      }
      if inside || detector.is_open() {
        return;
      }
    }

    if let Some((name, value)) = self.variables.detect(line) {
      debug!(variable = %name, "variable_detected");
      self.receiver.variable(name, value);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;

  #[derive(Default)]
  struct Recorder {
    variables: Mutex<Vec<(String, String)>>,
    workflows: Mutex<Vec<String>>,
  }

  impl OutputReceiver for Recorder {
    fn variable(&self, name: &str, value: &str) {
      self
        .variables
        .lock()
        .unwrap()
        .push((name.to_string(), value.to_string()));
    }

    fn workflow(&self, text: &str) {
      self.workflows.lock().unwrap().push(text.to_string());
    }
  }

  #[test]
  fn test_variable_detector_bounds() {
    let detector = VariableDetector;
    assert_eq!(detector.detect("var TAG=v1.2=3"), Some(("TAG", "v1.2=3")));
    assert_eq!(detector.detect("var _X="), Some(("_X", "")));
    assert_eq!(detector.detect("var 1X=a"), None);
    assert_eq!(detector.detect("variable X=a"), None);
    assert_eq!(detector.detect("  var X=a"), None);

    let long_name = format!("var {}=a", "N".repeat(MAX_VARIABLE_NAME_LEN + 1));
    assert_eq!(detector.detect(&long_name), None);

    let long_value = format!("var N={}", "v".repeat(MAX_VARIABLE_VALUE_LEN + 1));
    assert_eq!(detector.detect(&long_value), None);
  }

  #[test]
  fn test_processor_forwards_variables() {
    let recorder = Arc::new(Recorder::default());
    let mut processor = LogProcessor::new(recorder.clone(), false);

    processor.process_line("building...\n");
    processor.process_line("var VERSION=1.0\r\n");
    processor.process_line("workflow {");
    processor.process_line("var INNER=x");

    let variables = recorder.variables.lock().unwrap().clone();
    assert_eq!(
      variables,
      vec![
        ("VERSION".to_string(), "1.0".to_string()),
        ("INNER".to_string(), "x".to_string())
      ]
    );
    assert!(recorder.workflows.lock().unwrap().is_empty());
  }

  #[test]
  fn test_processor_captures_workflow_blocks() {
    let recorder = Arc::new(Recorder::default());
    let mut processor = LogProcessor::new(recorder.clone(), true);

    for line in [
      "workflow {",
      "steps:",
      "  - name: a",
      "var IGNORED=1",
      "}",
      "var AFTER=2",
      "workflow {",
      "steps: []",
      "}",
    ] {
      processor.process_line(line);
    }

    let workflows = recorder.workflows.lock().unwrap().clone();
    assert_eq!(
      workflows,
      vec![
        "steps:\n  - name: a\nvar IGNORED=1".to_string(),
        "steps: []".to_string()
      ]
    );
    let variables = recorder.variables.lock().unwrap().clone();
    assert_eq!(variables, vec![("AFTER".to_string(), "2".to_string())]);
  }

  #[test]
  fn test_unterminated_block_is_not_reported() {
    let mut detector = WorkflowDetector::default();
    assert_eq!(detector.process("workflow {"), None);
    assert_eq!(detector.process("steps: []"), None);
    assert!(detector.is_open());
  }
}
