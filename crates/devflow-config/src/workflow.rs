use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::step::StepDef;

/// A workflow definition: policy flags, default variables and a step tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDef {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub ignore_failure: bool,
  #[serde(default)]
  pub ignore_missing: bool,
  #[serde(default)]
  pub ignore_validation: bool,
  /// Default variables, overridden by the caller's scope.
  #[serde(default)]
  pub variables: BTreeMap<String, String>,
  #[serde(default)]
  pub steps: Vec<StepDef>,
}

impl WorkflowDef {
  /// Parse a YAML (or JSON) workflow definition.
  ///
  /// Blank text is an empty workflow.
  pub fn parse(text: &str) -> Result<Self, ConfigError> {
    if text.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(text)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_yaml_definition() {
    let def = WorkflowDef::parse(
      r#"
name: ci
ignoreMissing: true
variables:
  TARGET: debug
steps:
  - name: db
    service:
      image: postgres:16
      ports: [{ port: 5432, host: 15432 }]
      readiness: { tcp: { port: 5432 }, retries: 10 }
  - name: test
    ignoreFailure: true
    run:
      previous: true
      script: cargo test
      parallel: true
      env: { PROFILE: "${TARGET}" }
  - name: group
    steps:
      - name: nested
        call: { workflow: other.yaml }
"#,
    )
    .unwrap();

    assert_eq!(def.name, "ci");
    assert!(def.ignore_missing);
    assert_eq!(def.variables["TARGET"], "debug");
    assert_eq!(def.steps.len(), 3);

    let service = def.steps[0].service.as_ref().unwrap();
    assert_eq!(service.script.image.as_deref(), Some("postgres:16"));
    assert_eq!(service.ports[0].host, Some(15432));
    assert_eq!(service.readiness.as_ref().unwrap().retries, Some(10));

    let run = def.steps[1].run.as_ref().unwrap();
    assert!(run.parallel);
    assert!(run.script.previous);
    assert_eq!(def.steps[1].ignore_failure, Some(true));

    let nested = &def.steps[2].steps.as_ref().unwrap()[0];
    let call = nested.call.as_ref().unwrap();
    assert_eq!(call.workflow, "other.yaml");
    assert_eq!(call.variables.include, vec!["*"]);
  }

  #[test]
  fn test_parse_json_definition() {
    let text = serde_json::json!({
      "name": "json",
      "steps": [{ "name": "one", "run": { "image": "alpine", "script": "true" } }]
    })
    .to_string();

    let def = WorkflowDef::parse(&text).unwrap();
    assert_eq!(def.steps[0].run.as_ref().unwrap().script.script, "true");
  }

  #[test]
  fn test_blank_text_is_empty_workflow() {
    let def = WorkflowDef::parse("  \n").unwrap();
    assert!(def.steps.is_empty());
  }

  #[test]
  fn test_parse_error() {
    assert!(WorkflowDef::parse("steps: 12").is_err());
  }
}
