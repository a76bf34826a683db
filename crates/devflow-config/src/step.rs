use std::collections::BTreeMap;

use devflow_vars::VariableFilter;
use serde::{Deserialize, Serialize};

use crate::health::HealthCheckDef;

/// A single step definition.
///
/// Exactly one of `run`, `service`, `call`, `generate` or `steps` must be set.
/// The definition types stay permissive so that the conversion into the step
/// model can report which step is malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
  pub name: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ignore_failure: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ignore_missing: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ignore_validation: Option<bool>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub run: Option<RunDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub service: Option<ServiceDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub call: Option<CallDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub generate: Option<GenerateDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub steps: Option<Vec<StepDef>>,
}

/// Fields shared by every step that executes a script in a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDef {
  /// Base image to build from.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  /// Dockerfile (relative to the project root) producing the base image.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dockerfile: Option<String>,
  /// Build from the previous step's committed container.
  #[serde(default)]
  pub previous: bool,

  #[serde(default)]
  pub script: String,
  /// Execute the script while building the image instead of at start.
  #[serde(default)]
  pub cache: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workdir: Option<String>,

  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub env_files: Vec<String>,
  #[serde(default)]
  pub volumes: Vec<VolumeDef>,
  #[serde(default)]
  pub picks: Vec<PickDef>,
  #[serde(default)]
  pub source: SourceDef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDef {
  #[serde(flatten)]
  pub script: ScriptDef,
  #[serde(default)]
  pub parallel: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDef {
  #[serde(flatten)]
  pub script: ScriptDef,
  #[serde(default)]
  pub ports: Vec<PortDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub readiness: Option<HealthCheckDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub liveness: Option<HealthCheckDef>,
  /// Move on as soon as the service has started.
  #[serde(default)]
  pub skip_wait: bool,
}

/// Call another workflow file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallDef {
  pub workflow: String,
  #[serde(default)]
  pub parallel: bool,
  #[serde(default = "VariableFilter::all")]
  pub variables: VariableFilter,
}

/// Run a script whose output contains a `workflow { ... }` block to execute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateDef {
  #[serde(flatten)]
  pub script: ScriptDef,
  #[serde(default)]
  pub parallel: bool,
  #[serde(default = "VariableFilter::all")]
  pub variables: VariableFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDef {
  pub port: u16,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub host: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeDef {
  pub host: String,
  pub container: String,
  #[serde(default)]
  pub readonly: bool,
}

/// Copy a path out of another step's committed container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickDef {
  pub step: String,
  pub source: String,
  pub destination: String,
}

/// Project source globs copied into the image. An empty include list means
/// the whole project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
  #[serde(default)]
  pub include: Vec<String>,
  #[serde(default)]
  pub exclude: Vec<String>,
}
