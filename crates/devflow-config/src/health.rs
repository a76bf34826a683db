use serde::{Deserialize, Serialize};

/// A readiness or liveness probe as declared on a service step.
///
/// Exactly one of `tcp`, `http`, `https` or `script` is expected; the
/// conversion into the step model enforces it. Timing fields are in seconds
/// and fall back to defaults when omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tcp: Option<TcpProbeDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub http: Option<HttpProbeDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub https: Option<HttpProbeDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub script: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub grace: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub interval: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpProbeDef {
  pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpProbeDef {
  pub port: u16,
  #[serde(default = "default_path")]
  pub path: String,
}

fn default_path() -> String {
  "/".to_string()
}
