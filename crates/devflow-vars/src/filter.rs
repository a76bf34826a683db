use serde::{Deserialize, Serialize};

use crate::glob::Glob;

/// Include/exclude glob lists over variable names.
///
/// A name passes when it matches at least one include pattern and then no
/// exclude pattern. A bare `*` matches every name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableFilter {
  #[serde(default)]
  pub include: Vec<String>,
  #[serde(default)]
  pub exclude: Vec<String>,
}

impl VariableFilter {
  /// A filter that passes every name.
  pub fn all() -> Self {
    Self {
      include: vec!["*".to_string()],
      exclude: Vec::new(),
    }
  }

  /// Check whether a variable name passes the filter.
  pub fn matches(&self, name: &str) -> bool {
    any_match(&self.include, name) && !any_match(&self.exclude, name)
  }
}

fn any_match(patterns: &[String], name: &str) -> bool {
  patterns.iter().any(|pattern| {
    pattern == "*"
      || Glob::new(pattern)
        .map(|glob| glob.is_match(name))
        .unwrap_or(false)
  })
}
