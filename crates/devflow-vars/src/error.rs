//! Variable store errors.

use std::collections::BTreeSet;
use std::path::PathBuf;

use thiserror::Error;

/// Composite expansion error.
///
/// Collects every unresolved placeholder and every reference cycle found while
/// expanding one or more pieces of text. Names are kept sorted and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", self.describe())]
pub struct ExpandError {
  /// Placeholders with no matching variable.
  pub unresolved: Vec<String>,
  /// Variables whose expansion refers back to themselves.
  pub cycles: Vec<String>,
}

impl ExpandError {
  pub(crate) fn from_sets(unresolved: BTreeSet<String>, cycles: BTreeSet<String>) -> Self {
    Self {
      unresolved: unresolved.into_iter().collect(),
      cycles: cycles.into_iter().collect(),
    }
  }

  /// True when nothing went wrong.
  pub fn is_empty(&self) -> bool {
    self.unresolved.is_empty() && self.cycles.is_empty()
  }

  /// Merge another error into this one.
  pub fn absorb(&mut self, other: ExpandError) {
    let unresolved: BTreeSet<String> = self.unresolved.drain(..).chain(other.unresolved).collect();
    let cycles: BTreeSet<String> = self.cycles.drain(..).chain(other.cycles).collect();
    *self = Self::from_sets(unresolved, cycles);
  }

  fn describe(&self) -> String {
    let mut parts = Vec::new();
    if !self.unresolved.is_empty() {
      parts.push(format!("unresolved variables: {}", self.unresolved.join(", ")));
    }
    if !self.cycles.is_empty() {
      parts.push(format!("variable reference cycle at: {}", self.cycles.join(", ")));
    }
    parts.join("; ")
  }
}

/// Errors raised while loading variables from files or literals.
#[derive(Debug, Error)]
pub enum VarsError {
  #[error("failed to read variables file '{}'", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse variables file '{}'", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("variable '{name}' in '{}' is not a scalar value", path.display())]
  NotScalar { path: PathBuf, name: String },

  #[error("invalid variable literal '{literal}', expected NAME=VALUE")]
  Literal { literal: String },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_absorb_sorts_and_dedupes() {
    let mut error = ExpandError {
      unresolved: vec!["b".to_string(), "d".to_string()],
      cycles: vec![],
    };
    error.absorb(ExpandError {
      unresolved: vec!["a".to_string(), "b".to_string()],
      cycles: vec!["x".to_string()],
    });

    assert_eq!(error.unresolved, vec!["a", "b", "d"]);
    assert_eq!(error.cycles, vec!["x"]);
  }

  #[test]
  fn test_display_lists_both_kinds() {
    let error = ExpandError {
      unresolved: vec!["b".to_string()],
      cycles: vec!["a".to_string()],
    };

    assert_eq!(
      error.to_string(),
      "unresolved variables: b; variable reference cycle at: a"
    );
  }
}
