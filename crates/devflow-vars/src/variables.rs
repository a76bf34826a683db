//! The variable map and placeholder expansion.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExpandError, VarsError};
use crate::filter::VariableFilter;

/// A flat map of variable names to string values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables {
  values: BTreeMap<String, String>,
}

impl Variables {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.values.get(name).map(String::as_str)
  }

  pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.values.insert(name.into(), value.into());
  }

  pub fn contains(&self, name: &str) -> bool {
    self.values.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Copy every entry of `other` into this map, overwriting existing names.
  pub fn merge(&mut self, other: &Variables) {
    for (name, value) in &other.values {
      self.values.insert(name.clone(), value.clone());
    }
  }

  /// The subset of variables whose names pass `filter`.
  pub fn filter(&self, filter: &VariableFilter) -> Variables {
    self
      .values
      .iter()
      .filter(|(name, _)| filter.matches(name))
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }

  /// Load a flat YAML (or JSON) mapping of names to scalar values.
  pub fn load(path: &Path) -> Result<Variables, VarsError> {
    let content = std::fs::read_to_string(path).map_err(|source| VarsError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    if content.trim().is_empty() {
      return Ok(Variables::new());
    }

    let raw: BTreeMap<String, serde_yaml::Value> =
      serde_yaml::from_str(&content).map_err(|source| VarsError::Parse {
        path: path.to_path_buf(),
        source,
      })?;

    let mut variables = Variables::new();
    for (name, value) in raw {
      let value = match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        _ => {
          return Err(VarsError::NotScalar {
            path: path.to_path_buf(),
            name,
          });
        }
      };
      variables.set(name, value);
    }
    Ok(variables)
  }

  /// Parse a `NAME=VALUE` literal.
  pub fn parse_literal(literal: &str) -> Result<(String, String), VarsError> {
    match literal.split_once('=') {
      Some((name, value)) if !name.trim().is_empty() => {
        Ok((name.trim().to_string(), value.to_string()))
      }
      _ => Err(VarsError::Literal {
        literal: literal.to_string(),
      }),
    }
  }

  /// Expand every `${name}` placeholder in `text`.
  ///
  /// Values are expanded recursively. All unresolved names are reported
  /// together; use [`Variables::expand_lossy`] to also get the partial text.
  pub fn expand(&self, text: &str) -> Result<String, ExpandError> {
    match self.expand_lossy(text) {
      (expanded, None) => Ok(expanded),
      (_, Some(error)) => Err(error),
    }
  }

  /// Expand `text`, returning the best-effort result alongside any error.
  ///
  /// Unresolved placeholders and cycle-closing references are left in the
  /// output verbatim.
  pub fn expand_lossy(&self, text: &str) -> (String, Option<ExpandError>) {
    let mut unresolved = BTreeSet::new();
    let mut cycles = BTreeSet::new();
    let mut stack = Vec::new();
    let expanded = self.expand_into(text, &mut stack, &mut unresolved, &mut cycles);

    let error = ExpandError::from_sets(unresolved, cycles);
    if error.is_empty() {
      (expanded, None)
    } else {
      (expanded, Some(error))
    }
  }

  /// Expand each value of this map against `scope`.
  ///
  /// Names are looked up in `scope` first and then in this map, so a value
  /// may refer to its sibling entries.
  pub fn resolve_from(&self, scope: &Variables) -> Result<Variables, ExpandError> {
    match self.resolve_from_lossy(scope) {
      (resolved, None) => Ok(resolved),
      (_, Some(error)) => Err(error),
    }
  }

  /// Like [`Variables::resolve_from`], keeping partially expanded values.
  pub fn resolve_from_lossy(&self, scope: &Variables) -> (Variables, Option<ExpandError>) {
    let mut combined = self.clone();
    combined.merge(scope);

    let mut composite = ExpandError::default();
    let mut resolved = Variables::new();
    for (name, value) in &self.values {
      let (expanded, error) = combined.expand_lossy(value);
      if let Some(error) = error {
        composite.absorb(error);
      }
      resolved.set(name.clone(), expanded);
    }

    if composite.is_empty() {
      (resolved, None)
    } else {
      (resolved, Some(composite))
    }
  }

  fn expand_into(
    &self,
    text: &str,
    stack: &mut Vec<String>,
    unresolved: &mut BTreeSet<String>,
    cycles: &mut BTreeSet<String>,
  ) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
      out.push_str(&rest[..pos]);
      let tail = &rest[pos..];

      // `$${` is an escaped literal `${`
      if let Some(after) = tail.strip_prefix("$${") {
        out.push_str("${");
        rest = after;
        continue;
      }

      let Some(body) = tail.strip_prefix("${") else {
        out.push('$');
        rest = &tail[1..];
        continue;
      };

      let Some(end) = body.find('}') else {
        out.push_str(tail);
        rest = "";
        break;
      };

      let name = &body[..end];
      rest = &body[end + 1..];

      if name.is_empty() {
        out.push_str("${}");
        continue;
      }

      if stack.iter().any(|entry| entry == name) {
        cycles.insert(name.to_string());
        push_placeholder(&mut out, name);
        continue;
      }

      match self.values.get(name) {
        Some(value) => {
          stack.push(name.to_string());
          let expanded = self.expand_into(value, stack, unresolved, cycles);
          stack.pop();
          out.push_str(&expanded);
        }
        None => {
          unresolved.insert(name.to_string());
          push_placeholder(&mut out, name);
        }
      }
    }

    out.push_str(rest);
    out
  }
}

fn push_placeholder(out: &mut String, name: &str) {
  out.push_str("${");
  out.push_str(name);
  out.push('}');
}

impl FromIterator<(String, String)> for Variables {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    Self {
      values: iter.into_iter().collect(),
    }
  }
}

impl From<BTreeMap<String, String>> for Variables {
  fn from(values: BTreeMap<String, String>) -> Self {
    Self { values }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars(pairs: &[(&str, &str)]) -> Variables {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_expand_reports_only_missing_and_substitutes_rest() {
    let scope = vars(&[("a", "1")]);

    let (text, error) = scope.expand_lossy("${a}-${b}");
    assert_eq!(text, "1-${b}");
    assert_eq!(error.unwrap().unresolved, vec!["b"]);

    let error = scope.expand("${a}-${b}").unwrap_err();
    assert_eq!(error.unresolved, vec!["b"]);
    assert!(error.cycles.is_empty());
  }

  #[test]
  fn test_expand_is_recursive() {
    let scope = vars(&[("root", "/srv"), ("bin", "${root}/bin")]);
    assert_eq!(scope.expand("${bin}/tool").unwrap(), "/srv/bin/tool");
  }

  #[test]
  fn test_expand_collects_all_missing() {
    let scope = Variables::new();
    let error = scope.expand("${z} ${x} ${z} ${y}").unwrap_err();
    assert_eq!(error.unresolved, vec!["x", "y", "z"]);
  }

  #[test]
  fn test_expand_detects_cycles() {
    let scope = vars(&[("a", "${b}"), ("b", "${a}")]);
    let error = scope.expand("${a}").unwrap_err();
    assert_eq!(error.cycles, vec!["a"]);
    assert!(error.unresolved.is_empty());
  }

  #[test]
  fn test_expand_escape_and_plain_dollar() {
    let scope = vars(&[("a", "1")]);
    assert_eq!(scope.expand("$HOME $${a} ${a}").unwrap(), "$HOME ${a} 1");
  }

  #[test]
  fn test_unterminated_placeholder_is_literal() {
    let scope = Variables::new();
    assert_eq!(scope.expand("cost ${oops").unwrap(), "cost ${oops");
  }

  #[test]
  fn test_resolve_from_prefers_scope() {
    let env = vars(&[("PATH", "${ROOT}/bin"), ("HOME_BIN", "${PATH}")]);
    let scope = vars(&[("ROOT", "/opt")]);

    let resolved = env.resolve_from(&scope).unwrap();
    assert_eq!(resolved.get("PATH"), Some("/opt/bin"));
    assert_eq!(resolved.get("HOME_BIN"), Some("/opt/bin"));
    assert_eq!(resolved.len(), 2);
  }

  #[test]
  fn test_resolve_from_collects_errors_across_entries() {
    let env = vars(&[("A", "${X}"), ("B", "${Y}")]);
    let (resolved, error) = env.resolve_from_lossy(&Variables::new());

    assert_eq!(resolved.get("A"), Some("${X}"));
    assert_eq!(error.unwrap().unresolved, vec!["X", "Y"]);
  }

  #[test]
  fn test_filter_and_merge() {
    let mut scope = vars(&[("APP_A", "1"), ("APP_SECRET", "s"), ("OTHER", "o")]);
    let filtered = scope.filter(&VariableFilter {
      include: vec!["APP_*".to_string()],
      exclude: vec!["*SECRET".to_string()],
    });
    assert_eq!(filtered, vars(&[("APP_A", "1")]));

    scope.merge(&vars(&[("OTHER", "new")]));
    assert_eq!(scope.get("OTHER"), Some("new"));
  }

  #[test]
  fn test_load_scalars() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vars.yaml");
    std::fs::write(&path, "NAME: demo\nPORT: 8080\nDEBUG: true\nEMPTY:\n").unwrap();

    let loaded = Variables::load(&path).unwrap();
    assert_eq!(loaded.get("NAME"), Some("demo"));
    assert_eq!(loaded.get("PORT"), Some("8080"));
    assert_eq!(loaded.get("DEBUG"), Some("true"));
    assert_eq!(loaded.get("EMPTY"), Some(""));
  }

  #[test]
  fn test_load_rejects_nested_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vars.yaml");
    std::fs::write(&path, "NESTED:\n  a: 1\n").unwrap();

    let error = Variables::load(&path).unwrap_err();
    assert!(matches!(error, VarsError::NotScalar { name, .. } if name == "NESTED"));
  }

  #[test]
  fn test_parse_literal() {
    assert_eq!(
      Variables::parse_literal("A=b=c").unwrap(),
      ("A".to_string(), "b=c".to_string())
    );
    assert!(Variables::parse_literal("novalue").is_err());
    assert!(Variables::parse_literal("=x").is_err());
  }
}
