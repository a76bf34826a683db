//! Minimal glob matching over names and relative paths.
//!
//! `**` matches anything, `*` matches within one path segment and `?` matches
//! a single non-separator character. Everything else is literal.

use regex::Regex;

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Glob {
  pattern: String,
  regex: Regex,
}

impl Glob {
  /// Compile a glob pattern.
  pub fn new(pattern: &str) -> Result<Self, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
      match c {
        '*' if chars.peek() == Some(&'*') => {
          chars.next();
          expr.push_str(".*");
        }
        '*' => expr.push_str("[^/]*"),
        '?' => expr.push_str("[^/]"),
        other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
      }
    }

    expr.push('$');
    Ok(Self {
      pattern: pattern.to_string(),
      regex: Regex::new(&expr)?,
    })
  }

  /// Test a name or relative path against the pattern.
  pub fn is_match(&self, text: &str) -> bool {
    self.regex.is_match(text)
  }

  /// The original pattern text.
  pub fn as_str(&self) -> &str {
    &self.pattern
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_star_stays_within_segment() {
    let glob = Glob::new("src/*.rs").unwrap();
    assert!(glob.is_match("src/main.rs"));
    assert!(!glob.is_match("src/bin/tool.rs"));
  }

  #[test]
  fn test_double_star_crosses_segments() {
    let glob = Glob::new("src/**").unwrap();
    assert!(glob.is_match("src/bin/tool.rs"));
    assert!(!glob.is_match("tests/a.rs"));
  }

  #[test]
  fn test_literal_characters_are_escaped() {
    let glob = Glob::new("a.b?").unwrap();
    assert!(glob.is_match("a.bc"));
    assert!(!glob.is_match("axbc"));
  }
}
