//! Build context staging.

use std::fs;
use std::path::{Path, PathBuf};

use devflow_coordinator::{BuildOptions, CONTEXT_SCRIPT_PATH, CoordinatorError};
use devflow_vars::Glob;
use devflow_workflow::SourceFilter;
use walkdir::WalkDir;

/// Path of the generated Dockerfile inside a staged context.
pub(crate) const CONTEXT_DOCKERFILE_PATH: &str = ".devflow/Dockerfile";

/// Selects which context files are sent to the builder.
///
/// Patterns match paths relative to the context root, using `/` separators.
/// An empty include list selects every file.
pub(crate) struct SourceSelector {
  include: Vec<Glob>,
  exclude: Vec<Glob>,
}

impl SourceSelector {
  pub(crate) fn new(filter: &SourceFilter) -> Result<Self, String> {
    let compile = |patterns: &[String]| {
      patterns
        .iter()
        .map(|pattern| Glob::new(pattern).map_err(|e| format!("invalid source pattern '{pattern}': {e}")))
        .collect::<Result<Vec<_>, _>>()
    };
    Ok(Self {
      include: compile(&filter.include)?,
      exclude: compile(&filter.exclude)?,
    })
  }

  pub(crate) fn matches(&self, path: &str) -> bool {
    let included = self.include.is_empty() || self.include.iter().any(|g| g.is_match(path));
    included && !self.exclude.iter().any(|g| g.is_match(path))
  }
}

/// Copy the selected sources, the generated script and the generated
/// Dockerfile into `staging`. Returns the Dockerfile path.
pub(crate) fn stage_context(
  tag: &str,
  options: &BuildOptions,
  staging: &Path,
) -> Result<PathBuf, CoordinatorError> {
  let selector = SourceSelector::new(&options.source).map_err(|message| CoordinatorError::Build {
    image: tag.to_string(),
    message,
  })?;
  let root = &options.context_dir;

  let walker = WalkDir::new(root)
    .follow_links(false)
    .into_iter()
    .filter_entry(|entry| entry.file_name() != ".git");

  for entry in walker {
    let entry = entry.map_err(|e| io_error(format!("failed to read {}", root.display()), e.into()))?;
    if !entry.file_type().is_file() {
      continue;
    }
    let Ok(relative) = entry.path().strip_prefix(root) else {
      continue;
    };
    let relative = relative.to_string_lossy().replace('\\', "/");
    if !selector.matches(&relative) {
      continue;
    }

    let target = staging.join(&relative);
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent).map_err(|e| io_error(format!("failed to create {}", parent.display()), e))?;
    }
    fs::copy(entry.path(), &target).map_err(|e| io_error(format!("failed to copy {relative}"), e))?;
  }

  let generated = staging.join(".devflow");
  fs::create_dir_all(&generated).map_err(|e| io_error("failed to stage generated files".to_string(), e))?;

  if let Some(script) = &options.script {
    write(&staging.join(CONTEXT_SCRIPT_PATH), script)?;
  }
  let dockerfile = staging.join(CONTEXT_DOCKERFILE_PATH);
  write(&dockerfile, &options.dockerfile)?;
  Ok(dockerfile)
}

fn write(path: &Path, contents: &str) -> Result<(), CoordinatorError> {
  fs::write(path, contents).map_err(|e| io_error(format!("failed to write {}", path.display()), e))
}

fn io_error(message: String, source: std::io::Error) -> CoordinatorError {
  CoordinatorError::Io { message, source }
}
