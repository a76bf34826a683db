//! Image build planning and Dockerfile synthesis.

use std::collections::BTreeMap;

use devflow_coordinator::{BuildOptions, CONTEXT_SCRIPT_PATH, IMAGE_SCRIPT_PATH};
use devflow_workflow::{PickedImage, StepKind, StepSelector, Workflow, WorkflowStep};

use crate::config::EngineConfig;
use crate::error::EngineError;

/// A container snapshot taken before the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
  pub container: String,
  pub tag: String,
}

/// Everything a step's image build needs, computed from workflow state.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildPlan {
  pub tag: String,
  /// Containers to commit first: the previous step's, then pick sources.
  pub commits: Vec<Commit>,
  /// An image built from a declared Dockerfile, used as the base.
  pub base: Option<(String, BuildOptions)>,
  pub options: BuildOptions,
  pub script: Option<String>,
  pub picks: Vec<PickedImage>,
}

/// Plan the image build of the prepared step at `selector`.
pub fn plan_build(
  workflow: &Workflow,
  selector: &StepSelector,
  step: &WorkflowStep,
  config: &EngineConfig,
) -> Result<BuildPlan, EngineError> {
  let build_error = |message: String| EngineError::Build {
    step: step.name().to_string(),
    message,
  };
  let script = step
    .script()
    .ok_or_else(|| build_error("step has no script to build".to_string()))?;

  let mut commits = Vec::new();
  let mut base = None;

  let from = if script.previous {
    let previous = workflow
      .previous_leaf(selector)
      .and_then(|s| workflow.step(&s))
      .ok_or_else(|| build_error("there is no previous step to continue from".to_string()))?;
    let container = previous
      .state
      .generated_container
      .as_ref()
      .filter(|_| previous.state.prepared)
      .ok_or_else(|| build_error(format!("previous step '{}' has not run yet", previous.name())))?;
    let tag = image_tag(&config.image_prefix, previous.name(), "commit");
    commits.push(Commit {
      container: container.clone(),
      tag: tag.clone(),
    });
    tag
  } else if let Some(dockerfile) = script.dockerfile.as_deref().filter(|d| !d.trim().is_empty()) {
    let path = config.project_root.join(dockerfile);
    let context_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| config.project_root.clone());
    let tag = image_tag(&config.image_prefix, step.name(), "base");
    base = Some((
      tag.clone(),
      BuildOptions {
        context_dir,
        dockerfile_path: Some(path),
        ..BuildOptions::default()
      },
    ));
    tag
  } else if let Some(image) = script.image.as_deref().filter(|i| !i.trim().is_empty()) {
    image.to_string()
  } else {
    return Err(build_error("no image source".to_string()));
  };

  // One stage per distinct source step.
  let mut stages: BTreeMap<&str, usize> = BTreeMap::new();
  let mut picks = Vec::new();
  for pick in &script.picks {
    if stages.contains_key(pick.step.as_str()) {
      continue;
    }
    let source = workflow
      .find_step(&pick.step)
      .map(|(_, s)| s)
      .ok_or_else(|| build_error(format!("unknown pick source step '{}'", pick.step)))?;
    let container = source
      .state
      .generated_container
      .as_ref()
      .ok_or_else(|| build_error(format!("pick source step '{}' has not run yet", pick.step)))?;
    let tag = image_tag(&config.image_prefix, &pick.step, "pick");
    commits.push(Commit {
      container: container.clone(),
      tag: tag.clone(),
    });
    stages.insert(pick.step.as_str(), picks.len());
    picks.push(PickedImage {
      step: pick.step.clone(),
      image: tag,
    });
  }

  let generated_script = (!script.script.trim().is_empty()).then(|| render_script(&script.script));
  let dockerfile = render_dockerfile(step, &from, &picks, &stages, generated_script.is_some());

  Ok(BuildPlan {
    tag: image_tag(&config.image_prefix, step.name(), ""),
    commits,
    base,
    options: BuildOptions {
      context_dir: config.project_root.clone(),
      dockerfile_path: None,
      dockerfile,
      script: generated_script.clone(),
      source: script.source.clone(),
    },
    script: generated_script,
    picks,
  })
}

fn render_script(script: &str) -> String {
  format!("#!/bin/sh\nset -e\n{}\n", script.trim_end())
}

fn render_dockerfile(
  step: &WorkflowStep,
  from: &str,
  picks: &[PickedImage],
  stages: &BTreeMap<&str, usize>,
  has_script: bool,
) -> String {
  let mut lines = Vec::new();
  for pick in picks {
    lines.push(format!("FROM {}", pick.image));
  }
  lines.push(format!("FROM {from}"));

  let Some(script) = step.script() else {
    return lines.join("\n") + "\n";
  };

  for pick in &script.picks {
    if let Some(stage) = stages.get(pick.step.as_str()) {
      lines.push(format!("COPY --from={stage} {} {}", pick.source, pick.destination));
    }
  }

  lines.push(format!("WORKDIR {}", script.workdir));
  lines.push(format!("COPY . {}", script.workdir));

  if has_script {
    lines.push(format!("COPY {CONTEXT_SCRIPT_PATH} {IMAGE_SCRIPT_PATH}"));
  }

  if let StepKind::Service(service) = &step.kind {
    for port in &service.ports {
      lines.push(format!("EXPOSE {}", port.port));
    }
  }

  if script.cache && has_script {
    lines.push(format!("RUN /bin/sh {IMAGE_SCRIPT_PATH}"));
  }

  lines.join("\n") + "\n"
}

/// A fresh, never reused image tag.
pub fn image_tag(prefix: &str, step: &str, suffix: &str) -> String {
  let mut repository = format!("{}-{}", sanitize(prefix), sanitize(step));
  if !suffix.is_empty() {
    repository.push('-');
    repository.push_str(suffix);
  }
  format!("{repository}:{}", uuid::Uuid::new_v4().simple())
}

/// Lowercase a name and replace anything outside `[a-z0-9_.-]`.
pub fn sanitize(name: &str) -> String {
  let sanitized: String = name
    .to_lowercase()
    .chars()
    .map(|c| match c {
      'a'..='z' | '0'..='9' | '_' | '.' | '-' => c,
      _ => '-',
    })
    .collect();
  let trimmed = sanitized.trim_matches(|c| c == '-' || c == '.' || c == '_');
  if trimmed.is_empty() {
    "step".to_string()
  } else {
    trimmed.to_string()
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use devflow_workflow::{CherryPick, Port, RunStep, ScriptOptions, ServiceStep};

  use super::*;

  fn script(image: Option<&str>) -> ScriptOptions {
    ScriptOptions {
      image: image.map(str::to_string),
      script: "make".to_string(),
      workdir: "/src".to_string(),
      ..ScriptOptions::default()
    }
  }

  fn run(name: &str, script: ScriptOptions) -> WorkflowStep {
    let mut step = WorkflowStep::new(
      name,
      StepKind::Run(RunStep {
        script,
        parallel: false,
      }),
    );
    step.state.prepared = true;
    step
  }

  fn config() -> EngineConfig {
    EngineConfig::new("/project")
  }

  #[test]
  fn test_plan_from_declared_image() {
    let step = run("Compile Step", script(Some("rust:1")));
    let workflow = Workflow::new("wf", vec![step.clone()], PathBuf::from("/project"));
    let plan = plan_build(&workflow, &vec![0].into(), &step, &config()).unwrap();

    assert!(plan.tag.starts_with("devflow-compile-step:"));
    assert!(plan.commits.is_empty());
    assert_eq!(
      plan.options.dockerfile,
      "FROM rust:1\nWORKDIR /src\nCOPY . /src\nCOPY .devflow/script.sh /devflow/script.sh\n"
    );
    assert_eq!(plan.script.as_deref(), Some("#!/bin/sh\nset -e\nmake\n"));
    assert_eq!(plan.options.context_dir, PathBuf::from("/project"));
  }

  #[test]
  fn test_tags_are_unique() {
    assert_ne!(image_tag("p", "s", ""), image_tag("p", "s", ""));
  }

  #[test]
  fn test_plan_from_previous_requires_container() {
    let first = run("first", script(Some("alpine")));
    let mut second_script = script(None);
    second_script.previous = true;
    let second = run("second", second_script);
    let mut workflow = Workflow::new("wf", vec![first, second.clone()], PathBuf::from("/project"));

    let error = plan_build(&workflow, &vec![1].into(), &second, &config()).unwrap_err();
    assert!(error.to_string().contains("has not run yet"));

    workflow.steps[0].state.generated_container = Some("c0ffee".to_string());
    let plan = plan_build(&workflow, &vec![1].into(), &second, &config()).unwrap();
    assert_eq!(plan.commits.len(), 1);
    assert_eq!(plan.commits[0].container, "c0ffee");
    assert!(plan.options.dockerfile.starts_with(&format!("FROM {}\n", plan.commits[0].tag)));
  }

  #[test]
  fn test_plan_from_dockerfile_builds_base() {
    let mut options = script(None);
    options.dockerfile = Some("docker/Dockerfile".to_string());
    let step = run("custom", options);
    let workflow = Workflow::new("wf", vec![step.clone()], PathBuf::from("/project"));

    let plan = plan_build(&workflow, &vec![0].into(), &step, &config()).unwrap();
    let (base_tag, base) = plan.base.unwrap();
    assert_eq!(base.dockerfile_path, Some(PathBuf::from("/project/docker/Dockerfile")));
    assert_eq!(base.context_dir, PathBuf::from("/project/docker"));
    assert!(plan.options.dockerfile.starts_with(&format!("FROM {base_tag}\n")));
  }

  #[test]
  fn test_picks_share_one_stage_per_source() {
    let mut source = run("compile", script(Some("rust:1")));
    source.state.generated_container = Some("abc".to_string());

    let mut options = script(Some("debian"));
    options.cache = true;
    for (from, to) in [("/out/a", "/bin/a"), ("/out/b", "/bin/b")] {
      options.picks.push(CherryPick {
        step: "compile".to_string(),
        source: from.to_string(),
        destination: to.to_string(),
      });
    }
    let step = run("package", options);
    let workflow = Workflow::new("wf", vec![source, step.clone()], PathBuf::from("/project"));

    let plan = plan_build(&workflow, &vec![1].into(), &step, &config()).unwrap();
    assert_eq!(plan.commits.len(), 1);
    assert_eq!(plan.picks.len(), 1);

    let dockerfile = &plan.options.dockerfile;
    assert!(dockerfile.starts_with(&format!("FROM {}\nFROM debian\n", plan.picks[0].image)));
    assert!(dockerfile.contains("COPY --from=0 /out/a /bin/a\nCOPY --from=0 /out/b /bin/b\n"));
    assert!(dockerfile.ends_with("RUN /bin/sh /devflow/script.sh\n"));
  }

  #[test]
  fn test_pick_from_step_that_has_not_run() {
    let source = run("compile", script(Some("rust:1")));
    let mut options = script(Some("debian"));
    options.picks.push(CherryPick {
      step: "compile".to_string(),
      source: "/out".to_string(),
      destination: "/in".to_string(),
    });
    let step = run("package", options);
    let workflow = Workflow::new("wf", vec![source, step.clone()], PathBuf::from("/project"));

    assert!(matches!(
      plan_build(&workflow, &vec![1].into(), &step, &config()),
      Err(EngineError::Build { .. })
    ));
  }

  #[test]
  fn test_service_ports_exposed() {
    let mut options = script(Some("postgres"));
    options.script = String::new();
    let step = WorkflowStep::new(
      "db",
      StepKind::Service(ServiceStep {
        script: options,
        ports: vec![Port {
          port: 5432,
          host: None,
        }],
        ..ServiceStep::default()
      }),
    );
    let workflow = Workflow::new("wf", vec![step.clone()], PathBuf::from("/project"));
    let plan = plan_build(&workflow, &vec![0].into(), &step, &config()).unwrap();

    assert!(plan.script.is_none());
    assert!(plan.options.dockerfile.contains("EXPOSE 5432\n"));
    assert!(!plan.options.dockerfile.contains(IMAGE_SCRIPT_PATH));
  }

  #[test]
  fn test_sanitize() {
    assert_eq!(sanitize("My Step/1"), "my-step-1");
    assert_eq!(sanitize("--"), "step");
  }
}
