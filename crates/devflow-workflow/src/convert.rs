//! Conversion from definitions to the executable step tree.

use std::collections::HashSet;
use std::time::Duration;

use devflow_config::{HealthCheckDef, ScriptDef, StepDef};
use devflow_vars::Variables;

use crate::error::WorkflowError;
use crate::step::{
  CherryPick, CompoundStep, DEFAULT_WORKDIR, ExternalStep, GeneratorStep, HealthCheck, Port,
  Probe, RunStep, ScriptOptions, ServiceStep, SourceFilter, StepKind, StepOptions, StepState,
  Volume, WorkflowStep,
};

pub(crate) fn convert_steps(defs: Vec<StepDef>) -> Result<Vec<WorkflowStep>, WorkflowError> {
  let mut names = HashSet::new();
  convert_level(defs, &mut names)
}

fn convert_level(
  defs: Vec<StepDef>,
  names: &mut HashSet<String>,
) -> Result<Vec<WorkflowStep>, WorkflowError> {
  defs
    .into_iter()
    .map(|def| convert_step(def, names))
    .collect()
}

fn convert_step(def: StepDef, names: &mut HashSet<String>) -> Result<WorkflowStep, WorkflowError> {
  if def.name.trim().is_empty() {
    return Err(WorkflowError::EmptyStepName);
  }
  if !names.insert(def.name.clone()) {
    return Err(WorkflowError::DuplicateStep { step: def.name });
  }

  let count = [
    def.run.is_some(),
    def.service.is_some(),
    def.call.is_some(),
    def.generate.is_some(),
    def.steps.is_some(),
  ]
  .into_iter()
  .filter(|set| *set)
  .count();

  if count != 1 {
    return Err(WorkflowError::StepVariant {
      step: def.name,
      count,
    });
  }

  let name = def.name;
  let kind = if let Some(run) = def.run {
    StepKind::Run(RunStep {
      script: script_options(run.script),
      parallel: run.parallel,
    })
  } else if let Some(service) = def.service {
    StepKind::Service(ServiceStep {
      script: script_options(service.script),
      ports: service
        .ports
        .into_iter()
        .map(|p| Port {
          port: p.port,
          host: p.host,
        })
        .collect(),
      readiness: service
        .readiness
        .map(|check| health_check(&name, check))
        .transpose()?,
      liveness: service
        .liveness
        .map(|check| health_check(&name, check))
        .transpose()?,
      skip_wait: service.skip_wait,
    })
  } else if let Some(call) = def.call {
    StepKind::External(ExternalStep {
      workflow: call.workflow,
      parallel: call.parallel,
      variables: call.variables,
    })
  } else if let Some(generate) = def.generate {
    StepKind::Generator(GeneratorStep {
      script: script_options(generate.script),
      parallel: generate.parallel,
      variables: generate.variables,
    })
  } else {
    let children = def.steps.unwrap_or_default();
    StepKind::Compound(CompoundStep {
      steps: convert_level(children, names)?,
    })
  };

  Ok(WorkflowStep {
    options: StepOptions {
      name,
      ignore_failure: def.ignore_failure,
      ignore_missing: def.ignore_missing,
      ignore_validation: def.ignore_validation,
    },
    state: StepState::default(),
    kind,
  })
}

fn script_options(def: ScriptDef) -> ScriptOptions {
  ScriptOptions {
    image: def.image,
    dockerfile: def.dockerfile,
    previous: def.previous,
    script: def.script,
    cache: def.cache,
    workdir: def.workdir.unwrap_or_else(|| DEFAULT_WORKDIR.to_string()),
    env: Variables::from(def.env),
    env_files: def.env_files,
    volumes: def
      .volumes
      .into_iter()
      .map(|v| Volume {
        host: v.host,
        container: v.container,
        readonly: v.readonly,
      })
      .collect(),
    picks: def
      .picks
      .into_iter()
      .map(|p| CherryPick {
        step: p.step,
        source: p.source,
        destination: p.destination,
      })
      .collect(),
    source: SourceFilter {
      include: def.source.include,
      exclude: def.source.exclude,
    },
  }
}

fn health_check(step: &str, def: HealthCheckDef) -> Result<HealthCheck, WorkflowError> {
  let mut probes = Vec::new();
  if let Some(tcp) = def.tcp {
    probes.push(Probe::Tcp { port: tcp.port });
  }
  if let Some(http) = def.http {
    probes.push(Probe::Http {
      port: http.port,
      path: http.path,
    });
  }
  if let Some(https) = def.https {
    probes.push(Probe::Https {
      port: https.port,
      path: https.path,
    });
  }
  if let Some(script) = def.script {
    probes.push(Probe::Script { script });
  }

  if probes.len() != 1 {
    return Err(WorkflowError::Probe {
      step: step.to_string(),
      message: format!(
        "expected exactly one of tcp, http, https or script (found {})",
        probes.len()
      ),
    });
  }

  let mut check = HealthCheck::new(probes.remove(0));
  if let Some(grace) = def.grace {
    check.grace = Duration::from_secs(grace);
  }
  if let Some(interval) = def.interval {
    check.interval = Duration::from_secs(interval);
  }
  if let Some(timeout) = def.timeout {
    check.timeout = Duration::from_secs(timeout);
  }
  if let Some(retries) = def.retries {
    check.retries = retries;
  }
  Ok(check)
}

#[cfg(test)]
mod tests {
  use devflow_config::{CallDef, RunDef, WorkflowDef};

  use super::*;

  fn run_def(name: &str) -> StepDef {
    StepDef {
      name: name.to_string(),
      run: Some(RunDef::default()),
      ..StepDef::default()
    }
  }

  #[test]
  fn test_rejects_zero_or_many_variants() {
    let none = StepDef {
      name: "none".to_string(),
      ..StepDef::default()
    };
    assert!(matches!(
      convert_steps(vec![none]),
      Err(WorkflowError::StepVariant { count: 0, .. })
    ));

    let mut both = run_def("both");
    both.call = Some(CallDef::default());
    assert!(matches!(
      convert_steps(vec![both]),
      Err(WorkflowError::StepVariant { count: 2, .. })
    ));
  }

  #[test]
  fn test_rejects_duplicate_names_across_levels() {
    let group = StepDef {
      name: "group".to_string(),
      steps: Some(vec![run_def("a")]),
      ..StepDef::default()
    };
    let result = convert_steps(vec![run_def("a"), group]);
    assert!(matches!(result, Err(WorkflowError::DuplicateStep { step }) if step == "a"));
  }

  #[test]
  fn test_defaults_applied() {
    let steps = convert_steps(vec![run_def("a")]).unwrap();
    assert_eq!(steps[0].script().unwrap().workdir, DEFAULT_WORKDIR);
  }

  #[test]
  fn test_probe_defaults_and_overrides() {
    let def = WorkflowDef::parse(
      r#"
steps:
  - name: web
    service:
      image: nginx
      readiness: { http: { port: 80 }, interval: 2 }
"#,
    )
    .unwrap();

    let steps = convert_steps(def.steps).unwrap();
    let StepKind::Service(service) = &steps[0].kind else {
      panic!("expected a service step");
    };
    let readiness = service.readiness.as_ref().unwrap();
    assert_eq!(
      readiness.probe,
      Probe::Http {
        port: 80,
        path: "/".to_string()
      }
    );
    assert_eq!(readiness.interval, Duration::from_secs(2));
    assert_eq!(readiness.timeout, HealthCheck::DEFAULT_TIMEOUT);
    assert_eq!(readiness.retries, HealthCheck::DEFAULT_RETRIES);
  }

  #[test]
  fn test_probe_requires_single_kind() {
    let def = WorkflowDef::parse(
      r#"
steps:
  - name: web
    service:
      image: nginx
      readiness: { grace: 1 }
"#,
    )
    .unwrap();

    assert!(matches!(
      convert_steps(def.steps),
      Err(WorkflowError::Probe { .. })
    ));
  }
}
