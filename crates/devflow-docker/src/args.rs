//! Docker CLI argument assembly.

use std::path::Path;

use devflow_coordinator::RunSpec;

/// Label attached to every container devflow starts.
pub(crate) const POD_LABEL: &str = "devflow.pod";

pub(crate) fn build_args(tag: &str, dockerfile: &Path, context: &Path) -> Vec<String> {
  vec![
    "build".to_string(),
    "--tag".to_string(),
    tag.to_string(),
    "--file".to_string(),
    dockerfile.display().to_string(),
    context.display().to_string(),
  ]
}

pub(crate) fn commit_args(container: &str, tag: &str) -> Vec<String> {
  vec!["commit".to_string(), container.to_string(), tag.to_string()]
}

pub(crate) fn run_args(spec: &RunSpec) -> Vec<String> {
  let mut args = vec![
    "run".to_string(),
    "--detach".to_string(),
    "--name".to_string(),
    spec.name.clone(),
    "--label".to_string(),
    format!("{POD_LABEL}={}", spec.name),
    "--workdir".to_string(),
    spec.workdir.clone(),
  ];

  for (name, value) in &spec.env {
    args.push("--env".to_string());
    args.push(format!("{name}={value}"));
  }

  for volume in &spec.volumes {
    let mut mount = format!("{}:{}", volume.host, volume.container);
    if volume.readonly {
      mount.push_str(":ro");
    }
    args.push("--volume".to_string());
    args.push(mount);
  }

  for port in &spec.ports {
    args.push("--publish".to_string());
    args.push(match port.host {
      Some(host) => format!("{host}:{}", port.port),
      None => port.port.to_string(),
    });
  }

  args.push(spec.image.clone());
  if let Some(command) = &spec.command {
    args.extend(command.iter().cloned());
  }
  args
}

pub(crate) fn logs_args(container: &str) -> Vec<String> {
  vec!["logs".to_string(), "--follow".to_string(), container.to_string()]
}

pub(crate) fn wait_args(container: &str) -> Vec<String> {
  vec!["wait".to_string(), container.to_string()]
}

pub(crate) fn exec_args(container: &str, script: &str) -> Vec<String> {
  vec![
    "exec".to_string(),
    container.to_string(),
    "/bin/sh".to_string(),
    "-c".to_string(),
    script.to_string(),
  ]
}

pub(crate) fn address_args(container: &str) -> Vec<String> {
  vec![
    "inspect".to_string(),
    "--format".to_string(),
    "{{range .NetworkSettings.Networks}}{{.IPAddress}} {{end}}".to_string(),
    container.to_string(),
  ]
}

pub(crate) fn remove_args(container: &str) -> Vec<String> {
  vec!["rm".to_string(), "--force".to_string(), container.to_string()]
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;
  use std::sync::Arc;

  use devflow_coordinator::{OutputReceiver, PodListener};
  use devflow_workflow::{Port, Volume};

  use super::*;

  struct Silent;

  impl PodListener for Silent {
    fn container(&self, _id: &str) {}
    fn ready(&self) {}
    fn done(&self, _failed: bool, _message: &str) {}
  }

  impl OutputReceiver for Silent {
    fn variable(&self, _name: &str, _value: &str) {}
    fn workflow(&self, _text: &str) {}
  }

  fn spec() -> RunSpec {
    RunSpec {
      name: "devflow-db-1a2b3c4d".to_string(),
      image: "devflow-db:abc".to_string(),
      command: None,
      workdir: "/src".to_string(),
      env: BTreeMap::new(),
      volumes: Vec::new(),
      ports: Vec::new(),
      readiness: None,
      liveness: None,
      capture_workflow: false,
      listener: Arc::new(Silent),
      receiver: Arc::new(Silent),
    }
  }

  #[test]
  fn test_run_args_minimal() {
    assert_eq!(
      run_args(&spec()),
      vec![
        "run",
        "--detach",
        "--name",
        "devflow-db-1a2b3c4d",
        "--label",
        "devflow.pod=devflow-db-1a2b3c4d",
        "--workdir",
        "/src",
        "devflow-db:abc",
      ]
    );
  }

  #[test]
  fn test_run_args_full() {
    let mut spec = spec();
    spec.env.insert("PGUSER".to_string(), "app".to_string());
    spec.volumes.push(Volume {
      host: "/project/data".to_string(),
      container: "/data".to_string(),
      readonly: true,
    });
    spec.ports.push(Port {
      port: 5432,
      host: Some(15432),
    });
    spec.ports.push(Port { port: 80, host: None });
    spec.command = Some(vec!["/bin/sh".to_string(), "/devflow/script.sh".to_string()]);

    let args = run_args(&spec);
    let tail = &args[8..];
    assert_eq!(
      tail,
      [
        "--env",
        "PGUSER=app",
        "--volume",
        "/project/data:/data:ro",
        "--publish",
        "15432:5432",
        "--publish",
        "80",
        "devflow-db:abc",
        "/bin/sh",
        "/devflow/script.sh",
      ]
    );
  }
}
