use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use devflow_docker::DockerCoordinator;
use devflow_engine::{Engine, EngineConfig, EngineError};
use devflow_vars::Variables;

/// Exit status after an interrupt, as a shell reports SIGINT.
const INTERRUPTED: u8 = 130;

/// Devflow - run developer workflows in containers
#[derive(Parser)]
#[command(name = "devflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Project root (default: the workflow file's directory)
  #[arg(long, global = true)]
  root: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow
  Run(RunArgs),

  /// Validate a workflow without running anything
  Check {
    /// Path to the workflow file (YAML or JSON)
    workflow_file: PathBuf,
  },
}

#[derive(Args)]
struct RunArgs {
  /// Path to the workflow file (YAML or JSON)
  workflow_file: PathBuf,

  /// Set a variable, overriding the workflow's defaults
  #[arg(long = "var", value_name = "NAME=VALUE")]
  vars: Vec<String>,

  /// Load variables from a YAML or JSON file
  #[arg(long = "var-file", value_name = "FILE")]
  var_files: Vec<PathBuf>,

  /// Treat failed steps as successful
  #[arg(long)]
  ignore_failure: bool,

  /// Continue when variables are missing
  #[arg(long)]
  ignore_missing: bool,

  /// Continue when steps are invalid
  #[arg(long)]
  ignore_validation: bool,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = tokio::runtime::Runtime::new()
    .context("failed to start runtime")
    .and_then(|rt| rt.block_on(dispatch(cli)));

  match result {
    Ok(code) => code,
    Err(err) if is_cancelled(&err) => ExitCode::from(INTERRUPTED),
    Err(err) => {
      eprintln!("error: {err:#}");
      ExitCode::FAILURE
    }
  }
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_env("DEVFLOW_LOG").unwrap_or_else(|_| EnvFilter::new(default));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .try_init();
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
  match cli.command {
    Commands::Run(args) => run_workflow(args, cli.root).await,
    Commands::Check { workflow_file } => check_workflow(&workflow_file, cli.root).await,
  }
}

async fn run_workflow(args: RunArgs, root: Option<PathBuf>) -> Result<ExitCode> {
  let scope = load_scope(&args)?;
  let engine = engine(&args.workflow_file, root)?;

  let mut workflow = engine.load(&args.workflow_file, &scope).await?;
  workflow.policy.ignore_failure |= args.ignore_failure;
  workflow.policy.ignore_missing |= args.ignore_missing;
  workflow.policy.ignore_validation |= args.ignore_validation;

  let cancel = CancellationToken::new();
  let interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("interrupted");
      interrupt.cancel();
    }
  });

  let workflow = engine.execute(workflow, &cancel).await?;
  info!(workflow = %workflow.name, "workflow_completed");
  Ok(ExitCode::SUCCESS)
}

async fn check_workflow(workflow_file: &Path, root: Option<PathBuf>) -> Result<ExitCode> {
  let engine = engine(workflow_file, root)?;
  let workflow = engine.load(workflow_file, &Variables::new()).await?;

  let errors = engine.check(&workflow);
  for error in &errors {
    eprintln!("{error}");
  }
  if errors.is_empty() {
    println!("{}: ok", workflow.name);
    Ok(ExitCode::SUCCESS)
  } else {
    Ok(ExitCode::FAILURE)
  }
}

fn engine(workflow_file: &Path, root: Option<PathBuf>) -> Result<Engine> {
  let root = match root {
    Some(root) => root,
    None => workflow_file
      .parent()
      .filter(|parent| !parent.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from(".")),
  };
  let root = std::fs::canonicalize(&root)
    .with_context(|| format!("failed to resolve project root: {}", root.display()))?;
  debug!(root = %root.display(), "project_root");

  let coordinator = Arc::new(DockerCoordinator::new());
  Ok(Engine::new(coordinator, EngineConfig::new(root)))
}

/// Variable files first, then literals, later entries winning.
fn load_scope(args: &RunArgs) -> Result<Variables> {
  let mut scope = Variables::new();
  for path in &args.var_files {
    scope.merge(&Variables::load(path)?);
  }
  for literal in &args.vars {
    let (name, value) = Variables::parse_literal(literal)?;
    scope.set(name, value);
  }
  Ok(scope)
}

fn is_cancelled(err: &anyhow::Error) -> bool {
  err
    .downcast_ref::<EngineError>()
    .is_some_and(EngineError::is_cancelled)
}
