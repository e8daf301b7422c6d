use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_config::WorkflowDefinition;
use weft_orchestrator::{Orchestrator, OrchestratorConfig};
use weft_tool::{ToolRegistry, builtin_registry};
use weft_workflow::ExecutionState;

/// Weft - a workflow orchestration engine
#[derive(Parser)]
#[command(name = "weft")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.weft)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Orchestrator config file (default: <data-dir>/config.json if present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Log level used when RUST_LOG is not set
  #[arg(long, global = true, default_value = "info")]
  log_level: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow definition to completion
  Run {
    /// Path to the workflow definition (JSON)
    workflow_file: PathBuf,

    /// Workflow input as key=value; the value is parsed as JSON when possible
    #[arg(long = "input", value_name = "KEY=VALUE")]
    inputs: Vec<String>,
  },

  /// Check a workflow definition without running it
  Validate {
    /// Path to the workflow definition (JSON)
    workflow_file: PathBuf,
  },

  /// List the built-in tools
  Tools,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(&cli.log_level)?;

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".weft"),
  };

  match cli.command {
    Some(Commands::Run {
      workflow_file,
      inputs,
    }) => {
      let config = load_config(cli.config.as_deref(), &data_dir)?;
      run_workflow(workflow_file, inputs, config)?;
    }
    Some(Commands::Validate { workflow_file }) => {
      let definition = read_definition(&workflow_file)?;
      eprintln!(
        "Workflow '{}' is valid ({} steps)",
        definition.name,
        definition.steps.len()
      );
    }
    Some(Commands::Tools) => {
      let registry = builtin_registry();
      for name in registry.names() {
        let description = registry
          .get(&name)
          .map(|tool| tool.description().to_string())
          .unwrap_or_default();
        println!("{:<8} {}", name, description);
      }
    }
    None => {
      println!("weft - use --help to see available commands");
    }
  }

  Ok(())
}

/// Log to stderr so stdout stays machine-readable.
fn init_tracing(level: &str) -> Result<()> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(level))
    .with_context(|| format!("invalid log level: {}", level))?;

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
  Ok(())
}

fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<OrchestratorConfig> {
  let path = match explicit {
    Some(path) => path.to_path_buf(),
    None => {
      let default_path = data_dir.join("config.json");
      if !default_path.exists() {
        return Ok(OrchestratorConfig::default());
      }
      default_path
    }
  };

  let content = std::fs::read_to_string(&path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  let config = OrchestratorConfig::from_json(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))?;

  info!(path = %path.display(), "config_loaded");
  Ok(config)
}

fn read_definition(workflow_file: &Path) -> Result<WorkflowDefinition> {
  let content = std::fs::read_to_string(workflow_file)
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  WorkflowDefinition::from_json(&content)
    .with_context(|| format!("failed to load workflow file: {}", workflow_file.display()))
}

fn run_workflow(workflow_file: PathBuf, inputs: Vec<String>, config: OrchestratorConfig) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_workflow_async(workflow_file, inputs, config).await })
}

async fn run_workflow_async(
  workflow_file: PathBuf,
  input_args: Vec<String>,
  config: OrchestratorConfig,
) -> Result<()> {
  let definition = read_definition(&workflow_file)?;
  eprintln!("Loaded workflow: {}", definition.name);

  // Stdin provides the base inputs; --input flags override them
  let mut inputs = read_inputs_from_stdin()?;
  for arg in &input_args {
    let (key, value) = parse_input_arg(arg)?;
    inputs.insert(key, value);
  }

  let orchestrator = Orchestrator::with_config(Arc::new(builtin_registry()), config)
    .context("invalid orchestrator configuration")?;
  let execution_id = orchestrator
    .create_execution(definition, inputs)
    .context("failed to create execution")?;

  let cancel = CancellationToken::new();
  tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, cancelling");
        cancel.cancel();
      }
    }
  });

  let result = orchestrator.run(&execution_id, cancel).await;

  let execution = orchestrator.execution(&execution_id)?;
  let snapshot = execution.snapshot();
  let outputs = match &result {
    Ok(outputs) => Value::Object(outputs.clone()),
    Err(_) => Value::Null,
  };

  let report = serde_json::json!({
    "outputs": outputs,
    "execution": snapshot,
  });
  println!("{}", serde_json::to_string_pretty(&report)?);

  match result {
    Ok(_) => {
      eprintln!("Execution completed: {}", execution_id);
      Ok(())
    }
    Err(e) if execution.state() == ExecutionState::Cancelled => {
      Err(e).with_context(|| format!("execution {} was cancelled", execution_id))
    }
    Err(e) => Err(e).with_context(|| format!("execution {} failed", execution_id)),
  }
}

fn parse_input_arg(arg: &str) -> Result<(String, Value)> {
  let Some((key, raw)) = arg.split_once('=') else {
    bail!("invalid --input '{}': expected KEY=VALUE", arg);
  };
  if key.is_empty() {
    bail!("invalid --input '{}': empty key", arg);
  }
  let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
  Ok((key.to_string(), value))
}

fn read_inputs_from_stdin() -> Result<Map<String, Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(Map::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read inputs from stdin")?;

  if input.trim().is_empty() {
    return Ok(Map::new());
  }

  match serde_json::from_str(&input).context("failed to parse inputs JSON from stdin")? {
    Value::Object(map) => Ok(map),
    other => bail!("stdin inputs must be a JSON object, got: {}", other),
  }
}
