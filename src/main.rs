use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medalflow_config::PipelineConfig;
use medalflow_runtime::{RecencyVerifier, Runtime, RuntimeConfig, SystemClock};
use medalflow_store::{SqliteStore, Store};
use medalflow_workflow::Workflow;

/// Medalflow - pick a medal, count it, record it, verify it
#[derive(Parser)]
#[command(name = "medalflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to a pipeline config file (JSON). Defaults apply when omitted.
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Database URL, overriding the config file
  #[arg(long, global = true, env = "MEDALFLOW_DATABASE_URL")]
  database_url: Option<String>,

  /// Seed for the category picker, for reproducible runs
  #[arg(long, global = true)]
  seed: Option<u64>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the whole pipeline once
  Run,

  /// Run a single node, with a JSON payload from stdin as its upstream data
  RunNode {
    /// The node ID to execute
    #[arg(long)]
    node: String,
  },

  /// Run the recency verifier on its own
  Verify,

  /// List the most recent run records
  Records {
    #[arg(long, default_value_t = 10)]
    limit: u32,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr),
    )
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("medalflow=info,warn")),
    )
    .init();

  let cli = Cli::parse();

  let Some(command) = cli.command else {
    println!("medalflow - use --help to see available commands");
    return Ok(());
  };

  let config = load_config(cli.config.as_deref(), cli.database_url)?;
  let runtime_config = RuntimeConfig { seed: cli.seed };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Run => run_pipeline(config, runtime_config).await,
      Commands::RunNode { node } => run_node(config, runtime_config, node).await,
      Commands::Verify => run_verify(config).await,
      Commands::Records { limit } => list_records(config, limit).await,
    }
  })
}

fn load_config(path: Option<&Path>, database_url: Option<String>) -> Result<PipelineConfig> {
  let mut config = match path {
    Some(path) => PipelineConfig::load(path)
      .with_context(|| format!("failed to load config file: {}", path.display()))?,
    None => PipelineConfig::default(),
  };

  if let Some(url) = database_url {
    config.store.database_url = url;
  }
  config.validate().context("invalid pipeline config")?;
  Ok(config)
}

async fn open_store(config: &PipelineConfig) -> Result<Arc<SqliteStore>> {
  let store = SqliteStore::connect(&config.store)
    .await
    .with_context(|| format!("failed to open database: {}", config.store.database_url))?;
  Ok(Arc::new(store))
}

/// A token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
  let cancel = CancellationToken::new();
  let token = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("interrupt received, cancelling");
      token.cancel();
    }
  });
  cancel
}

async fn run_pipeline(config: PipelineConfig, runtime_config: RuntimeConfig) -> Result<()> {
  let store = open_store(&config).await?;
  let workflow = Workflow::from_config(&config).context("failed to build workflow")?;
  info!(workflow_id = %workflow.workflow_id, nodes = workflow.nodes.len(), "workflow loaded");

  let runtime =
    Runtime::new(workflow, store, runtime_config).context("failed to create runtime")?;
  let result = runtime
    .invoke(cancel_on_ctrl_c())
    .await
    .context("workflow execution failed")?;

  println!("{}", serde_json::to_string_pretty(&result)?);
  Ok(())
}

async fn run_node(
  config: PipelineConfig,
  runtime_config: RuntimeConfig,
  node_id: String,
) -> Result<()> {
  let payload = read_payload_from_stdin()?;
  let store = open_store(&config).await?;
  let workflow = Workflow::from_config(&config).context("failed to build workflow")?;

  let runtime =
    Runtime::new(workflow, store, runtime_config).context("failed to create runtime")?;
  let result = runtime
    .invoke_node(&node_id, payload, cancel_on_ctrl_c())
    .await
    .context("node execution failed")?;

  println!("{}", serde_json::to_string_pretty(&result)?);
  Ok(())
}

async fn run_verify(config: PipelineConfig) -> Result<()> {
  let store = open_store(&config).await?;
  let verifier = RecencyVerifier::new(
    store,
    Arc::new(SystemClock),
    config.sensor.recency_window(),
  );

  let satisfied = verifier
    .verify(
      config.sensor.timeout(),
      config.sensor.poll_interval(),
      &cancel_on_ctrl_c(),
    )
    .await
    .context("verification failed")?;

  println!("{}", serde_json::to_string_pretty(&satisfied)?);
  Ok(())
}

async fn list_records(config: PipelineConfig, limit: u32) -> Result<()> {
  let store = open_store(&config).await?;
  let records = store
    .list_records(limit)
    .await
    .context("failed to list records")?;

  println!("{}", serde_json::to_string_pretty(&records)?);
  Ok(())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read payload from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
    }
  }
}
