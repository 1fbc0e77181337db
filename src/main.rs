use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use fuschia_config::{CacheConfig, TopologyDef};
use fuschia_engine::ArtifactEngine;
use fuschia_workflow::GraphTopology;

mod replay;

/// Fuschia - run-scoped artifact cache for workflow executions
#[derive(Parser)]
#[command(name = "fuschia")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.fuschia)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to the cache config (default: <data-dir>/config.json if present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Replay a JSON-lines event log and print the resulting run state
  Replay {
    /// Path to the event log
    events_file: PathBuf,

    /// Path to the topology file (JSON)
    #[arg(long)]
    topology: PathBuf,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(data_dir) => data_dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".fuschia"),
  };
  let config = load_config(cli.config.as_deref(), &data_dir)?;
  init_tracing(&config);

  match cli.command {
    Some(Commands::Replay {
      events_file,
      topology,
    }) => {
      run_replay(&config, events_file, topology)?;
    }
    None => {
      println!("fuschia - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<CacheConfig> {
  if let Some(path) = explicit {
    return CacheConfig::load(path).with_context(|| format!("failed to load config: {}", path.display()));
  }

  let default_path = data_dir.join("config.json");
  if default_path.exists() {
    CacheConfig::load(&default_path)
      .with_context(|| format!("failed to load config: {}", default_path.display()))
  } else {
    Ok(CacheConfig::default())
  }
}

fn init_tracing(config: &CacheConfig) {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_filter.as_str().into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();
}

fn run_replay(config: &CacheConfig, events_file: PathBuf, topology_file: PathBuf) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_replay_async(config, events_file, topology_file).await })
}

async fn run_replay_async(config: &CacheConfig, events_file: PathBuf, topology_file: PathBuf) -> Result<()> {
  let topology_def = TopologyDef::load(&topology_file)
    .with_context(|| format!("failed to load topology: {}", topology_file.display()))?;
  let topology = GraphTopology::new(&topology_def).context("invalid topology")?;

  let log = tokio::fs::read_to_string(&events_file)
    .await
    .with_context(|| format!("failed to read event log: {}", events_file.display()))?;

  let engine = Arc::new(ArtifactEngine::new(config, topology));
  eprintln!(
    "Replaying {} with revoke delay {:?}",
    events_file.display(),
    engine.resources().revoke_delay()
  );

  let report = replay::replay(engine, &log).await?;

  println!("{}", serde_json::to_string_pretty(&report)?);

  Ok(())
}
