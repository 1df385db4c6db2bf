//! Road cost model trainer CLI
//!
//! Trains per-phase cost models from project records, predicts segment costs
//! from a stored artifact and prints artifact summaries.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vialcost_core::{CostConfig, Phase, SegmentInput, StorageBackend};
use vialcost_store::{ArtifactStore, FsArtifactStore, ModelArtifactStore, SledArtifactStore};
use vialcost_trainer::{load_increments, load_source_rows, train_and_store};

#[derive(Parser, Debug)]
#[command(name = "cost-trainer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train and apply per-phase road infrastructure cost models", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the artifact storage root
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train every category of a phase and store the artifact
    Train {
        /// Phase code or name, e.g. "III" or "Fase III - Diseño Detallado"
        #[arg(short, long)]
        phase: String,

        /// JSON array of project segment records
        #[arg(short, long)]
        records: PathBuf,

        /// `year,rate` CSV of yearly cost increments
        #[arg(short, long)]
        increments: PathBuf,
    },

    /// Predict category costs for one segment or a list of segments
    Predict {
        #[arg(short, long)]
        phase: String,

        /// JSON segment object, or an array of segments for a project estimate
        #[arg(short, long)]
        segment: PathBuf,
    },

    /// Show the metadata and metrics of a stored artifact
    Inspect {
        /// Phase to inspect; lists stored phases when omitted
        #[arg(short, long)]
        phase: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CostConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CostConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(root) = &cli.store {
        config.storage.root = root.clone();
    }

    init_logging(&config, cli.verbose);
    for warning in config.validate() {
        warn!("config: {}", warning);
    }

    let store = open_store(&config)?;
    match cli.command {
        Commands::Train {
            phase,
            records,
            increments,
        } => train(&store, &config, &phase, &records, &increments),
        Commands::Predict { phase, segment } => predict(&store, &phase, &segment),
        Commands::Inspect { phase } => inspect(&store, phase.as_deref()),
    }
}

fn init_logging(config: &CostConfig, verbose: bool) {
    let default_level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn open_store(config: &CostConfig) -> Result<ModelArtifactStore<Box<dyn ArtifactStore>>> {
    let root = &config.storage.root;
    let backend: Box<dyn ArtifactStore> = match config.storage.backend {
        StorageBackend::Fs => Box::new(
            FsArtifactStore::new(root).with_context(|| format!("Failed to open model directory {}", root.display()))?,
        ),
        StorageBackend::Sled => Box::new(
            SledArtifactStore::new(root).with_context(|| format!("Failed to open sled store {}", root.display()))?,
        ),
    };
    Ok(ModelArtifactStore::new(backend))
}

fn train(
    store: &ModelArtifactStore<Box<dyn ArtifactStore>>,
    config: &CostConfig,
    phase: &str,
    records: &Path,
    increments: &Path,
) -> Result<()> {
    let phase = Phase::from_identifier(phase)?;
    info!("Training phase {} from {}", phase, records.display());

    let rows = load_source_rows(records).context("Failed to load records")?;
    let increments = load_increments(increments).context("Failed to load increments")?;
    info!("Loaded {} records and {} increment years", rows.len(), increments.len());

    let (artifact, locator) = train_and_store(store, phase, &rows, increments, config)?;
    info!("Trained {} categories", artifact.models.len());
    info!("Artifact: {}", locator);
    println!("{}", serde_json::to_string_pretty(&artifact.summary)?);
    Ok(())
}

fn predict(store: &ModelArtifactStore<Box<dyn ArtifactStore>>, phase: &str, segment: &Path) -> Result<()> {
    let orchestrator = store.orchestrator(phase)?;
    let content = std::fs::read_to_string(segment)
        .with_context(|| format!("Failed to read segment file {}", segment.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content).context("Segment file is not valid JSON")?;

    let output = if value.is_array() {
        let segments: Vec<SegmentInput> = serde_json::from_value(value).context("Invalid segment list")?;
        serde_json::to_string_pretty(&orchestrator.estimate_project(&segments)?)?
    } else {
        let segment: SegmentInput = serde_json::from_value(value).context("Invalid segment")?;
        serde_json::to_string_pretty(&orchestrator.predict(&segment)?)?
    };
    println!("{}", output);
    Ok(())
}

fn inspect(store: &ModelArtifactStore<Box<dyn ArtifactStore>>, phase: Option<&str>) -> Result<()> {
    let Some(phase) = phase else {
        let phases = store.available_phases()?;
        if phases.is_empty() {
            println!("No trained phases");
        }
        for phase in phases {
            println!("{}\t{}", phase, phase.storage_key());
        }
        return Ok(());
    };

    let artifact = store.load_required(Phase::from_identifier(phase)?)?;
    let meta = &artifact.metadata;
    println!("phase:        {}", meta.phase);
    println!("samples:      {}", meta.sample_count);
    println!("trained at:   {}", meta.trained_at.to_rfc3339());
    println!("present year: {}", meta.present_year);
    println!("version:      {}", meta.crate_version);
    println!("hash:         {}", artifact.content_hash()?);
    println!();
    println!("{:<40} {:<16} {:<16} {:>8} {:>12} {:>8} {:>4} {:<7}", "category", "scope", "family", "r2", "mae", "mape", "n", "log");
    for row in &artifact.summary {
        println!(
            "{:<40} {:<16} {:<16} {:>8.3} {:>12.3} {:>8.3} {:>4} {:<7}",
            row.category,
            row.scope_type.as_deref().unwrap_or("-"),
            row.model_family.to_string(),
            row.r2,
            row.mae,
            row.mape,
            row.sample_count,
            row.log_transform.label()
        );
    }
    Ok(())
}
