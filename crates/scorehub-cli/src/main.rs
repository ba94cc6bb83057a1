use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use scorehub_contracts::events::incomplete_publishes;
use scorehub_contracts::features::ScoringFeatures;
use scorehub_contracts::metadata::ModelMetadata;
use scorehub_contracts::runs::write_receipt;
use scorehub_engine::store::StoredArtifact;
use scorehub_engine::{ModelRegistry, RegistryConfig, RegistryError, ScoringHandle};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const EXIT_NOT_FOUND: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "scorehub", version, about = "Versioned scoring-model registry")]
struct Cli {
    /// Tracking server; overrides MLFLOW_TRACKING_URI.
    #[arg(long, global = true)]
    tracking_uri: Option<String>,
    /// Experiment publish runs are recorded under; overrides SCOREHUB_EXPERIMENT.
    #[arg(long, global = true)]
    experiment: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered model names.
    Models,
    Publish(PublishArgs),
    Resolve(TargetArgs),
    Predict(PredictArgs),
    /// List publishes that started but never completed.
    Journal(JournalArgs),
}

#[derive(Debug, Parser)]
struct PublishArgs {
    /// Artifact envelope, `{"flavor": ..., "model": ...}`.
    #[arg(long)]
    artifact: PathBuf,
    #[arg(long)]
    metadata: PathBuf,
    #[arg(long)]
    journal: Option<PathBuf>,
    /// Also write the receipt to this file.
    #[arg(long)]
    receipt: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TargetArgs {
    #[arg(long)]
    name: String,
    #[arg(long, required_unless_present = "latest", conflicts_with = "latest")]
    version: Option<String>,
    #[arg(long)]
    latest: bool,
}

#[derive(Debug, Parser)]
struct PredictArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Comma-separated values in feature order.
    #[arg(long)]
    features: String,
}

#[derive(Debug, Parser)]
struct JournalArgs {
    #[arg(long)]
    path: PathBuf,
}

fn main() {
    init_logging();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("scorehub error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = cli_config(&cli);
    match cli.command {
        Command::Models => run_models(config),
        Command::Publish(args) => run_publish(config, args),
        Command::Resolve(args) => run_resolve(config, args),
        Command::Predict(args) => run_predict(config, args),
        Command::Journal(args) => run_journal(&args.path),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json_logs() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(io::stderr),
            )
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("scorehub: logging disabled ({err})");
    }
}

fn json_logs() -> bool {
    std::env::var("SCOREHUB_JSON_LOG")
        .ok()
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn cli_config(cli: &Cli) -> RegistryConfig {
    let mut config = RegistryConfig::from_env();
    if let Some(uri) = cli.tracking_uri.as_deref() {
        config = config.with_tracking_uri(uri);
    }
    if let Some(experiment) = cli.experiment.as_deref() {
        config = config.with_experiment(experiment);
    }
    config
}

fn run_models(config: RegistryConfig) -> Result<i32> {
    let registry = ModelRegistry::connect(config)?;
    for name in registry.catalog().list_all()? {
        println!("{name}");
    }
    Ok(0)
}

fn run_publish(config: RegistryConfig, args: PublishArgs) -> Result<i32> {
    let config = match args.journal {
        Some(path) => config.with_journal(path),
        None => config,
    };
    let registry = ModelRegistry::connect(config)?;

    let envelope = read_json(&args.artifact)?;
    let stored = StoredArtifact::from_envelope(&envelope)
        .with_context(|| format!("invalid artifact file {}", args.artifact.display()))?;
    let artifact = registry.flavors().decode(&stored)?;
    let metadata: ModelMetadata = serde_json::from_value(read_json(&args.metadata)?)
        .with_context(|| format!("invalid metadata file {}", args.metadata.display()))?;

    let receipt = registry.publish(artifact.as_ref(), &metadata)?;
    if let Some(path) = args.receipt.as_deref() {
        write_receipt(path, &receipt)
            .with_context(|| format!("failed writing receipt {}", path.display()))?;
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&Value::Object(receipt.to_payload()))?
    );
    Ok(0)
}

fn run_resolve(config: RegistryConfig, args: TargetArgs) -> Result<i32> {
    let registry = ModelRegistry::connect(config)?;
    let handle = match resolve_target(&registry, &args) {
        Ok(handle) => handle,
        Err(err) if err.is_not_found() => return Ok(not_found(&err)),
        Err(err) => return Err(err.into()),
    };
    println!("{}", serde_json::to_string_pretty(&describe_handle(&handle))?);
    Ok(0)
}

fn run_predict(config: RegistryConfig, args: PredictArgs) -> Result<i32> {
    let features = parse_features(&args.features)?;
    let registry = ModelRegistry::connect(config)?;
    let handle = match resolve_target(&registry, &args.target) {
        Ok(handle) => handle,
        Err(err) if err.is_not_found() => return Ok(not_found(&err)),
        Err(err) => return Err(err.into()),
    };
    println!("{}", handle.predict(&features)?);
    Ok(0)
}

fn run_journal(path: &Path) -> Result<i32> {
    for publish_id in incomplete_publishes(path)? {
        println!("{publish_id}");
    }
    Ok(0)
}

fn resolve_target(
    registry: &ModelRegistry,
    target: &TargetArgs,
) -> Result<ScoringHandle, RegistryError> {
    match target.version.as_deref() {
        Some(version) if !target.latest => registry.resolve(&target.name, version),
        _ => registry.resolve_latest(&target.name),
    }
}

fn not_found(err: &RegistryError) -> i32 {
    eprintln!("scorehub: {err}");
    EXIT_NOT_FOUND
}

fn describe_handle(handle: &ScoringHandle) -> Value {
    json!({
        "name": handle.name(),
        "version": handle.version(),
        "flavor": handle.flavor(),
        "hyperparameters": handle.hyperparameters(),
    })
}

fn parse_features(raw: &str) -> Result<ScoringFeatures> {
    let mut values = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            bail!("empty value in --features '{raw}'");
        }
        let value: f64 = part
            .parse()
            .with_context(|| format!("invalid feature value '{part}'"))?;
        values.push(value);
    }
    Ok(ScoringFeatures::from_values(&values)?)
}

fn read_json(path: &Path) -> Result<Value> {
    debug!(path = %path.display(), "reading input file");
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}
