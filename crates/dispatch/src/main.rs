//! `train-dispatch`: train every config that has no finished run yet

use anyhow::{Context, Result};
use assay_ai_trainer::{Dataset, DatasetSchema, TrainerCatalog};
use assay_dispatch::{
    discover_configs, DispatchSettings, KeyMode, LogFormat, Orchestrator, OrchestratorOptions,
    SettingsOverrides,
};
use assay_run_registry::RunRegistryClient;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "train-dispatch",
    about = "Train every config whose identity has no finished run in the registry",
    version
)]
struct Cli {
    /// Directory of *.yaml training configs
    #[arg(long)]
    configs: Option<PathBuf>,

    /// Dataset CSV
    #[arg(long)]
    data: Option<PathBuf>,

    /// Run registry location (memory://, sled://PATH, file://PATH or a path)
    #[arg(long)]
    tracking_uri: Option<String>,

    /// Settings file (TOML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Identity used for the existence check
    #[arg(long, value_enum)]
    mode: Option<KeyMode>,

    /// Lease directory for mutual exclusion between concurrent dispatches
    #[arg(long)]
    lease_dir: Option<PathBuf>,

    /// Retrain even if a finished run exists
    #[arg(long)]
    force: bool,

    /// Report what would be trained without training or writing
    #[arg(long)]
    dry_run: bool,

    /// Stop at the first failed config
    #[arg(long)]
    fail_fast: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            configs_dir: self.configs.clone(),
            data_path: self.data.clone(),
            tracking_uri: self.tracking_uri.clone(),
            mode: self.mode,
            lease_dir: self.lease_dir.clone(),
            force_retrain: self.force,
            dry_run: self.dry_run,
            fail_fast: self.fail_fast,
            verbose: self.verbose,
            log_format: self.log_format,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match DispatchSettings::load(cli.settings.as_deref()) {
        Ok(settings) => settings.with_overrides(cli.overrides()),
        Err(e) => {
            eprintln!("Error: failed to load dispatch settings: {e}");
            return ExitCode::from(1);
        }
    };
    init_logging(&settings);

    match run(&settings) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(settings: &DispatchSettings) -> Result<u8> {
    info!(
        configs = %settings.configs_dir.display(),
        data = %settings.data_path.display(),
        tracking_uri = %settings.tracking_uri,
        mode = ?settings.mode,
        "Starting train-dispatch v{}",
        env!("CARGO_PKG_VERSION")
    );

    let discovery = discover_configs(&settings.configs_dir).with_context(|| {
        format!("cannot list config directory {}", settings.configs_dir.display())
    })?;
    if discovery.configs.is_empty() {
        anyhow::bail!(
            "no valid training configs in {} ({} rejected)",
            settings.configs_dir.display(),
            discovery.rejected.len()
        );
    }

    let registry = RunRegistryClient::connect(&settings.tracking_uri)
        .with_context(|| format!("cannot open run registry at {}", settings.tracking_uri))?;
    registry.check_reachable().context("run registry unreachable")?;

    let schema = DatasetSchema {
        target_column: settings.target_column.clone(),
        feature_prefix: settings.feature_prefix.clone(),
        required_features: settings.extra_features.clone(),
    };
    let dataset = Dataset::from_csv(&settings.data_path, &schema)
        .with_context(|| format!("cannot load dataset {}", settings.data_path.display()))?;

    let orchestrator = Orchestrator::new(
        &registry,
        TrainerCatalog::with_builtin(),
        OrchestratorOptions::from_settings(settings),
    );
    let mut summary = orchestrator.run(&discovery.configs, &dataset)?;
    summary.rejected = discovery
        .rejected
        .into_iter()
        .map(|rejected| (rejected.path, rejected.error.to_string()))
        .collect();

    println!("{summary}");
    Ok(summary.exit_code())
}

fn init_logging(settings: &DispatchSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match settings.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
    }
}
