//! Batch orchestration
//!
//! Each config moves through
//! `DISCOVERED -> KEY_COMPUTED -> {SKIPPED | TRAINING -> LOGGED} -> DONE`.
//! Every per-config error is caught here and becomes a failed
//! [`ConfigReport`]; nothing escapes to the caller.

use assay_ai_core::config::{COMPOSITE_RUN_KEY, SIGNATURE};
use assay_ai_core::contract::validate_training_function;
use assay_ai_core::{
    compute_composite_run_key, compute_identity, detect_code_revision, evaluate, DispatchError,
    Result, TrainingConfig, ValidatedResult,
};
use assay_ai_trainer::{DataSplit, Dataset, TrainerCatalog};
use assay_run_registry::RunRegistryClient;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::discovery::DiscoveredConfig;
use crate::lease::IdentityLease;
use crate::settings::{DispatchSettings, FailurePolicy, KeyMode};
use crate::summary::{ConfigOutcome, ConfigReport, DispatchSummary};

/// Knobs for one batch.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub mode: KeyMode,
    pub failure_policy: FailurePolicy,
    pub force_retrain: bool,
    pub dry_run: bool,
    pub lease_dir: Option<PathBuf>,
    /// Base for relative signature file paths
    pub project_root: PathBuf,
    /// Dataset file, used only for the composite key's data component
    pub data_path: Option<PathBuf>,
    pub test_fraction: f64,
    pub split_seed: u64,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            mode: KeyMode::Composite,
            failure_policy: FailurePolicy::Continue,
            force_retrain: false,
            dry_run: false,
            lease_dir: None,
            project_root: PathBuf::from("."),
            data_path: None,
            test_fraction: 0.2,
            split_seed: 42,
        }
    }
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            mode: settings.mode,
            failure_policy: settings.failure_policy,
            force_retrain: settings.force_retrain,
            dry_run: settings.dry_run,
            lease_dir: settings.lease_dir.clone(),
            project_root: settings.project_root.clone(),
            data_path: Some(settings.data_path.clone()),
            test_fraction: settings.test_fraction,
            split_seed: settings.split_seed,
        }
    }
}

pub struct Orchestrator<'a> {
    registry: &'a RunRegistryClient,
    catalog: TrainerCatalog,
    options: OrchestratorOptions,
    code_revision: Option<String>,
}

/// Both identities of a config plus the one used for lookup.
struct Identity {
    signature: String,
    composite_run_key: Option<String>,
}

impl Identity {
    fn lookup(&self) -> (&'static str, &str) {
        match &self.composite_run_key {
            Some(key) => (COMPOSITE_RUN_KEY, key),
            None => (SIGNATURE, &self.signature),
        }
    }
}

impl<'a> Orchestrator<'a> {
    /// The code revision is probed once, in composite mode only.
    pub fn new(registry: &'a RunRegistryClient, catalog: TrainerCatalog, options: OrchestratorOptions) -> Self {
        let code_revision = match options.mode {
            KeyMode::Composite => detect_code_revision(&options.project_root),
            KeyMode::Signature => None,
        };
        Self {
            registry,
            catalog,
            options,
            code_revision,
        }
    }

    pub fn with_code_revision(mut self, revision: Option<String>) -> Self {
        self.code_revision = revision;
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Process every config in order against one train/test split.
    ///
    /// Fails only when the dataset cannot be split.
    pub fn run(&self, configs: &[DiscoveredConfig], dataset: &Dataset) -> Result<DispatchSummary> {
        let split = dataset.train_test_split(self.options.test_fraction, self.options.split_seed)?;
        tracing::info!(
            configs = configs.len(),
            train_rows = split.train.len(),
            test_rows = split.test.len(),
            "Starting dispatch batch"
        );

        let mut summary = DispatchSummary::new(self.registry.tracking_uri());
        let mut stop = false;
        for discovered in configs {
            if stop {
                summary.reports.push(ConfigReport {
                    config_path: discovered.path.clone(),
                    model_type: discovered.config.model_type().to_string(),
                    identity: None,
                    outcome: ConfigOutcome::NotAttempted,
                });
                continue;
            }

            let report = self.process(discovered, &split);
            if report.outcome.is_failure() && self.options.failure_policy == FailurePolicy::FailFast {
                tracing::warn!(config = %discovered.path.display(), "Fail-fast: stopping batch");
                stop = true;
            }
            summary.reports.push(report);
        }

        tracing::info!(
            total = summary.total(),
            trained = summary.trained(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "Dispatch batch complete"
        );
        Ok(summary)
    }

    /// Run one config to completion, catching every error.
    pub fn process(&self, discovered: &DiscoveredConfig, split: &DataSplit) -> ConfigReport {
        let path = &discovered.path;
        let mut config = discovered.config.clone();
        let mut report = ConfigReport {
            config_path: path.clone(),
            model_type: config.model_type().to_string(),
            identity: None,
            outcome: ConfigOutcome::NotAttempted,
        };

        let identity = match self.compute_identities(&mut config) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::error!(config = %path.display(), kind = e.kind(), error = %e, "Identity computation failed");
                report.outcome = ConfigOutcome::Failed(e);
                return report;
            }
        };
        let (tag, value) = identity.lookup();
        report.identity = Some(value.to_string());
        tracing::info!(config = %path.display(), state = "KEY_COMPUTED", tag, identity = value, "Computed identity");

        report.outcome = match self.dispatch(&config, &identity, split) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    config = %path.display(),
                    identity = value,
                    kind = e.kind(),
                    error = %e,
                    "Config failed"
                );
                ConfigOutcome::Failed(e)
            }
        };
        tracing::info!(config = %path.display(), outcome = report.outcome.label(), state = "DONE", "Config finished");
        report
    }

    fn compute_identities(&self, config: &mut TrainingConfig) -> Result<Identity> {
        let files: Vec<PathBuf> = config
            .signature_files()
            .iter()
            .map(|file| resolve_path(&self.options.project_root, file))
            .collect();
        let signature = compute_identity(config, &files)?;

        let composite_run_key = match self.options.mode {
            KeyMode::Composite => Some(
                compute_composite_run_key(
                    config,
                    self.code_revision.as_deref(),
                    self.options.data_path.as_deref(),
                )?
                .to_string(),
            ),
            KeyMode::Signature => None,
        };

        config.attach_signature(signature.clone());
        if let Some(key) = &composite_run_key {
            config.attach_composite_run_key(key.clone());
        }
        Ok(Identity {
            signature,
            composite_run_key,
        })
    }

    fn dispatch(&self, config: &TrainingConfig, identity: &Identity, split: &DataSplit) -> Result<ConfigOutcome> {
        let (tag, value) = identity.lookup();

        let lease_dir = self.options.lease_dir.as_ref().filter(|_| !self.options.dry_run);
        let _lease = match lease_dir {
            Some(dir) => match IdentityLease::try_acquire(dir, value) {
                Ok(Some(lease)) => Some(lease),
                Ok(None) => {
                    tracing::info!(identity = value, "Identity lease held elsewhere; skipping");
                    return Ok(ConfigOutcome::InProgress);
                }
                Err(source) => {
                    return Err(DispatchError::FileRead {
                        path: dir.clone(),
                        source,
                    })
                }
            },
            None => None,
        };

        if !self.options.force_retrain && self.registry.exists(tag, value) {
            tracing::info!(state = "SKIPPED", tag, identity = value, "Finished run already recorded");
            return Ok(ConfigOutcome::Skipped {
                tag: tag.to_string(),
                value: value.to_string(),
            });
        }

        if self.options.dry_run {
            tracing::info!(tag, identity = value, "Dry run: would train");
            return Ok(ConfigOutcome::WouldTrain);
        }

        tracing::info!(state = "TRAINING", model_type = config.model_type(), identity = value, "Training");
        let func = self.catalog.resolve(config)?;
        let result = validate_training_function(func.as_ref(), &split.train.features, &split.train.targets, config)?;

        let mut metrics = result.all_metrics();
        metrics.extend(holdout_metrics(&result, &split.test)?);

        let run_id = self.registry.record(
            config.model_type(),
            &run_tags(identity, &result),
            &config.logged_params(),
            &metrics,
            &result.model,
        )
        .map_err(|e| DispatchError::RegistryWrite(e.to_string()))?;
        tracing::info!(state = "LOGGED", run_id = %run_id, identity = value, "Recorded run");

        Ok(ConfigOutcome::Trained { run_id, metrics })
    }
}

/// `test_*` metrics on the holdout split, when there is one and the model can predict.
fn holdout_metrics(result: &ValidatedResult, test: &Dataset) -> Result<BTreeMap<String, f64>> {
    if test.is_empty() || !result.model.supports_prediction() {
        return Ok(BTreeMap::new());
    }
    let predictions = result.model.predict(test.features.rows())?;
    Ok(evaluate(&test.targets, &predictions).to_map("test_"))
}

fn run_tags(identity: &Identity, result: &ValidatedResult) -> BTreeMap<String, String> {
    let mut tags: BTreeMap<String, String> = result
        .metadata
        .to_entries()
        .into_iter()
        .map(|(key, value)| (format!("model_{key}"), value))
        .collect();
    tags.insert("model_format".to_string(), result.model.format().to_string());
    tags.insert(SIGNATURE.to_string(), identity.signature.clone());
    if let Some(key) = &identity.composite_run_key {
        tags.insert(COMPOSITE_RUN_KEY.to_string(), key.clone());
    }
    tags
}

fn resolve_path(root: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
