//! Batch behaviour of the orchestrator against an in-memory registry

use assay_ai_core::config::{COMPOSITE_RUN_KEY, SIGNATURE};
use assay_ai_core::contract::{ModelInfo, TrainingFunction, TrainingResult};
use assay_ai_core::ensemble::{EnsembleKind, Node, Tree, TreeEnsemble};
use assay_ai_core::{
    compute_identity, evaluate, DispatchError, FeatureMatrix, ModelArtifact, Result, TrainingConfig,
};
use assay_ai_trainer::{Dataset, TrainerCatalog};
use assay_dispatch::{
    discover_configs, ConfigOutcome, DiscoveredConfig, FailurePolicy, IdentityLease, KeyMode, Orchestrator,
    OrchestratorOptions,
};
use assay_run_registry::{
    ArtifactRecord, RegistryError, RunHandle, RunRecord, RunRegistryClient, RunStatus, RunStorage, RunStore,
    TagFilter,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Always fails inside the fit.
struct ExplodingTrainer;

impl TrainingFunction for ExplodingTrainer {
    fn name(&self) -> &str {
        "exploding"
    }

    fn train(&self, _: &FeatureMatrix, _: &[f64], _: &TrainingConfig) -> Result<TrainingResult> {
        Err(DispatchError::TrainingExecution("solver diverged".into()))
    }
}

/// Returns a model but forgets `rmse`.
struct NoRmseTrainer;

impl TrainingFunction for NoRmseTrainer {
    fn name(&self) -> &str {
        "no_rmse"
    }

    fn train(&self, x: &FeatureMatrix, y: &[f64], _: &TrainingConfig) -> Result<TrainingResult> {
        let tree = Tree::new(vec![Node::leaf(0, 1.0)], 1.0);
        let model = TreeEnsemble::new(EnsembleKind::Bagged, x.n_features(), 0.0, vec![tree]);
        let predictions = model.predict(x.rows());
        let mut result = TrainingResult::new(
            ModelArtifact::TreeEnsemble(model),
            evaluate(y, &predictions),
            ModelInfo::new("stump", "TreeEnsemble"),
        );
        result.metrics.remove("rmse");
        Ok(result)
    }
}

/// Answers queries but refuses to open runs, as a read-only backend would.
struct ReadOnlyStore(RunStorage);

impl RunStore for ReadOnlyStore {
    fn search(&self, filter: &TagFilter) -> assay_run_registry::Result<Vec<RunRecord>> {
        self.0.search(filter)
    }
    fn start_run(&self, _: &str) -> assay_run_registry::Result<RunHandle> {
        Err(RegistryError::Database("read-only database".into()))
    }
    fn set_tag(&self, run: &RunHandle, key: &str, value: &str) -> assay_run_registry::Result<()> {
        self.0.set_tag(run, key, value)
    }
    fn log_params(&self, run: &RunHandle, params: &BTreeMap<String, String>) -> assay_run_registry::Result<()> {
        self.0.log_params(run, params)
    }
    fn log_metrics(&self, run: &RunHandle, metrics: &BTreeMap<String, f64>) -> assay_run_registry::Result<()> {
        self.0.log_metrics(run, metrics)
    }
    fn log_model(
        &self,
        run: &RunHandle,
        name: &str,
        bytes: &[u8],
        format: &str,
    ) -> assay_run_registry::Result<ArtifactRecord> {
        self.0.log_model(run, name, bytes, format)
    }
    fn end_run(&self, run: &RunHandle, status: RunStatus) -> assay_run_registry::Result<()> {
        self.0.end_run(run, status)
    }
    fn get_run(&self, run_id: &str) -> assay_run_registry::Result<Option<RunRecord>> {
        self.0.get_run(run_id)
    }
    fn load_artifact(&self, run_id: &str, name: &str) -> assay_run_registry::Result<Option<Vec<u8>>> {
        self.0.load_artifact(run_id, name)
    }
    fn list_runs(&self, experiment: Option<&str>) -> assay_run_registry::Result<Vec<RunRecord>> {
        self.0.list_runs(experiment)
    }
    fn ping(&self) -> assay_run_registry::Result<()> {
        self.0.ping()
    }
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("models")).unwrap();
        fs::write(dir.path().join("models/train.py"), "def train(X, y, config): ...\n").unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self, name: &str, model_type: &str, script: &str, extra: &str) -> DiscoveredConfig {
        let yaml = format!(
            "model_type: {model_type}\nmodel_script: {script}\nsignature_files:\n  - models/train.py\n{extra}"
        );
        DiscoveredConfig {
            path: PathBuf::from(format!("configs/{name}.yaml")),
            config: TrainingConfig::from_yaml_str(&yaml).unwrap(),
        }
    }

    fn options(&self, mode: KeyMode) -> OrchestratorOptions {
        OrchestratorOptions {
            mode,
            project_root: self.root().to_path_buf(),
            ..OrchestratorOptions::default()
        }
    }
}

fn dataset() -> Dataset {
    let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![(i % 8) as f64, (i % 5) as f64]).collect();
    let targets = rows.iter().map(|r| 2.0 * r[0] + r[1]).collect();
    let features = FeatureMatrix::new(vec!["PubchemFP0".into(), "docking_score".into()], rows).unwrap();
    Dataset::new(features, targets).unwrap()
}

fn run_count(registry: &RunRegistryClient) -> usize {
    registry.store().list_runs(None).unwrap().len()
}

fn catalog_with_test_trainers() -> TrainerCatalog {
    let mut catalog = TrainerCatalog::with_builtin();
    catalog.register(&["models.exploding"], Arc::new(ExplodingTrainer));
    catalog.register(&["models.no_rmse"], Arc::new(NoRmseTrainer));
    catalog
}

#[test]
fn test_single_rf_config_trains_and_tags_identities() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let configs = vec![ws.config("rf", "rf", "models.rf", "n_estimators: 5\n")];

    let orchestrator = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), ws.options(KeyMode::Composite))
        .with_code_revision(Some("0123456789abcdef".into()));
    let summary = orchestrator.run(&configs, &dataset()).unwrap();

    assert_eq!(summary.trained(), 1);
    assert_eq!(summary.exit_code(), 0);

    let runs = registry.store().list_runs(Some("rf")).unwrap();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.status, RunStatus::Finished);
    assert!(run.tags[COMPOSITE_RUN_KEY].starts_with("01234567:"));
    assert_eq!(run.tags[SIGNATURE].len(), 64);
    assert_eq!(summary.reports[0].identity.as_deref(), Some(run.tags[COMPOSITE_RUN_KEY].as_str()));
    assert_eq!(run.tags["model_format"], "tree_ensemble");
    assert!(run.metrics["rmse"] >= 0.0);
    assert!(run.metrics.contains_key("test_rmse"));
    assert_eq!(run.params["n_estimators"], "5");
    assert!(!run.params.contains_key("model_script"));
    assert!(!run.params.contains_key("signature_files"));
}

#[test]
fn test_second_dispatch_skips_everything() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let configs = vec![
        ws.config("rf", "rf", "models.rf", "n_estimators: 3\n"),
        ws.config("xgb", "xgb", "models.xgb", "n_estimators: 3\n"),
    ];
    let data = dataset();

    let first = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), ws.options(KeyMode::Composite))
        .with_code_revision(Some("cafebabe".into()))
        .run(&configs, &data)
        .unwrap();
    assert_eq!(first.trained(), 2);
    let runs_after_first = run_count(&registry);

    let second = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), ws.options(KeyMode::Composite))
        .with_code_revision(Some("cafebabe".into()))
        .run(&configs, &data)
        .unwrap();
    assert_eq!(second.skipped(), 2);
    assert_eq!(second.trained(), 0);
    assert_eq!(run_count(&registry), runs_after_first);
}

#[test]
fn test_signature_file_edit_triggers_retrain() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let configs = vec![ws.config("rf", "rf", "models.rf", "n_estimators: 2\n")];
    let data = dataset();
    let orchestrator = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), ws.options(KeyMode::Signature));

    assert_eq!(orchestrator.run(&configs, &data).unwrap().trained(), 1);
    fs::write(ws.root().join("models/train.py"), "def train(X, y, config): return None\n").unwrap();
    assert_eq!(orchestrator.run(&configs, &data).unwrap().trained(), 1);
    assert_eq!(run_count(&registry), 2);
}

#[test]
fn test_partial_failure_does_not_abort_batch() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let configs = vec![
        ws.config("a", "rf", "models.rf", "n_estimators: 2\n"),
        ws.config("b", "exploding", "models.exploding", ""),
        ws.config("c", "xgb", "models.xgb", "n_estimators: 2\n"),
    ];

    let summary = Orchestrator::new(&registry, catalog_with_test_trainers(), ws.options(KeyMode::Signature))
        .run(&configs, &dataset())
        .unwrap();

    assert_eq!(summary.trained(), 2);
    assert_eq!(summary.failed(), 1);
    assert!(matches!(summary.reports[2].outcome, ConfigOutcome::Trained { .. }));
    let (report, error) = summary.failures().next().unwrap();
    assert_eq!(report.config_path, PathBuf::from("configs/b.yaml"));
    assert_eq!(error.kind(), "training_execution");
    assert!(report.identity.is_some());
    assert_eq!(summary.exit_code(), 0);
}

#[test]
fn test_missing_signature_file_fails_only_that_config() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let mut broken = ws.config("broken", "rf", "models.rf", "");
    broken.config = TrainingConfig::from_yaml_str(
        "model_type: rf\nmodel_script: models.rf\nsignature_files: [models/absent.py]\n",
    )
    .unwrap();
    let configs = vec![broken, ws.config("ok", "rf", "models.rf", "n_estimators: 2\n")];

    let summary = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), ws.options(KeyMode::Signature))
        .run(&configs, &dataset())
        .unwrap();

    assert_eq!(summary.trained(), 1);
    let (report, error) = summary.failures().next().unwrap();
    assert!(matches!(error, DispatchError::FileRead { .. }));
    assert!(report.identity.is_none());
    assert_eq!(run_count(&registry), 1);
}

#[test]
fn test_contract_violation_registers_no_run() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let configs = vec![ws.config("bad", "stump", "models.no_rmse", "")];

    let summary = Orchestrator::new(&registry, catalog_with_test_trainers(), ws.options(KeyMode::Signature))
        .run(&configs, &dataset())
        .unwrap();

    let (_, error) = summary.failures().next().unwrap();
    assert!(matches!(error, DispatchError::ContractViolation(msg) if msg.contains("rmse")));
    assert_eq!(run_count(&registry), 0);
    assert_eq!(summary.exit_code(), 2);
}

#[test]
fn test_unknown_model_script_is_config_failure() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let configs = vec![ws.config("svm", "svm", "models/svm/train.py", "")];

    let summary = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), ws.options(KeyMode::Signature))
        .run(&configs, &dataset())
        .unwrap();
    let (_, error) = summary.failures().next().unwrap();
    assert_eq!(error.kind(), "config");
}

#[test]
fn test_fail_fast_leaves_rest_not_attempted() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let configs = vec![
        ws.config("a", "exploding", "models.exploding", ""),
        ws.config("b", "rf", "models.rf", "n_estimators: 2\n"),
    ];
    let options = OrchestratorOptions {
        failure_policy: FailurePolicy::FailFast,
        ..ws.options(KeyMode::Signature)
    };

    let summary = Orchestrator::new(&registry, catalog_with_test_trainers(), options)
        .run(&configs, &dataset())
        .unwrap();
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.not_attempted(), 1);
    assert_eq!(run_count(&registry), 0);
}

#[test]
fn test_dry_run_writes_nothing() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let configs = vec![ws.config("rf", "rf", "models.rf", "")];
    let options = OrchestratorOptions {
        dry_run: true,
        ..ws.options(KeyMode::Signature)
    };

    let summary = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), options)
        .run(&configs, &dataset())
        .unwrap();
    assert_eq!(summary.would_train(), 1);
    assert_eq!(run_count(&registry), 0);
}

#[test]
fn test_force_retrain_ignores_existing_run() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let configs = vec![ws.config("rf", "rf", "models.rf", "n_estimators: 2\n")];
    let data = dataset();

    Orchestrator::new(&registry, TrainerCatalog::with_builtin(), ws.options(KeyMode::Signature))
        .run(&configs, &data)
        .unwrap();
    let options = OrchestratorOptions {
        force_retrain: true,
        ..ws.options(KeyMode::Signature)
    };
    let summary = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), options)
        .run(&configs, &data)
        .unwrap();
    assert_eq!(summary.trained(), 1);
    assert_eq!(run_count(&registry), 2);
}

#[test]
fn test_signature_mode_looks_up_signature_tag() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let discovered = ws.config("rf", "rf", "models.rf", "n_estimators: 2\n");
    let signature = compute_identity(&discovered.config, &[ws.root().join("models/train.py")]).unwrap();

    let summary = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), ws.options(KeyMode::Signature))
        .run(&[discovered], &dataset())
        .unwrap();

    assert_eq!(summary.reports[0].identity.as_deref(), Some(signature.as_str()));
    assert!(registry.exists(SIGNATURE, &signature));
    let runs = registry.store().list_runs(None).unwrap();
    assert!(!runs[0].tags.contains_key(COMPOSITE_RUN_KEY));
}

#[test]
fn test_held_lease_reports_in_progress() {
    let ws = Workspace::new();
    let lease_dir = ws.root().join("leases");
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let discovered = ws.config("rf", "rf", "models.rf", "");
    let signature = compute_identity(&discovered.config, &[ws.root().join("models/train.py")]).unwrap();

    let _held = IdentityLease::try_acquire(&lease_dir, &signature).unwrap().unwrap();
    let options = OrchestratorOptions {
        lease_dir: Some(lease_dir),
        ..ws.options(KeyMode::Signature)
    };
    let summary = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), options)
        .run(&[discovered], &dataset())
        .unwrap();

    assert_eq!(summary.in_progress(), 1);
    assert_eq!(run_count(&registry), 0);
}

#[test]
fn test_discovered_directory_feeds_orchestrator() {
    let ws = Workspace::new();
    let configs_dir = ws.root().join("configs");
    fs::create_dir_all(&configs_dir).unwrap();
    fs::write(
        configs_dir.join("rf.yaml"),
        "model_type: rf\nmodel_script: models/rf/train.py\nsignature_files: [models/train.py]\nn_estimators: 2\n",
    )
    .unwrap();
    fs::write(configs_dir.join("broken.yaml"), "model_type: rf\nsignature_files: []\n").unwrap();

    let discovery = discover_configs(&configs_dir).unwrap();
    assert_eq!(discovery.configs.len(), 1);
    assert_eq!(discovery.rejected.len(), 1);

    let registry = RunRegistryClient::connect("memory://").unwrap();
    let summary = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), ws.options(KeyMode::Signature))
        .run(&discovery.configs, &dataset())
        .unwrap();
    assert_eq!(summary.trained(), 1);
}

#[test]
fn test_failed_run_write_reported_as_registry_write() {
    let ws = Workspace::new();
    let registry = RunRegistryClient::with_store(Arc::new(ReadOnlyStore(RunStorage::in_memory())), "memory://");
    let configs = vec![ws.config("rf", "rf", "models.rf", "n_estimators: 2\n")];

    let summary = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), ws.options(KeyMode::Signature))
        .run(&configs, &dataset())
        .unwrap();

    let (_, error) = summary.failures().next().unwrap();
    assert!(matches!(error, DispatchError::RegistryWrite(msg) if msg.contains("read-only")));
    assert_eq!(error.kind(), "registry_write");
}

#[test]
fn test_dry_run_takes_no_lease() {
    let ws = Workspace::new();
    let lease_dir = ws.root().join("leases");
    let registry = RunRegistryClient::connect("memory://").unwrap();
    let options = OrchestratorOptions {
        dry_run: true,
        lease_dir: Some(lease_dir.clone()),
        ..ws.options(KeyMode::Signature)
    };

    let summary = Orchestrator::new(&registry, TrainerCatalog::with_builtin(), options)
        .run(&[ws.config("rf", "rf", "models.rf", "")], &dataset())
        .unwrap();
    assert_eq!(summary.would_train(), 1);
    assert!(!lease_dir.exists());
}
