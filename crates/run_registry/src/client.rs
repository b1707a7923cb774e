//! Run registry client
//!
//! Wraps a [`RunStore`] chosen from an explicit tracking URI. Existence
//! checks are conservative: a failed query reads as "no run", so the caller
//! retrains rather than skipping.

use assay_ai_core::ModelArtifact;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::errors::{RegistryError, Result};
use crate::storage::RunStorage;
use crate::store::RunStore;
use crate::types::{ArtifactRecord, RunHandle, RunRecord, RunStatus, TagFilter};

/// Artifact name used for the fitted model
pub const MODEL_ARTIFACT: &str = "model";

pub struct RunRegistryClient {
    store: Arc<dyn RunStore>,
    tracking_uri: String,
}

impl RunRegistryClient {
    /// Open the store named by `tracking_uri`.
    ///
    /// Accepted forms: `memory://`, `sled://<path>`, `file://<path>` or a
    /// bare filesystem path.
    pub fn connect(tracking_uri: &str) -> Result<Self> {
        let uri = tracking_uri.trim();
        let store: Arc<dyn RunStore> = if uri == "memory" || uri.starts_with("memory://") {
            Arc::new(RunStorage::in_memory())
        } else if let Some(path) = uri.strip_prefix("sled://").or_else(|| uri.strip_prefix("file://")) {
            Arc::new(RunStorage::open(&non_empty_path(path, tracking_uri)?)?)
        } else if uri.contains("://") {
            return Err(RegistryError::InvalidUri(format!(
                "unsupported scheme in '{tracking_uri}'"
            )));
        } else {
            Arc::new(RunStorage::open(&non_empty_path(uri, tracking_uri)?)?)
        };

        tracing::info!(tracking_uri = %uri, "Connected to run registry");
        Ok(Self::with_store(store, uri))
    }

    /// Use an existing store.
    pub fn with_store(store: Arc<dyn RunStore>, tracking_uri: impl Into<String>) -> Self {
        Self {
            store,
            tracking_uri: tracking_uri.into(),
        }
    }

    pub fn tracking_uri(&self) -> &str {
        &self.tracking_uri
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Fails when the backing store cannot be reached.
    pub fn check_reachable(&self) -> Result<()> {
        self.store.ping()
    }

    /// Runs matching a filter string such as `tags.signature = 'abc'`.
    pub fn search(&self, filter: &str) -> Result<Vec<RunRecord>> {
        self.store.search(&TagFilter::parse(filter)?)
    }

    /// Finished runs carrying the exact tag.
    pub fn find_finished(&self, tag_key: &str, tag_value: &str) -> Result<Vec<RunRecord>> {
        let filter = TagFilter::new(tag_key, tag_value);
        Ok(self
            .store
            .search(&filter)?
            .into_iter()
            .filter(|run| run.status == RunStatus::Finished)
            .collect())
    }

    /// Whether a finished run carries the tag. Query failures read as `false`.
    pub fn exists(&self, tag_key: &str, tag_value: &str) -> bool {
        match self.find_finished(tag_key, tag_value) {
            Ok(runs) => !runs.is_empty(),
            Err(e) => {
                tracing::warn!(
                    tag = %tag_key,
                    value = %tag_value,
                    error = %e,
                    "Run registry query failed; treating as not found"
                );
                false
            }
        }
    }

    /// Open a run scope. The run ends as `FAILED` unless [`RunScope::finish`] is called.
    pub fn start_run(&self, experiment: &str) -> Result<RunScope<'_>> {
        let handle = self.store.start_run(experiment)?;
        tracing::debug!(run_id = %handle.run_id, experiment, "Started run");
        Ok(RunScope {
            store: self.store.as_ref(),
            handle,
            closed: false,
        })
    }

    /// Write one complete run and close it; returns the run id.
    pub fn record(
        &self,
        experiment: &str,
        tags: &BTreeMap<String, String>,
        params: &BTreeMap<String, String>,
        metrics: &BTreeMap<String, f64>,
        model: &ModelArtifact,
    ) -> Result<String> {
        let scope = self.start_run(experiment)?;
        scope.set_tags(tags)?;
        scope.log_params(params)?;
        scope.log_metrics(metrics)?;
        scope.log_model(model)?;
        scope.finish()
    }
}

impl std::fmt::Debug for RunRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistryClient")
            .field("tracking_uri", &self.tracking_uri)
            .finish()
    }
}

/// An open run. Dropping it without [`RunScope::finish`] ends the run as `FAILED`.
pub struct RunScope<'a> {
    store: &'a dyn RunStore,
    handle: RunHandle,
    closed: bool,
}

impl RunScope<'_> {
    pub fn run_id(&self) -> &str {
        &self.handle.run_id
    }

    pub fn set_tag(&self, key: &str, value: &str) -> Result<()> {
        self.store.set_tag(&self.handle, key, value)
    }

    pub fn set_tags(&self, tags: &BTreeMap<String, String>) -> Result<()> {
        tags.iter().try_for_each(|(k, v)| self.set_tag(k, v))
    }

    pub fn log_params(&self, params: &BTreeMap<String, String>) -> Result<()> {
        self.store.log_params(&self.handle, params)
    }

    pub fn log_metrics(&self, metrics: &BTreeMap<String, f64>) -> Result<()> {
        self.store.log_metrics(&self.handle, metrics)
    }

    /// Store the model with a format hint taken from its variant.
    pub fn log_model(&self, model: &ModelArtifact) -> Result<ArtifactRecord> {
        let bytes = model
            .to_bytes()
            .map_err(|e| RegistryError::Artifact(e.to_string()))?;
        self.store
            .log_model(&self.handle, MODEL_ARTIFACT, &bytes, &model.format().to_string())
    }

    /// Close the run as `FINISHED`.
    pub fn finish(mut self) -> Result<String> {
        self.store.end_run(&self.handle, RunStatus::Finished)?;
        self.closed = true;
        tracing::debug!(run_id = %self.handle.run_id, "Finished run");
        Ok(self.handle.run_id.clone())
    }
}

impl Drop for RunScope<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.store.end_run(&self.handle, RunStatus::Failed) {
            tracing::warn!(run_id = %self.handle.run_id, error = %e, "Could not close abandoned run");
        } else {
            tracing::warn!(run_id = %self.handle.run_id, "Run closed as FAILED");
        }
    }
}

fn non_empty_path(path: &str, uri: &str) -> Result<std::path::PathBuf> {
    if path.trim().is_empty() {
        return Err(RegistryError::InvalidUri(format!("'{uri}' has no path")));
    }
    Ok(Path::new(path).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_ai_core::ensemble::{EnsembleKind, Node, Tree, TreeEnsemble};
    use tempfile::TempDir;

    fn model() -> ModelArtifact {
        let tree = Tree::new(vec![Node::leaf(0, 1.0)], 1.0);
        ModelArtifact::TreeEnsemble(TreeEnsemble::new(EnsembleKind::Bagged, 1, 0.0, vec![tree]))
    }

    #[test]
    fn test_connect_forms() {
        assert!(RunRegistryClient::connect("memory://").is_ok());
        let dir = TempDir::new().unwrap();
        let uri = format!("sled://{}", dir.path().join("runs").display());
        assert!(RunRegistryClient::connect(&uri).is_ok());
        assert!(matches!(
            RunRegistryClient::connect("http://localhost:5000"),
            Err(RegistryError::InvalidUri(_))
        ));
        assert!(matches!(RunRegistryClient::connect("sled://"), Err(RegistryError::InvalidUri(_))));
    }

    #[test]
    fn test_record_then_exists() {
        let client = RunRegistryClient::connect("memory://").unwrap();
        assert!(!client.exists("signature", "abc"));

        let tags = BTreeMap::from([("signature".to_string(), "abc".to_string())]);
        let metrics = BTreeMap::from([("rmse".to_string(), 0.1)]);
        let run_id = client
            .record("rf", &tags, &BTreeMap::new(), &metrics, &model())
            .unwrap();

        assert!(client.exists("signature", "abc"));
        let run = client.store().get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.artifacts[0].format, "tree_ensemble");
        assert_eq!(run.artifacts[0].digest, model().digest_hex().unwrap());
        assert_eq!(client.search("tags.signature = 'abc'").unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_scope_ends_failed_and_does_not_count() {
        let client = RunRegistryClient::connect("memory://").unwrap();
        let run_id = {
            let scope = client.start_run("rf").unwrap();
            scope.set_tag("signature", "abc").unwrap();
            scope.run_id().to_string()
        };

        let run = client.store().get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(!client.exists("signature", "abc"));
    }

    #[test]
    fn test_opaque_model_recorded() {
        let client = RunRegistryClient::connect("memory://").unwrap();
        let scope = client.start_run("x").unwrap();
        let record = scope.log_model(&ModelArtifact::Opaque(vec![1, 2, 3])).unwrap();
        assert_eq!(record.format, "opaque");
        assert_eq!(record.size, 3);
        scope.finish().unwrap();
    }
}
