//! Run store wire contract

use std::collections::BTreeMap;

use crate::errors::Result;
use crate::types::{ArtifactRecord, RunHandle, RunRecord, RunStatus, TagFilter};

/// Minimal operations a tracking backend must provide.
///
/// Writes are append-only: once a run has ended every write to it fails
/// with [`crate::RegistryError::RunClosed`].
pub trait RunStore: Send + Sync {
    /// All runs (open or closed) carrying the exact tag.
    fn search(&self, filter: &TagFilter) -> Result<Vec<RunRecord>>;

    fn start_run(&self, experiment: &str) -> Result<RunHandle>;

    fn set_tag(&self, run: &RunHandle, key: &str, value: &str) -> Result<()>;

    fn log_params(&self, run: &RunHandle, params: &BTreeMap<String, String>) -> Result<()>;

    fn log_metrics(&self, run: &RunHandle, metrics: &BTreeMap<String, f64>) -> Result<()>;

    /// Store artifact bytes under `name` with a format hint.
    fn log_model(&self, run: &RunHandle, name: &str, bytes: &[u8], format: &str) -> Result<ArtifactRecord>;

    fn end_run(&self, run: &RunHandle, status: RunStatus) -> Result<()>;

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Stored bytes of a run's artifact.
    fn load_artifact(&self, run_id: &str, name: &str) -> Result<Option<Vec<u8>>>;

    /// Every run, optionally limited to one experiment, oldest first.
    fn list_runs(&self, experiment: Option<&str>) -> Result<Vec<RunRecord>>;

    /// Cheap reachability probe.
    fn ping(&self) -> Result<()>;
}
