//! Storage implementation for the run registry
//!
//! Runs are bincode-encoded under `run:<id>`, artifact bytes under
//! `artifact:<id>:<name>`. With a database path the records live in sled;
//! without one they are kept in an in-process map.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{RegistryError, Result};
use crate::store::RunStore;
use crate::types::{ArtifactRecord, RunHandle, RunRecord, RunStatus, TagFilter};

const RUN_PREFIX: &str = "run:";
const ARTIFACT_PREFIX: &str = "artifact:";

/// Storage backend for the run registry
pub struct RunStorage {
    /// Persistent database, when opened from a path
    db: Option<sled::Db>,
    /// In-memory records when no database is configured
    cache: RwLock<BTreeMap<String, Vec<u8>>>,
    /// Serializes read-modify-write cycles on run records
    write_lock: Mutex<()>,
}

impl RunStorage {
    /// Open (or create) a sled database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        tracing::debug!(path = %path.display(), "Opened run registry database");
        Ok(Self {
            db: Some(db),
            cache: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
        })
    }

    /// Process-local store.
    pub fn in_memory() -> Self {
        Self {
            db: None,
            cache: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if let Some(ref db) = self.db {
            db.insert(key.as_bytes(), value)?;
            db.flush()?;
        } else {
            self.cache.write().insert(key.to_string(), value);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(ref db) = self.db {
            Ok(db.get(key.as_bytes())?.map(|v| v.to_vec()))
        } else {
            Ok(self.cache.read().get(key).cloned())
        }
    }

    fn runs(&self) -> Result<Vec<RunRecord>> {
        let mut runs = Vec::new();
        if let Some(ref db) = self.db {
            for item in db.scan_prefix(RUN_PREFIX.as_bytes()) {
                let (_, value) = item?;
                runs.push(bincode::deserialize::<RunRecord>(&value)?);
            }
        } else {
            let cache = self.cache.read();
            for (_, value) in cache.range(RUN_PREFIX.to_string()..).take_while(|(k, _)| k.starts_with(RUN_PREFIX)) {
                runs.push(bincode::deserialize::<RunRecord>(value)?);
            }
        }
        runs.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    fn load_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.get(&run_key(run_id))?
            .map(|data| bincode::deserialize(&data).map_err(RegistryError::from))
            .transpose()
    }

    fn store_run(&self, run: &RunRecord) -> Result<()> {
        self.put(&run_key(&run.run_id), bincode::serialize(run)?)
    }

    /// Apply `f` to an open run and persist the result.
    fn update_open_run<T>(&self, run: &RunHandle, f: impl FnOnce(&mut RunRecord) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut record = self
            .load_run(&run.run_id)?
            .ok_or_else(|| RegistryError::RunNotFound(run.run_id.clone()))?;
        if !record.is_open() {
            return Err(RegistryError::RunClosed(run.run_id.clone()));
        }
        let out = f(&mut record)?;
        self.store_run(&record)?;
        Ok(out)
    }
}

impl RunStore for RunStorage {
    fn search(&self, filter: &TagFilter) -> Result<Vec<RunRecord>> {
        Ok(self.runs()?.into_iter().filter(|run| filter.matches(run)).collect())
    }

    fn start_run(&self, experiment: &str) -> Result<RunHandle> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let record = RunRecord::new(run_id.clone(), experiment.to_string());
        {
            let _guard = self.write_lock.lock();
            self.store_run(&record)?;
        }
        Ok(RunHandle {
            run_id,
            experiment: experiment.to_string(),
        })
    }

    fn set_tag(&self, run: &RunHandle, key: &str, value: &str) -> Result<()> {
        self.update_open_run(run, |record| {
            record.tags.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn log_params(&self, run: &RunHandle, params: &BTreeMap<String, String>) -> Result<()> {
        self.update_open_run(run, |record| {
            for (key, value) in params {
                match record.params.get(key) {
                    Some(existing) if existing != value => {
                        return Err(RegistryError::ParamConflict {
                            run_id: record.run_id.clone(),
                            key: key.clone(),
                        });
                    }
                    _ => {
                        record.params.insert(key.clone(), value.clone());
                    }
                }
            }
            Ok(())
        })
    }

    fn log_metrics(&self, run: &RunHandle, metrics: &BTreeMap<String, f64>) -> Result<()> {
        self.update_open_run(run, |record| {
            record.metrics.extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
            Ok(())
        })
    }

    fn log_model(&self, run: &RunHandle, name: &str, bytes: &[u8], format: &str) -> Result<ArtifactRecord> {
        let artifact = ArtifactRecord {
            name: name.to_string(),
            format: format.to_string(),
            digest: blake3::hash(bytes).to_hex().to_string(),
            size: bytes.len() as u64,
        };
        self.update_open_run(run, |record| {
            self.put(&artifact_key(&record.run_id, name), bytes.to_vec())?;
            record.artifacts.retain(|a| a.name != name);
            record.artifacts.push(artifact.clone());
            Ok(artifact.clone())
        })
    }

    fn end_run(&self, run: &RunHandle, status: RunStatus) -> Result<()> {
        self.update_open_run(run, |record| {
            record.status = status;
            record.end_time = Some(chrono::Utc::now());
            Ok(())
        })
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.load_run(run_id)
    }

    fn load_artifact(&self, run_id: &str, name: &str) -> Result<Option<Vec<u8>>> {
        self.get(&artifact_key(run_id, name))
    }

    fn list_runs(&self, experiment: Option<&str>) -> Result<Vec<RunRecord>> {
        Ok(self
            .runs()?
            .into_iter()
            .filter(|run| experiment.is_none_or(|e| run.experiment == e))
            .collect())
    }

    fn ping(&self) -> Result<()> {
        if let Some(ref db) = self.db {
            db.size_on_disk()?;
        }
        Ok(())
    }
}

fn run_key(run_id: &str) -> String {
    format!("{RUN_PREFIX}{run_id}")
}

fn artifact_key(run_id: &str, name: &str) -> String {
    format!("{ARTIFACT_PREFIX}{run_id}:{name}")
}
