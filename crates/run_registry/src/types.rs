//! Type definitions for the run registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{RegistryError, Result};

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is open and accepting writes
    Running,
    /// Run completed successfully
    Finished,
    /// Run was closed on an error path
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Metadata of a stored model artifact; the bytes live alongside the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact name within the run
    pub name: String,
    /// Serialization format hint
    pub format: String,
    /// BLAKE3 digest of the stored bytes
    pub digest: String,
    /// Stored size in bytes
    pub size: u64,
}

/// Persisted training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier (UUID v4)
    pub run_id: String,
    /// Experiment namespace
    pub experiment: String,
    /// Lifecycle status
    pub status: RunStatus,
    /// Start timestamp
    pub start_time: DateTime<Utc>,
    /// End timestamp, set when the run is closed
    pub end_time: Option<DateTime<Utc>>,
    /// Tags
    pub tags: BTreeMap<String, String>,
    /// Params
    pub params: BTreeMap<String, String>,
    /// Metrics
    pub metrics: BTreeMap<String, f64>,
    /// Model artifacts
    pub artifacts: Vec<ArtifactRecord>,
}

impl RunRecord {
    pub fn new(run_id: String, experiment: String) -> Self {
        Self {
            run_id,
            experiment,
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            tags: BTreeMap::new(),
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == RunStatus::Running
    }
}

/// Handle to an open run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: String,
    pub experiment: String,
}

/// Exact-match tag filter: `tags.<key> = '<value>'`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse the filter syntax. Whitespace around tokens is ignored, the key
    /// may be wrapped in backticks and a quote inside the value is written
    /// twice.
    pub fn parse(filter: &str) -> Result<Self> {
        let invalid = |why: &str| RegistryError::InvalidFilter(format!("{why}: {filter}"));

        let rest = filter
            .trim()
            .strip_prefix("tags.")
            .ok_or_else(|| invalid("expected 'tags.' prefix"))?;
        let (key, rest) = rest.split_once('=').ok_or_else(|| invalid("expected '='"))?;

        let key = key.trim();
        let key = key
            .strip_prefix('`')
            .and_then(|k| k.strip_suffix('`'))
            .unwrap_or(key);
        if key.is_empty() {
            return Err(invalid("empty tag key"));
        }

        let rest = rest.trim();
        let quote = rest
            .chars()
            .next()
            .filter(|c| *c == '\'' || *c == '"')
            .ok_or_else(|| invalid("expected quoted value"))?;
        let body = rest[1..]
            .strip_suffix(quote)
            .ok_or_else(|| invalid("unterminated value"))?;

        let doubled = format!("{quote}{quote}");
        if body.replace(&doubled, "").contains(quote) {
            return Err(invalid("unescaped quote in value"));
        }

        Ok(Self::new(key, body.replace(&doubled, &quote.to_string())))
    }

    pub fn matches(&self, run: &RunRecord) -> bool {
        run.tags.get(&self.key).is_some_and(|v| *v == self.value)
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tags.{} = '{}'", self.key, self.value.replace('\'', "''"))
    }
}
