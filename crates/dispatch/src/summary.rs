//! Batch outcome reporting

use assay_ai_core::DispatchError;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// What happened to one config.
#[derive(Debug)]
pub enum ConfigOutcome {
    /// Trained and recorded as a new run
    Trained {
        run_id: String,
        metrics: BTreeMap<String, f64>,
    },
    /// A finished run already carries the lookup tag
    Skipped { tag: String, value: String },
    /// Dry run: not found in the registry, would be trained
    WouldTrain,
    /// Another dispatch holds the identity lease
    InProgress,
    Failed(DispatchError),
    /// Left untouched after an earlier failure under fail-fast
    NotAttempted,
}

impl ConfigOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ConfigOutcome::Trained { .. } => "trained",
            ConfigOutcome::Skipped { .. } => "skipped",
            ConfigOutcome::WouldTrain => "would_train",
            ConfigOutcome::InProgress => "in_progress",
            ConfigOutcome::Failed(_) => "failed",
            ConfigOutcome::NotAttempted => "not_attempted",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ConfigOutcome::Failed(_))
    }
}

/// Per-config line of the batch summary.
#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: PathBuf,
    pub model_type: String,
    /// Lookup identity, once computed
    pub identity: Option<String>,
    pub outcome: ConfigOutcome,
}

/// Result of one dispatch invocation.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub tracking_uri: String,
    pub reports: Vec<ConfigReport>,
    /// Config files excluded at discovery
    pub rejected: Vec<(PathBuf, String)>,
}

impl DispatchSummary {
    pub fn new(tracking_uri: impl Into<String>) -> Self {
        Self {
            tracking_uri: tracking_uri.into(),
            ..Self::default()
        }
    }

    pub fn total(&self) -> usize {
        self.reports.len()
    }

    fn count(&self, label: &str) -> usize {
        self.reports.iter().filter(|r| r.outcome.label() == label).count()
    }

    pub fn trained(&self) -> usize {
        self.count("trained")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn would_train(&self) -> usize {
        self.count("would_train")
    }

    pub fn in_progress(&self) -> usize {
        self.count("in_progress")
    }

    pub fn not_attempted(&self) -> usize {
        self.count("not_attempted")
    }

    /// Configs that were trained or failed.
    pub fn attempted(&self) -> usize {
        self.trained() + self.failed()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ConfigReport, &DispatchError)> {
        self.reports.iter().filter_map(|r| match &r.outcome {
            ConfigOutcome::Failed(e) => Some((r, e)),
            _ => None,
        })
    }

    /// Process exit code for the batch: 2 when a config failed and none was
    /// trained, else 0.
    pub fn exit_code(&self) -> u8 {
        if self.failed() > 0 && self.trained() == 0 {
            2
        } else {
            0
        }
    }
}

impl fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dispatch summary ({})", self.tracking_uri)?;
        writeln!(f, "  configs:       {}", self.total())?;
        writeln!(f, "  trained:       {}", self.trained())?;
        writeln!(f, "  skipped:       {}", self.skipped())?;
        writeln!(f, "  failed:        {}", self.failed())?;
        if self.would_train() > 0 {
            writeln!(f, "  would train:   {}", self.would_train())?;
        }
        if self.in_progress() > 0 {
            writeln!(f, "  in progress:   {}", self.in_progress())?;
        }
        if self.not_attempted() > 0 {
            writeln!(f, "  not attempted: {}", self.not_attempted())?;
        }
        if !self.rejected.is_empty() {
            writeln!(f, "  rejected:      {}", self.rejected.len())?;
        }

        for report in &self.reports {
            if let ConfigOutcome::Trained { run_id, metrics } = &report.outcome {
                let rendered: Vec<String> = metrics.iter().map(|(k, v)| format!("{k}={v:.4}")).collect();
                writeln!(
                    f,
                    "  [{}] {} run={} {}",
                    report.model_type,
                    report.config_path.display(),
                    run_id,
                    rendered.join(" ")
                )?;
            }
        }
        for (report, error) in self.failures() {
            writeln!(
                f,
                "  FAILED {} identity={} {}: {}",
                report.config_path.display(),
                report.identity.as_deref().unwrap_or("-"),
                error.kind(),
                error
            )?;
        }
        for (path, error) in &self.rejected {
            writeln!(f, "  REJECTED {}: {}", path.display(), error)?;
        }
        Ok(())
    }
}
