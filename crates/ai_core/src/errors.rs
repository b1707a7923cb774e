//! Error types shared by every stage of a dispatch run

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while preparing, training or recording a single config.
///
/// Everything except discovery-time failures is caught at the orchestrator
/// boundary and turned into a per-config failure line.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Malformed or incomplete training configuration
    #[error("Config error: {0}")]
    Config(String),

    /// A signature input file is missing or unreadable
    #[error("Cannot read signature file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Run registry query failed
    #[error("Registry query failed: {0}")]
    RegistryQuery(String),

    /// Recording a trained run in the registry failed
    #[error("Registry write failed: {0}")]
    RegistryWrite(String),

    /// A training implementation returned a malformed result
    #[error("Training contract violation: {0}")]
    ContractViolation(String),

    /// The underlying model fit failed
    #[error("Training execution failed: {0}")]
    TrainingExecution(String),

    /// Dataset is malformed or unusable for training
    #[error("Dataset error: {0}")]
    Data(String),
}

impl DispatchError {
    /// Short machine-friendly label used in summaries and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Config(_) => "config",
            DispatchError::FileRead { .. } => "file_read",
            DispatchError::RegistryQuery(_) => "registry_query",
            DispatchError::RegistryWrite(_) => "registry_write",
            DispatchError::ContractViolation(_) => "contract_violation",
            DispatchError::TrainingExecution(_) => "training_execution",
            DispatchError::Data(_) => "data",
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, DispatchError>;
