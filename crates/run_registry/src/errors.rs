//! Error types for the run registry

use assay_ai_core::DispatchError;
use thiserror::Error;

/// Errors that can occur while querying or writing runs
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Tracking URI could not be interpreted
    #[error("Invalid tracking URI: {0}")]
    InvalidUri(String),

    /// Search filter does not follow `tags.<key> = '<value>'`
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Run not found
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Write attempted on a run that has already ended
    #[error("Run {0} is closed")]
    RunClosed(String),

    /// A param was logged twice with different values
    #[error("Param '{key}' of run {run_id} already set")]
    ParamConflict { run_id: String, key: String },

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Artifact could not be prepared for storage
    #[error("Artifact error: {0}")]
    Artifact(String),
}

impl From<sled::Error> for RegistryError {
    fn from(err: sled::Error) -> Self {
        RegistryError::Database(err.to_string())
    }
}

impl From<bincode::Error> for RegistryError {
    fn from(err: bincode::Error) -> Self {
        RegistryError::Serialization(err.to_string())
    }
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        DispatchError::RegistryQuery(err.to_string())
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
