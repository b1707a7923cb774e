use assay_ai_core::DispatchError;
use thiserror::Error;

/// Errors returned by dataset loading and the built-in trainers.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("training error: {0}")]
    Training(String),
}

impl From<TrainerError> for DispatchError {
    fn from(err: TrainerError) -> Self {
        match err {
            TrainerError::Dataset(msg) => DispatchError::Data(msg),
            TrainerError::Csv(e) => DispatchError::Data(e.to_string()),
            TrainerError::Training(msg) => DispatchError::TrainingExecution(msg),
        }
    }
}
