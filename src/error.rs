use thiserror::Error;

/// Domain errors raised by the data pipeline, models and trainer.
#[derive(Debug, Error)]
pub enum NliError {
    #[error("input pipeline received invalid mode: {0:?}")]
    InvalidMode(String),

    #[error("unknown label: {0}")]
    UnknownLabel(String),

    #[error("unknown model type {0}, expected 1 (baseline) or 2 (decomposable attention)")]
    UnknownModelType(u8),

    #[error("unknown dataset kind: {0:?}")]
    UnknownDataset(String),

    #[error("vectorizer vocabulary is empty; documents only contain stop words or are empty")]
    EmptyVocabulary,

    #[error("dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("{model} cannot consume {inputs} inputs")]
    InputMismatch {
        model: &'static str,
        inputs: &'static str,
    },

    #[error("length mismatch: {left} claims vs {right} evidences")]
    LengthMismatch { left: usize, right: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
