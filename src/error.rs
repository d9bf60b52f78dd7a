//! Error taxonomy for the data, training and evaluation stages.

use thiserror::Error;

/// Failures while preparing examples for training.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("need at least as many negative examples as positive ones (positives={positives}, negatives={negatives})")]
    InsufficientNegativeSamples { positives: usize, negatives: usize },

    #[error("dataset has no positive examples to balance against")]
    EmptyDataset,

    #[error("class {label} has {count} member(s); stratification needs at least 2 per class")]
    InsufficientSamplesForStratification { label: u8, count: usize },

    #[error("invalid label {value} at index {index}: expected 0 or 1")]
    InvalidLabel { index: usize, value: u8 },

    #[error("cannot compute class weights: label set is empty or a class never occurs")]
    EmptyLabelSet,

    #[error("example {index} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("examples must have at least one time step and one feature, got ({sequence_length}, {feature_dim})")]
    EmptyShape {
        sequence_length: usize,
        feature_dim: usize,
    },

    #[error("test fraction must lie strictly between 0 and 1, got {0}")]
    InvalidTestFraction(f64),
}

/// Failures of the parameter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no parameters stored under key {0:?}")]
    MissingKey(String),

    #[error("key {0:?} may only contain letters, digits, '.', '_' and '-'")]
    InvalidKey(String),

    #[error("parameter store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("loss became non-finite ({loss}) at epoch {epoch}, batch {batch}")]
    Diverged { epoch: usize, batch: usize, loss: f32 },

    #[error("could not persist parameters: {0}")]
    Store(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("{metric} is undefined: {denominator} is zero")]
    DegenerateConfusionMatrix {
        metric: &'static str,
        denominator: &'static str,
    },

    #[error("could not load parameters: {0}")]
    Store(#[source] StoreError),
}

/// Crate-level error; the variant names the stage that failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("data preparation failed: {0}")]
    Data(#[from] DataError),

    #[error("training failed: {0}")]
    Training(#[from] TrainingError),

    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
