use candle_core::Result;
use serde::Serialize;

use crate::data::{Label, SequenceBatch};
use crate::model::SequenceClassifier;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub probabilities: [f32; 2],
    pub label: Label,
}

impl Prediction {
    /// Rounds each probability (ties to even) and takes the first maximum, so
    /// a 0.5/0.5 split resolves to the negative class.
    pub fn from_probabilities(probabilities: [f32; 2]) -> Self {
        let rounded = probabilities.map(f32::round_ties_even);
        let label = if rounded[1] > rounded[0] {
            Label::Positive
        } else {
            Label::Negative
        };
        Self {
            probabilities,
            label,
        }
    }
}

/// Runs the classifier over `inputs` in chunks of `batch_size`.
pub fn predict_batched<C: SequenceClassifier + ?Sized>(
    classifier: &C,
    inputs: &SequenceBatch,
    batch_size: usize,
) -> Result<Vec<Prediction>> {
    let batch_size = batch_size.max(1);
    let mut predictions = Vec::with_capacity(inputs.len());

    for start in (0..inputs.len()).step_by(batch_size) {
        let end = (start + batch_size).min(inputs.len());
        let probabilities = classifier.predict(&inputs.slice(start..end))?;
        predictions.extend(probabilities.into_iter().map(Prediction::from_probabilities));
    }

    Ok(predictions)
}
