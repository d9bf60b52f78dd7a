//! Categorical label encoding and inverse-frequency class weights.

use serde::{Deserialize, Serialize};
use std::ops::Index;

use crate::data::Label;
use crate::error::DataError;

/// One-hot encodes raw binary labels, preserving order.
pub fn to_categorical(labels: &[u8]) -> Result<Vec<[f32; 2]>, DataError> {
    labels
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            Label::new(value)
                .map(Label::one_hot)
                .ok_or(DataError::InvalidLabel { index, value })
        })
        .collect()
}

/// Inverse of [`Label::one_hot`]: the index of the largest entry, ties to class 0.
pub fn from_categorical(encoded: &[f32; 2]) -> Label {
    if encoded[1] > encoded[0] {
        Label::Positive
    } else {
        Label::Negative
    }
}

/// Per-class loss multipliers, fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    negative: f64,
    positive: f64,
}

impl ClassWeights {
    /// `n_total / (2 * count(c))` over the unbalanced labels.
    pub fn balanced(labels: &[Label]) -> Result<Self, DataError> {
        let positives = labels.iter().filter(|&&l| l == Label::Positive).count();
        let negatives = labels.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(DataError::EmptyLabelSet);
        }

        let total = labels.len() as f64;
        let classes = Label::ALL.len() as f64;
        Ok(Self {
            negative: total / (classes * negatives as f64),
            positive: total / (classes * positives as f64),
        })
    }

    pub fn weight(&self, label: Label) -> f64 {
        match label {
            Label::Negative => self.negative,
            Label::Positive => self.positive,
        }
    }

    /// Weight of each example, looked up from its one-hot target.
    pub fn sample_weights(&self, targets: &[[f32; 2]]) -> Vec<f32> {
        targets
            .iter()
            .map(|t| self.weight(from_categorical(t)) as f32)
            .collect()
    }
}

impl Index<Label> for ClassWeights {
    type Output = f64;

    fn index(&self, label: Label) -> &f64 {
        match label {
            Label::Negative => &self.negative,
            Label::Positive => &self.positive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_bijective() {
        let encoded = to_categorical(&[0, 1, 1, 0]).unwrap();
        assert_eq!(encoded, vec![[1.0, 0.0], [0.0, 1.0], [0.0, 1.0], [1.0, 0.0]]);

        let decoded: Vec<u8> = encoded.iter().map(|e| from_categorical(e).into()).collect();
        assert_eq!(decoded, vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_invalid_label_reports_position() {
        let err = to_categorical(&[0, 1, 3]).unwrap_err();
        assert!(matches!(err, DataError::InvalidLabel { index: 2, value: 3 }));
        assert!(to_categorical(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_ties_go_to_negative() {
        assert_eq!(from_categorical(&[0.5, 0.5]), Label::Negative);
        assert_eq!(from_categorical(&[0.2, 0.8]), Label::Positive);
    }

    #[test]
    fn test_balanced_weights() {
        let mut labels = vec![Label::Negative; 80];
        labels.extend(vec![Label::Positive; 20]);

        let weights = ClassWeights::balanced(&labels).unwrap();
        assert!((weights.weight(Label::Negative) - 0.625).abs() < 1e-12);
        assert!((weights[Label::Positive] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_weight_ratio_is_inverse_count_ratio() {
        let mut labels = vec![Label::Negative; 7];
        labels.extend(vec![Label::Positive; 3]);

        let weights = ClassWeights::balanced(&labels).unwrap();
        let ratio = weights[Label::Negative] / weights[Label::Positive];
        assert!((ratio - 3.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_weights_need_both_classes() {
        assert!(matches!(ClassWeights::balanced(&[]), Err(DataError::EmptyLabelSet)));
        assert!(matches!(
            ClassWeights::balanced(&[Label::Negative, Label::Negative]),
            Err(DataError::EmptyLabelSet)
        ));
    }

    #[test]
    fn test_sample_weights_follow_targets() {
        let weights = ClassWeights::balanced(&[Label::Negative, Label::Negative, Label::Negative, Label::Positive]).unwrap();
        let per_sample = weights.sample_weights(&[[0.0, 1.0], [1.0, 0.0]]);
        assert!((per_sample[0] - 2.0).abs() < 1e-6);
        assert!((per_sample[1] - 2.0 / 3.0).abs() < 1e-6);
    }
}
