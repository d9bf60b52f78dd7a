use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

use crate::encoding::{from_categorical, to_categorical};
use crate::error::DataError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Share of the balanced set held out for testing.
    pub test_fraction: f64,
    /// Fixes resampling and splitting; drawn from entropy when unset.
    pub seed: Option<u64>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: None,
        }
    }
}

/// Binary class of an example. `Positive` marks the vulnerable class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Label {
    Negative = 0,
    Positive = 1,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Negative, Label::Positive];

    pub fn new(value: u8) -> Option<Self> {
        match value {
            0 => Some(Label::Negative),
            1 => Some(Label::Positive),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn one_hot(self) -> [f32; 2] {
        match self {
            Label::Negative => [1.0, 0.0],
            Label::Positive => [0.0, 1.0],
        }
    }
}

impl TryFrom<u8> for Label {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Label::new(value).ok_or_else(|| format!("invalid label {}: expected 0 or 1", value))
    }
}

impl From<Label> for u8 {
    fn from(label: Label) -> Self {
        label as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Example {
    /// `[sequence_length][feature_dim]` vectors.
    pub vector: Vec<Vec<f32>>,
    pub label: Label,
}

/// On-disk form; the label stays a raw integer until it is encoded.
#[derive(Deserialize)]
struct RawExample {
    vector: Vec<Vec<f32>>,
    label: u8,
}

impl Example {
    fn shape(&self) -> (usize, usize) {
        let feature_dim = self.vector.first().map_or(0, |row| row.len());
        (self.vector.len(), feature_dim)
    }
}

/// Immutable collection of equally shaped examples.
#[derive(Debug, Clone)]
pub struct Dataset {
    examples: Vec<Example>,
    sequence_length: usize,
    feature_dim: usize,
}

impl Dataset {
    pub fn new(examples: Vec<Example>) -> std::result::Result<Self, DataError> {
        let first = examples.first().ok_or(DataError::EmptyDataset)?;
        let expected = first.shape();
        if expected.0 == 0 || expected.1 == 0 {
            return Err(DataError::EmptyShape {
                sequence_length: expected.0,
                feature_dim: expected.1,
            });
        }

        for (index, example) in examples.iter().enumerate() {
            let found = example.shape();
            let ragged = example.vector.iter().any(|row| row.len() != expected.1);
            if found != expected || ragged {
                return Err(DataError::ShapeMismatch {
                    index,
                    expected,
                    found,
                });
            }
        }

        Ok(Self {
            examples,
            sequence_length: expected.0,
            feature_dim: expected.1,
        })
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let raw: Vec<RawExample> = serde_json::from_str(&content)?;

        let labels: Vec<u8> = raw.iter().map(|r| r.label).collect();
        let encoded = to_categorical(&labels)?;
        let examples = raw
            .into_iter()
            .zip(&encoded)
            .map(|(r, target)| Example {
                vector: r.vector,
                label: from_categorical(target),
            })
            .collect();
        Ok(Self::new(examples)?)
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn example(&self, index: usize) -> Option<&Example> {
        self.examples.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Example> {
        self.examples.iter()
    }

    pub fn labels(&self) -> Vec<Label> {
        self.examples.iter().map(|e| e.label).collect()
    }

    /// `(negatives, positives)`.
    pub fn class_counts(&self) -> (usize, usize) {
        let positives = self
            .examples
            .iter()
            .filter(|e| e.label == Label::Positive)
            .count();
        (self.examples.len() - positives, positives)
    }

    /// Flattens the selected examples into one batch, in index order.
    pub fn gather(&self, indices: &[usize]) -> SequenceBatch {
        let mut values =
            Vec::with_capacity(indices.len() * self.sequence_length * self.feature_dim);
        for &i in indices {
            for row in &self.examples[i].vector {
                values.extend_from_slice(row);
            }
        }

        SequenceBatch {
            values,
            len: indices.len(),
            sequence_length: self.sequence_length,
            feature_dim: self.feature_dim,
        }
    }

    /// Inputs and one-hot targets for the selected examples.
    pub fn partition(&self, indices: &[usize]) -> Partition {
        Partition {
            inputs: self.gather(indices),
            targets: indices
                .iter()
                .map(|&i| self.examples[i].label.one_hot())
                .collect(),
        }
    }
}

/// Row-major `[len, sequence_length, feature_dim]` block of inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceBatch {
    values: Vec<f32>,
    len: usize,
    sequence_length: usize,
    feature_dim: usize,
}

impl SequenceBatch {
    pub fn from_vec(
        values: Vec<f32>,
        sequence_length: usize,
        feature_dim: usize,
    ) -> std::result::Result<Self, DataError> {
        let stride = sequence_length * feature_dim;
        if stride == 0 || values.len() % stride != 0 {
            return Err(DataError::ShapeMismatch {
                index: 0,
                expected: (sequence_length, feature_dim),
                found: (values.len(), 1),
            });
        }
        Ok(Self {
            len: values.len() / stride,
            values,
            sequence_length,
            feature_dim,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    fn stride(&self) -> usize {
        self.sequence_length * self.feature_dim
    }

    /// Consecutive rows `range`.
    pub fn slice(&self, range: Range<usize>) -> SequenceBatch {
        let stride = self.stride();
        SequenceBatch {
            values: self.values[range.start * stride..range.end * stride].to_vec(),
            len: range.len(),
            sequence_length: self.sequence_length,
            feature_dim: self.feature_dim,
        }
    }

    /// Rows in the order given by `indices`.
    pub fn select(&self, indices: &[usize]) -> SequenceBatch {
        let stride = self.stride();
        let mut values = Vec::with_capacity(indices.len() * stride);
        for &i in indices {
            values.extend_from_slice(&self.values[i * stride..(i + 1) * stride]);
        }
        SequenceBatch {
            values,
            len: indices.len(),
            sequence_length: self.sequence_length,
            feature_dim: self.feature_dim,
        }
    }
}

/// Model-ready inputs with their categorical targets.
#[derive(Debug, Clone)]
pub struct Partition {
    pub inputs: SequenceBatch,
    pub targets: Vec<[f32; 2]>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn labels(&self) -> Vec<Label> {
        self.targets
            .iter()
            .map(from_categorical)
            .collect()
    }

    pub fn select(&self, indices: &[usize]) -> Partition {
        Partition {
            inputs: self.inputs.select(indices),
            targets: indices.iter().map(|&i| self.targets[i]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(seq: usize, dim: usize, value: f32, label: Label) -> Example {
        Example {
            vector: vec![vec![value; dim]; seq],
            label,
        }
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let examples = vec![
            example(3, 2, 0.0, Label::Negative),
            example(4, 2, 1.0, Label::Positive),
        ];
        let err = Dataset::new(examples).unwrap_err();
        assert!(matches!(
            err,
            DataError::ShapeMismatch {
                index: 1,
                expected: (3, 2),
                found: (4, 2)
            }
        ));
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let mut ragged = example(2, 3, 0.0, Label::Negative);
        ragged.vector[1].pop();
        let examples = vec![example(2, 3, 0.0, Label::Negative), ragged];
        assert!(matches!(
            Dataset::new(examples),
            Err(DataError::ShapeMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_zero_width_examples() {
        let no_steps = vec![
            example(0, 0, 0.0, Label::Positive),
            example(0, 0, 0.0, Label::Negative),
        ];
        assert!(matches!(
            Dataset::new(no_steps),
            Err(DataError::EmptyShape {
                sequence_length: 0,
                feature_dim: 0
            })
        ));

        let no_features = vec![example(1, 0, 0.0, Label::Positive)];
        assert!(matches!(
            Dataset::new(no_features),
            Err(DataError::EmptyShape {
                sequence_length: 1,
                feature_dim: 0
            })
        ));
    }

    #[test]
    fn test_json_file_labels_are_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(
            &path,
            r#"[{"vector": [[0.5, 1.0]], "label": 1}, {"vector": [[0.0, 0.2]], "label": 0}]"#,
        )
        .unwrap();

        let dataset = Dataset::from_json_file(&path).unwrap();
        assert_eq!(dataset.labels(), vec![Label::Positive, Label::Negative]);
        assert_eq!((dataset.sequence_length(), dataset.feature_dim()), (1, 2));
    }

    #[test]
    fn test_json_file_rejects_unknown_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(
            &path,
            r#"[{"vector": [[0.5]], "label": 2}, {"vector": [[0.1]], "label": 0}]"#,
        )
        .unwrap();

        let err = Dataset::from_json_file(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::InvalidLabel { index: 0, value: 2 })
        ));
    }

    #[test]
    fn test_gather_preserves_index_order() {
        let dataset = Dataset::new(vec![
            example(2, 1, 0.0, Label::Negative),
            example(2, 1, 1.0, Label::Positive),
            example(2, 1, 2.0, Label::Negative),
        ])
        .unwrap();

        let batch = dataset.gather(&[2, 0]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.values(), &[2.0, 2.0, 0.0, 0.0]);

        let partition = dataset.partition(&[1, 2]);
        assert_eq!(partition.targets, vec![[0.0, 1.0], [1.0, 0.0]]);
        assert_eq!(partition.labels(), vec![Label::Positive, Label::Negative]);
        assert_eq!(dataset.class_counts(), (2, 1));
    }

    #[test]
    fn test_label_json_is_integer() {
        let parsed: Vec<Example> =
            serde_json::from_str(r#"[{"vector": [[0.5, 1.0]], "label": 1}]"#).unwrap();
        assert_eq!(parsed[0].label, Label::Positive);
        assert!(serde_json::from_str::<Example>(r#"{"vector": [[0.5]], "label": 2}"#).is_err());
        assert_eq!(serde_json::to_string(&Label::Negative).unwrap(), "0");
    }

    #[test]
    fn test_batch_slice_and_count() {
        let batch = SequenceBatch::from_vec((0..10).map(|v| v as f32).collect(), 1, 2).unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.slice(3..5).values(), &[6.0, 7.0, 8.0, 9.0]);
        assert!(SequenceBatch::from_vec(vec![0.0; 5], 1, 2).is_err());
        assert_eq!(batch.select(&[4, 0]).values(), &[8.0, 9.0, 0.0, 1.0]);
    }
}
