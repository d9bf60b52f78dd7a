use anyhow::Result as AnyResult;
use log::info;
use serde::Serialize;
use std::path::Path;

use crate::data::{Label, Partition};
use crate::error::{EvaluationError, Result};
use crate::inference::predict_batched;
use crate::model::SequenceClassifier;
use crate::store::{model_key, ParameterStore};

/// Binary confusion matrix; every cell is present even when zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionCounts {
    pub tn: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tp: usize,
}

fn ratio(
    numerator: usize,
    denominator: usize,
    metric: &'static str,
    name: &'static str,
) -> std::result::Result<f64, EvaluationError> {
    if denominator == 0 {
        return Err(EvaluationError::DegenerateConfusionMatrix {
            metric,
            denominator: name,
        });
    }
    Ok(numerator as f64 / denominator as f64)
}

impl ConfusionCounts {
    pub fn new(tn: usize, fp: usize, fn_: usize, tp: usize) -> Self {
        Self { tn, fp, fn_, tp }
    }

    pub fn from_labels(truth: &[Label], predicted: &[Label]) -> Self {
        let mut counts = Self::default();
        for (&t, &p) in truth.iter().zip(predicted) {
            match (t, p) {
                (Label::Negative, Label::Negative) => counts.tn += 1,
                (Label::Negative, Label::Positive) => counts.fp += 1,
                (Label::Positive, Label::Negative) => counts.fn_ += 1,
                (Label::Positive, Label::Positive) => counts.tp += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }

    pub fn false_positive_rate(&self) -> std::result::Result<f64, EvaluationError> {
        ratio(self.fp, self.fp + self.tn, "false positive rate", "fp + tn")
    }

    pub fn false_negative_rate(&self) -> std::result::Result<f64, EvaluationError> {
        ratio(self.fn_, self.fn_ + self.tp, "false negative rate", "fn + tp")
    }

    pub fn recall(&self) -> std::result::Result<f64, EvaluationError> {
        ratio(self.tp, self.tp + self.fn_, "recall", "tp + fn")
    }

    pub fn precision(&self) -> std::result::Result<f64, EvaluationError> {
        ratio(self.tp, self.tp + self.fp, "precision", "tp + fp")
    }

    pub fn f1(&self) -> std::result::Result<f64, EvaluationError> {
        let precision = self.precision()?;
        let recall = self.recall()?;
        if precision + recall == 0.0 {
            return Err(EvaluationError::DegenerateConfusionMatrix {
                metric: "F1 score",
                denominator: "precision + recall",
            });
        }
        Ok(2.0 * precision * recall / (precision + recall))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub false_positive_rate: f64,
    pub false_negative_rate: f64,
    pub recall: f64,
    pub precision: f64,
    pub f1_score: f64,
}

impl Metrics {
    /// Fails on the first metric whose denominator is zero.
    pub fn from_counts(counts: &ConfusionCounts) -> std::result::Result<Self, EvaluationError> {
        Ok(Self {
            false_positive_rate: counts.false_positive_rate()?,
            false_negative_rate: counts.false_negative_rate()?,
            recall: counts.recall()?,
            precision: counts.precision()?,
            f1_score: counts.f1()?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub loss: f64,
    pub accuracy: f64,
    pub confusion: ConfusionCounts,
    pub metrics: Metrics,
}

impl EvaluationReport {
    pub fn print_report(&self) {
        println!("Accuracy is... {}", self.accuracy);
        println!("False positive rate is... {}", self.metrics.false_positive_rate);
        println!("False negative rate is... {}", self.metrics.false_negative_rate);
        println!("True positive rate is... {}", self.metrics.recall);
        println!("Precision is... {}", self.metrics.precision);
        println!("F1 score is... {}", self.metrics.f1_score);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "loss": self.loss,
            "accuracy": self.accuracy,
            "confusion_matrix": self.confusion,
            "metrics": self.metrics,
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> AnyResult<()> {
        let path = path.as_ref();
        let json_string = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, json_string)?;
        info!("Evaluation report saved to: {}", path.display());
        Ok(())
    }
}

pub struct Evaluator {
    batch_size: usize,
}

impl Evaluator {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Loads `<run_name>_model` into `classifier` and scores it on `test`.
    pub fn test<C, S>(
        &self,
        classifier: &mut C,
        store: &S,
        run_name: &str,
        test: &Partition,
    ) -> Result<EvaluationReport>
    where
        C: SequenceClassifier + ?Sized,
        S: ParameterStore + ?Sized,
    {
        let key = model_key(run_name);
        let blob = store.get(&key).map_err(EvaluationError::Store)?;
        classifier.import_parameters(&blob)?;
        info!("Loaded parameters from {:?}", key);

        self.score(classifier, test)
    }

    /// Scores `classifier` with its current parameters.
    pub fn score<C>(&self, classifier: &C, test: &Partition) -> Result<EvaluationReport>
    where
        C: SequenceClassifier + ?Sized,
    {
        let (loss, accuracy) = classifier.evaluate(test, self.batch_size)?;
        info!("Test loss {:.4}, accuracy {:.4}", loss, accuracy);

        let predictions = predict_batched(classifier, &test.inputs, self.batch_size)?;
        let predicted: Vec<Label> = predictions.iter().map(|p| p.label).collect();
        let confusion = ConfusionCounts::from_labels(&test.labels(), &predicted);
        info!(
            "Confusion matrix: tn={}, fp={}, fn={}, tp={}",
            confusion.tn, confusion.fp, confusion.fn_, confusion.tp
        );

        // Accuracy stays defined when a rate is not.
        let metrics = match Metrics::from_counts(&confusion) {
            Ok(metrics) => metrics,
            Err(err) => {
                println!("Accuracy is... {}", accuracy);
                return Err(err.into());
            }
        };
        Ok(EvaluationReport {
            loss,
            accuracy,
            confusion,
            metrics,
        })
    }
}
