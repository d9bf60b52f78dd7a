use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::data::Partition;
use crate::encoding::ClassWeights;
use crate::error::{Result, TrainingError};
use crate::model::SequenceClassifier;
use crate::store::{model_key, ParameterStore};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Prefix of the parameter store key, `<run_name>_model`.
    pub run_name: String,
    pub batch_size: usize,
    pub epochs: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            run_name: String::new(),
            batch_size: 64,
            epochs: 4,
        }
    }
}

pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Fits `classifier` for the configured number of epochs, then stores its
    /// parameters under `<run_name>_model`.
    pub fn train<C, S, R>(
        &self,
        classifier: &mut C,
        train: &Partition,
        class_weights: &ClassWeights,
        store: &mut S,
        rng: &mut R,
    ) -> Result<TrainingStats>
    where
        C: SequenceClassifier + ?Sized,
        S: ParameterStore + ?Sized,
        R: Rng + ?Sized,
    {
        let batch_size = self.config.batch_size.max(1);
        let sample_weights = class_weights.sample_weights(&train.targets);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut stats = TrainingStats::new();

        info!(
            "Training on {} examples: epochs={}, batch_size={}",
            train.len(),
            self.config.epochs,
            batch_size
        );

        for epoch in 0..self.config.epochs {
            order.shuffle(rng);

            let mut epoch_loss = 0.0;
            let mut batch_count = 0;
            for (batch, indices) in order.chunks(batch_size).enumerate() {
                let batch_data = train.select(indices);
                let weights: Vec<f32> = indices.iter().map(|&i| sample_weights[i]).collect();

                let loss = classifier.fit_batch(&batch_data.inputs, &batch_data.targets, &weights)?;
                if !loss.is_finite() {
                    return Err(TrainingError::Diverged { epoch, batch, loss }.into());
                }
                debug!("Epoch {} batch {}: loss={:.6}", epoch + 1, batch, loss);

                epoch_loss += loss as f64;
                batch_count += 1;
            }

            let mean_loss = if batch_count > 0 {
                epoch_loss / batch_count as f64
            } else {
                0.0
            };
            stats.add_epoch(epoch, mean_loss);
            info!(
                "Epoch {}/{}: Train Loss = {:.4}",
                epoch + 1,
                self.config.epochs,
                mean_loss
            );
        }

        self.save(classifier, store)?;
        Ok(stats)
    }

    fn save<C, S>(&self, classifier: &C, store: &mut S) -> Result<()>
    where
        C: SequenceClassifier + ?Sized,
        S: ParameterStore + ?Sized,
    {
        let key = model_key(&self.config.run_name);
        let blob = classifier.export_parameters()?;
        info!("Saving {} bytes of parameters under {:?}", blob.len(), key);
        store.put(&key, blob).map_err(TrainingError::Store)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrainingStats {
    pub epochs: Vec<usize>,
    pub train_losses: Vec<f64>,
}

impl TrainingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_epoch(&mut self, epoch: usize, train_loss: f64) {
        self.epochs.push(epoch);
        self.train_losses.push(train_loss);
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.train_losses.last().copied()
    }
}
