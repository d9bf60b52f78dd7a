pub mod data;
pub mod encoding;
pub mod error;
pub mod evaluation;
pub mod inference;
pub mod model;
pub mod optim;
pub mod preprocessing;
pub mod store;
pub mod training;

use candle_core::Device;
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub use error::{Error, Result};

use data::Dataset;
use evaluation::{EvaluationReport, Evaluator};
use model::BlstmClassifier;
use preprocessing::PreparedData;
use store::ParameterStore;
use training::{Trainer, TrainingStats};

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: model::ModelConfig,
    pub training: training::TrainingConfig,
    pub data: data::DataConfig,
}

impl Config {
    /// Defaults with the run name and batch size overridden.
    pub fn named(name: &str, batch_size: usize) -> Self {
        let mut config = Self::default();
        config.training.run_name = name.to_string();
        config.training.batch_size = batch_size;
        config
    }
}

/// Balances and splits a dataset on construction, then trains and tests a
/// [`BlstmClassifier`] on it, handing parameters over through `store`.
pub struct Blstm<S: ParameterStore> {
    model: BlstmClassifier,
    prepared: PreparedData,
    store: S,
    rng: ChaCha8Rng,
    config: Config,
}

impl<S: ParameterStore> Blstm<S> {
    pub fn new(dataset: &Dataset, config: Config, store: S) -> Result<Self> {
        let device = Device::cuda_if_available(0)?;
        Self::with_device(dataset, config, store, &device)
    }

    pub fn with_device(dataset: &Dataset, config: Config, store: S, device: &Device) -> Result<Self> {
        let mut rng = match config.data.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        info!(
            "Preparing {} examples of shape ({}, {})",
            dataset.len(),
            dataset.sequence_length(),
            dataset.feature_dim()
        );
        let prepared = PreparedData::prepare(dataset, &config.data, &mut rng)?;
        let model = BlstmClassifier::new(
            &config.model,
            dataset.sequence_length(),
            dataset.feature_dim(),
            device,
        )?;

        Ok(Self {
            model,
            prepared,
            store,
            rng,
            config,
        })
    }

    pub fn train(&mut self) -> Result<TrainingStats> {
        let trainer = Trainer::new(self.config.training.clone());
        trainer.train(
            &mut self.model,
            &self.prepared.train,
            &self.prepared.class_weights,
            &mut self.store,
            &mut self.rng,
        )
    }

    /// Reloads the stored parameters and evaluates on the held-out split.
    pub fn test(&mut self) -> Result<EvaluationReport> {
        let evaluator = Evaluator::new(self.config.training.batch_size);
        evaluator.test(
            &mut self.model,
            &self.store,
            &self.config.training.run_name,
            &self.prepared.test,
        )
    }

    pub fn prepared(&self) -> &PreparedData {
        &self.prepared
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
