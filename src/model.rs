use candle_core::{bail, DType, Device, Error, Result, Tensor, D};
use candle_nn::rnn::{self, LSTMConfig, RNN};
use candle_nn::{Dropout, Linear, Module, Optimizer, VarBuilder, VarMap};
use log::debug;
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use std::collections::HashMap;

use crate::data::{Partition, SequenceBatch};
use crate::encoding::from_categorical;
use crate::optim::{Adamax, ParamsAdamax};

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before taking logs.
const EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub hidden_dim: usize,
    pub dense_dim: usize,
    pub dropout: f32,
    pub leaky_slope: f64,
    pub learning_rate: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 300,
            dense_dim: 300,
            dropout: 0.5,
            leaky_slope: 0.3,
            // Kept low; higher rates diverge on this architecture.
            learning_rate: 0.002,
        }
    }
}

/// A trainable binary classifier over `[sequence_length, feature_dim]` inputs.
pub trait SequenceClassifier {
    /// One optimisation step on a mini-batch. Each example's loss is scaled by
    /// its entry in `sample_weights`. Returns the weighted batch loss; when it
    /// is not finite the parameters are left untouched.
    fn fit_batch(
        &mut self,
        inputs: &SequenceBatch,
        targets: &[[f32; 2]],
        sample_weights: &[f32],
    ) -> Result<f32>;

    /// Class probabilities per example, inference mode.
    fn predict(&self, inputs: &SequenceBatch) -> Result<Vec<[f32; 2]>>;

    fn export_parameters(&self) -> Result<Vec<u8>>;

    fn import_parameters(&mut self, blob: &[u8]) -> Result<()>;

    /// Unweighted categorical cross-entropy and categorical accuracy.
    fn evaluate(&self, partition: &Partition, batch_size: usize) -> Result<(f64, f64)> {
        if partition.is_empty() {
            bail!("cannot evaluate an empty partition")
        }

        let mut loss = 0.0f64;
        let mut correct = 0usize;
        for start in (0..partition.len()).step_by(batch_size.max(1)) {
            let end = (start + batch_size.max(1)).min(partition.len());
            let probabilities = self.predict(&partition.inputs.slice(start..end))?;

            for (p, t) in probabilities.iter().zip(&partition.targets[start..end]) {
                loss -= t
                    .iter()
                    .zip(p.iter())
                    .map(|(&t, &p)| (t * p.clamp(EPSILON, 1.0 - EPSILON).ln()) as f64)
                    .sum::<f64>();
                if from_categorical(p) == from_categorical(t) {
                    correct += 1;
                }
            }
        }

        let n = partition.len() as f64;
        Ok((loss / n, correct as f64 / n))
    }
}

/// BiLSTM → Dense → LeakyReLU → Dropout → Dense → LeakyReLU → Dropout → Dense(2) → softmax.
pub struct BlstmClassifier {
    forward_lstm: rnn::LSTM,
    backward_lstm: rnn::LSTM,
    dense1: Linear,
    dense2: Linear,
    output: Linear,
    dropout: Dropout,
    leaky_slope: f64,
    sequence_length: usize,
    feature_dim: usize,
    varmap: VarMap,
    optimizer: Adamax,
    device: Device,
}

impl BlstmClassifier {
    pub fn new(
        config: &ModelConfig,
        sequence_length: usize,
        feature_dim: usize,
        device: &Device,
    ) -> Result<Self> {
        if sequence_length == 0 || feature_dim == 0 {
            bail!("input shape must be non-empty, got ({sequence_length}, {feature_dim})")
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let forward_lstm = rnn::lstm(
            feature_dim,
            config.hidden_dim,
            LSTMConfig::default(),
            vb.pp("bilstm"),
        )?;
        let backward_lstm = rnn::lstm(
            feature_dim,
            config.hidden_dim,
            LSTMConfig {
                direction: rnn::Direction::Backward,
                ..Default::default()
            },
            vb.pp("bilstm"),
        )?;
        let dense1 = candle_nn::linear(2 * config.hidden_dim, config.dense_dim, vb.pp("dense1"))?;
        let dense2 = candle_nn::linear(config.dense_dim, config.dense_dim, vb.pp("dense2"))?;
        let output = candle_nn::linear(config.dense_dim, 2, vb.pp("output"))?;

        let optimizer = Adamax::new(
            varmap.all_vars(),
            ParamsAdamax {
                lr: config.learning_rate,
                ..Default::default()
            },
        )?;

        Ok(Self {
            forward_lstm,
            backward_lstm,
            dense1,
            dense2,
            output,
            dropout: Dropout::new(config.dropout),
            leaky_slope: config.leaky_slope,
            sequence_length,
            feature_dim,
            varmap,
            optimizer,
            device: device.clone(),
        })
    }

    pub fn input_shape(&self) -> (usize, usize) {
        (self.sequence_length, self.feature_dim)
    }

    fn input_tensor(&self, inputs: &SequenceBatch) -> Result<Tensor> {
        if (inputs.sequence_length(), inputs.feature_dim()) != self.input_shape() {
            bail!(
                "input shape ({}, {}) does not match model shape {:?}",
                inputs.sequence_length(),
                inputs.feature_dim(),
                self.input_shape()
            )
        }
        Tensor::from_vec(
            inputs.values().to_vec(),
            (inputs.len(), self.sequence_length, self.feature_dim),
            &self.device,
        )
    }

    /// Final hidden state of both directions, concatenated: `[batch, 2 * hidden]`.
    fn encode(&self, xs: &Tensor) -> Result<Tensor> {
        let seq_len = xs.dim(1)?;
        let forward_states = self.forward_lstm.seq(xs)?;

        let reversed: Vec<u32> = (0..seq_len as u32).rev().collect();
        let reversed = Tensor::new(reversed.as_slice(), xs.device())?;
        let backward_states = self.backward_lstm.seq(&xs.index_select(&reversed, 1)?)?;

        match (forward_states.last(), backward_states.last()) {
            (Some(fw), Some(bw)) => Tensor::cat(&[fw.h(), bw.h()], 1),
            _ => bail!("cannot encode an empty sequence"),
        }
    }

    fn leaky_relu(&self, xs: &Tensor) -> Result<Tensor> {
        xs.maximum(&(xs * self.leaky_slope)?)
    }

    /// Unnormalised class scores.
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.encode(xs)?;
        let xs = self.leaky_relu(&self.dense1.forward(&xs)?)?;
        let xs = self.dropout.forward(&xs, train)?;
        let xs = self.leaky_relu(&self.dense2.forward(&xs)?)?;
        let xs = self.dropout.forward(&xs, train)?;
        self.output.forward(&xs)
    }

    /// Variable name to `(shape, values)`, sorted by name.
    fn snapshot(&self) -> Result<Vec<(String, Vec<usize>, Vec<f32>)>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Error::Msg("parameter map lock poisoned".to_string()))?;
        let mut entries = data
            .iter()
            .map(|(name, var)| {
                let tensor = var.as_tensor();
                let values = tensor.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
                Ok((name.clone(), tensor.dims().to_vec(), values))
            })
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

impl SequenceClassifier for BlstmClassifier {
    fn fit_batch(
        &mut self,
        inputs: &SequenceBatch,
        targets: &[[f32; 2]],
        sample_weights: &[f32],
    ) -> Result<f32> {
        let n = inputs.len();
        if targets.len() != n || sample_weights.len() != n {
            bail!(
                "batch of {n} inputs has {} targets and {} weights",
                targets.len(),
                sample_weights.len()
            )
        }

        let xs = self.input_tensor(inputs)?;
        let flat_targets: Vec<f32> = targets.iter().flatten().copied().collect();
        let targets = Tensor::from_vec(flat_targets, (n, 2), &self.device)?;
        let weights = Tensor::from_vec(sample_weights.to_vec(), n, &self.device)?;

        let logits = self.forward_t(&xs, true)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        let per_example = (targets * log_probs)?.sum(1)?.neg()?;
        let loss = (per_example * weights)?.mean_all()?;

        let value = loss.to_scalar::<f32>()?;
        if value.is_finite() {
            self.optimizer.backward_step(&loss)?;
        }
        debug!("Batch of {} examples, loss {:.6}", n, value);
        Ok(value)
    }

    fn predict(&self, inputs: &SequenceBatch) -> Result<Vec<[f32; 2]>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let xs = self.input_tensor(inputs)?;
        let logits = self.forward_t(&xs, false)?;
        let probabilities = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;
        Ok(probabilities.into_iter().map(|p| [p[0], p[1]]).collect())
    }

    /// Safetensors bytes of every variable.
    fn export_parameters(&self) -> Result<Vec<u8>> {
        let entries = self.snapshot()?;
        let bytes: Vec<Vec<u8>> = entries
            .iter()
            .map(|(_, _, values)| values.iter().flat_map(|v| v.to_le_bytes()).collect())
            .collect();

        let mut tensors = HashMap::new();
        for ((name, shape, _), data) in entries.iter().zip(bytes.iter()) {
            let view = TensorView::new(Dtype::F32, shape.clone(), data).map_err(Error::wrap)?;
            tensors.insert(name.clone(), view);
        }
        safetensors::tensor::serialize(&tensors, &None).map_err(Error::wrap)
    }

    fn import_parameters(&mut self, blob: &[u8]) -> Result<()> {
        let stored = SafeTensors::deserialize(blob).map_err(Error::wrap)?;
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Error::Msg("parameter map lock poisoned".to_string()))?;

        for (name, var) in data.iter() {
            let view = stored
                .tensor(name)
                .map_err(|e| Error::Msg(format!("parameter {name}: {e}")))?;
            if view.dtype() != Dtype::F32 {
                bail!("parameter {name} is stored as {:?}, expected F32", view.dtype())
            }
            let values: Vec<f32> = view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            let tensor = Tensor::from_vec(values, view.shape(), &self.device)?;
            var.set(&tensor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            hidden_dim: 4,
            dense_dim: 6,
            ..Default::default()
        }
    }

    fn batch(len: usize, seq: usize, dim: usize) -> SequenceBatch {
        let values = (0..len * seq * dim).map(|v| (v % 7) as f32 / 7.0).collect();
        SequenceBatch::from_vec(values, seq, dim).unwrap()
    }

    #[test]
    fn test_predict_returns_distributions() -> Result<()> {
        let model = BlstmClassifier::new(&tiny_config(), 5, 3, &Device::Cpu)?;
        let probabilities = model.predict(&batch(4, 5, 3))?;

        assert_eq!(probabilities.len(), 4);
        for p in probabilities {
            assert!((p[0] + p[1] - 1.0).abs() < 1e-5);
            assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
        }
        Ok(())
    }

    #[test]
    fn test_predict_is_deterministic_without_dropout() -> Result<()> {
        let model = BlstmClassifier::new(&tiny_config(), 5, 3, &Device::Cpu)?;
        let inputs = batch(3, 5, 3);
        assert_eq!(model.predict(&inputs)?, model.predict(&inputs)?);
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_input_shape() -> Result<()> {
        let model = BlstmClassifier::new(&tiny_config(), 5, 3, &Device::Cpu)?;
        assert!(model.predict(&batch(2, 4, 3)).is_err());
        Ok(())
    }

    #[test]
    fn test_fit_batch_updates_parameters() -> Result<()> {
        let mut model = BlstmClassifier::new(&tiny_config(), 5, 3, &Device::Cpu)?;
        let inputs = batch(4, 5, 3);
        let before = model.export_parameters()?;

        let targets = [[1.0, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0]];
        let loss = model.fit_batch(&inputs, &targets, &[0.625, 2.5, 0.625, 2.5])?;

        assert!(loss.is_finite() && loss > 0.0);
        assert_ne!(before, model.export_parameters()?);
        assert!(model.fit_batch(&inputs, &targets, &[1.0]).is_err());
        Ok(())
    }

    #[test]
    fn test_parameters_round_trip_between_models() -> Result<()> {
        let source = BlstmClassifier::new(&tiny_config(), 5, 3, &Device::Cpu)?;
        let mut target = BlstmClassifier::new(&tiny_config(), 5, 3, &Device::Cpu)?;
        let inputs = batch(3, 5, 3);

        target.import_parameters(&source.export_parameters()?)?;
        assert_eq!(source.predict(&inputs)?, target.predict(&inputs)?);
        Ok(())
    }

    #[test]
    fn test_import_rejects_other_topology() -> Result<()> {
        let wider = BlstmClassifier::new(
            &ModelConfig {
                hidden_dim: 8,
                ..tiny_config()
            },
            5,
            3,
            &Device::Cpu,
        )?;
        let mut model = BlstmClassifier::new(&tiny_config(), 5, 3, &Device::Cpu)?;
        assert!(model.import_parameters(&wider.export_parameters()?).is_err());
        assert!(model.import_parameters(b"not safetensors").is_err());
        Ok(())
    }

    #[test]
    fn test_evaluate_reports_loss_and_accuracy() -> Result<()> {
        let model = BlstmClassifier::new(&tiny_config(), 5, 3, &Device::Cpu)?;
        let partition = Partition {
            inputs: batch(5, 5, 3),
            targets: vec![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0], [1.0, 0.0]],
        };

        let (loss, accuracy) = model.evaluate(&partition, 2)?;
        assert!(loss.is_finite() && loss > 0.0);
        assert!((0.0..=1.0).contains(&accuracy));
        Ok(())
    }
}
