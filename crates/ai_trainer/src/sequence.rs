//! Sequence regressor trainer (`transformer`)
//!
//! Full-batch Adam on mean squared error over the single-token encoder
//! defined by [`SequenceModelState`]. Gradients are accumulated row by row
//! from each [`ForwardTrace`].

use assay_ai_core::contract::{ModelInfo, TrainingFunction, TrainingResult};
use assay_ai_core::sequence::{names, ForwardTrace, SequenceArchitecture, SequenceModelState};
use assay_ai_core::{evaluate, DispatchError, FeatureMatrix, ModelArtifact, Result, TrainingConfig};
use std::collections::BTreeMap;

use crate::deterministic::LcgRng;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

#[derive(Clone, Debug, PartialEq)]
pub struct SequenceParams {
    pub d_model: usize,
    pub nhead: usize,
    pub num_layers: usize,
    pub dim_feedforward: usize,
    pub lr: f64,
    pub epochs: usize,
    pub seed: u64,
}

impl Default for SequenceParams {
    fn default() -> Self {
        Self {
            d_model: 64,
            nhead: 4,
            num_layers: 2,
            dim_feedforward: 128,
            lr: 0.001,
            epochs: 10,
            seed: 42,
        }
    }
}

impl SequenceParams {
    pub fn from_config(config: &TrainingConfig) -> Result<Self> {
        let defaults = Self::default();
        let d_model = config.usize_or("d_model", defaults.d_model)?;
        let params = Self {
            d_model,
            nhead: config.usize_or("nhead", defaults.nhead)?,
            num_layers: config.usize_or("num_layers", defaults.num_layers)?,
            dim_feedforward: config.usize_or("dim_feedforward", 2 * d_model)?,
            lr: config.f64_or("lr", defaults.lr)?,
            epochs: config.usize_or("epochs", defaults.epochs)?,
            seed: config.u64_or("seed", defaults.seed)?,
        };
        if params.lr <= 0.0 {
            return Err(DispatchError::Config(format!("lr must be positive, got {}", params.lr)));
        }
        Ok(params)
    }

    pub fn architecture(&self, input_dim: usize) -> SequenceArchitecture {
        SequenceArchitecture {
            input_dim,
            d_model: self.d_model,
            nhead: self.nhead,
            num_layers: self.num_layers,
            dim_feedforward: self.dim_feedforward,
        }
    }
}

type Grads = BTreeMap<String, Vec<f64>>;

/// Uniform `±1/sqrt(fan_in)` initialization for every tensor.
pub fn init_state(architecture: SequenceArchitecture, seed: u64) -> Result<SequenceModelState> {
    let mut state = SequenceModelState::zeros(architecture).map_err(|e| DispatchError::Config(e.to_string()))?;
    let mut rng = LcgRng::new(seed);

    for (name, shape) in architecture.tensor_shapes() {
        let fan_in = if name.ends_with(".weight") { shape[1] } else { fan_in_for_bias(&architecture, &name) };
        let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
        let tensor = state.tensor_mut(&name).map_err(|e| DispatchError::TrainingExecution(e.to_string()))?;
        for value in tensor.data.iter_mut() {
            *value = rng.next_symmetric(bound);
        }
    }
    Ok(state)
}

fn fan_in_for_bias(arch: &SequenceArchitecture, name: &str) -> usize {
    if name == names::INPUT_BIAS {
        arch.input_dim
    } else if name.ends_with(names::FF2_BIAS) {
        arch.dim_feedforward
    } else {
        arch.d_model
    }
}

/// Adam optimizer state
struct Adam {
    lr: f64,
    step: i32,
    m: Grads,
    v: Grads,
}

impl Adam {
    fn new(lr: f64, state: &SequenceModelState) -> Self {
        let zeros: Grads = state
            .tensors
            .iter()
            .map(|(name, t)| (name.clone(), vec![0.0; t.len()]))
            .collect();
        Self {
            lr,
            step: 0,
            m: zeros.clone(),
            v: zeros,
        }
    }

    fn update(&mut self, state: &mut SequenceModelState, grads: &Grads) {
        self.step += 1;
        let bias1 = 1.0 - BETA1.powi(self.step);
        let bias2 = 1.0 - BETA2.powi(self.step);

        for (name, tensor) in state.tensors.iter_mut() {
            let (Some(g), Some(m), Some(v)) = (grads.get(name), self.m.get_mut(name), self.v.get_mut(name)) else {
                continue;
            };
            for i in 0..tensor.data.len() {
                m[i] = BETA1 * m[i] + (1.0 - BETA1) * g[i];
                v[i] = BETA2 * v[i] + (1.0 - BETA2) * g[i] * g[i];
                let m_hat = m[i] / bias1;
                let v_hat = v[i] / bias2;
                tensor.data[i] -= self.lr * m_hat / (v_hat.sqrt() + EPSILON);
            }
        }
    }
}

/// Accumulate `dW += d_out ⊗ x` and `db += d_out`.
fn accumulate_linear(grads: &mut Grads, weight: &str, bias: &str, d_out: &[f64], x: &[f64]) {
    if let Some(gw) = grads.get_mut(weight) {
        for (row, &d) in gw.chunks_exact_mut(x.len()).zip(d_out) {
            for (g, &xi) in row.iter_mut().zip(x) {
                *g += d * xi;
            }
        }
    }
    if let Some(gb) = grads.get_mut(bias) {
        for (g, &d) in gb.iter_mut().zip(d_out) {
            *g += d;
        }
    }
}

/// `Wᵀ d_out` for a `[out, in]` weight.
fn backprop_linear(state: &SequenceModelState, weight: &str, d_out: &[f64]) -> Result<Vec<f64>> {
    let w = state
        .tensor(weight)
        .map_err(|e| DispatchError::TrainingExecution(e.to_string()))?;
    let cols = w.shape[1];
    let mut d_in = vec![0.0; cols];
    for (row, &d) in w.data.chunks_exact(cols).zip(d_out) {
        for (acc, &wv) in d_in.iter_mut().zip(row) {
            *acc += d * wv;
        }
    }
    Ok(d_in)
}

fn add_into(acc: &mut [f64], other: &[f64]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a += b;
    }
}

/// Backpropagate `d_pred` through one forward trace.
fn backward(state: &SequenceModelState, trace: &ForwardTrace, d_pred: f64, grads: &mut Grads) -> Result<()> {
    accumulate_linear(grads, names::HEAD_WEIGHT, names::HEAD_BIAS, &[d_pred], trace.last_hidden());
    let mut dh = backprop_linear(state, names::HEAD_WEIGHT, &[d_pred])?;

    for (layer, block) in trace.blocks.iter().enumerate().rev() {
        let w2 = names::layer(layer, names::FF2_WEIGHT);
        accumulate_linear(grads, &w2, &names::layer(layer, names::FF2_BIAS), &dh, &block.ff_act);
        let d_act = backprop_linear(state, &w2, &dh)?;
        let d_pre: Vec<f64> = d_act
            .iter()
            .zip(&block.ff_pre)
            .map(|(d, pre)| if *pre > 0.0 { *d } else { 0.0 })
            .collect();

        let w1 = names::layer(layer, names::FF1_WEIGHT);
        accumulate_linear(grads, &w1, &names::layer(layer, names::FF1_BIAS), &d_pre, &block.mid);
        let mut d_mid = dh;
        add_into(&mut d_mid, &backprop_linear(state, &w1, &d_pre)?);

        let wo = names::layer(layer, names::OUT_WEIGHT);
        accumulate_linear(grads, &wo, &names::layer(layer, names::OUT_BIAS), &d_mid, &block.value);
        let d_value = backprop_linear(state, &wo, &d_mid)?;

        let wv = names::layer(layer, names::VALUE_WEIGHT);
        accumulate_linear(grads, &wv, &names::layer(layer, names::VALUE_BIAS), &d_value, &block.input);
        let mut d_in = d_mid;
        add_into(&mut d_in, &backprop_linear(state, &wv, &d_value)?);
        dh = d_in;
    }

    accumulate_linear(grads, names::INPUT_WEIGHT, names::INPUT_BIAS, &dh, &trace.input);
    Ok(())
}

/// Train a fresh state; returns it with the per-epoch training loss.
pub fn fit_sequence(
    features: &FeatureMatrix,
    targets: &[f64],
    params: &SequenceParams,
) -> Result<(SequenceModelState, Vec<f64>)> {
    let architecture = params.architecture(features.n_features());
    let mut state = init_state(architecture, params.seed)?;
    let mut adam = Adam::new(params.lr, &state);
    let n = features.n_rows() as f64;
    let mut losses = Vec::with_capacity(params.epochs);

    for epoch in 0..params.epochs {
        let mut grads: Grads = state
            .tensors
            .iter()
            .map(|(name, t)| (name.clone(), vec![0.0; t.len()]))
            .collect();
        let mut loss = 0.0;

        for (row, &target) in features.rows().iter().zip(targets) {
            let trace = state
                .forward_trace(row)
                .map_err(|e| DispatchError::TrainingExecution(e.to_string()))?;
            let err = trace.prediction - target;
            loss += err * err / n;
            backward(&state, &trace, 2.0 * err / n, &mut grads)?;
        }

        if !loss.is_finite() {
            return Err(DispatchError::TrainingExecution(format!(
                "loss diverged at epoch {}",
                epoch + 1
            )));
        }
        tracing::debug!(epoch = epoch + 1, loss, "sequence model epoch");
        losses.push(loss);
        adam.update(&mut state, &grads);
    }

    Ok((state, losses))
}

/// `models.transformer.train`
#[derive(Debug, Default)]
pub struct SequenceTrainer;

impl TrainingFunction for SequenceTrainer {
    fn name(&self) -> &str {
        "models.transformer.train"
    }

    fn train(&self, features: &FeatureMatrix, targets: &[f64], config: &TrainingConfig) -> Result<TrainingResult> {
        let params = SequenceParams::from_config(config)?;
        let (state, _) = fit_sequence(features, targets, &params)?;
        let predictions = state
            .predict(features.rows())
            .map_err(|e| DispatchError::TrainingExecution(e.to_string()))?;
        let metrics = evaluate(targets, &predictions);

        let info = ModelInfo::new("transformer", "TransformerRegressor")
            .with_dims(features.n_features(), state.parameter_count())
            .with_extra("epochs", params.epochs.to_string());

        Ok(TrainingResult::new(ModelArtifact::SequenceModel(state), metrics, info))
    }
}
