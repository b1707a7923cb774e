//! Sequence (attention) regressor state and forward pass
//!
//! Each feature row is projected to a single `d_model` token and passed
//! through `num_layers` encoder blocks. With a one-token sequence the
//! attention softmax is identically 1, so a block reduces to
//!
//! ```text
//! h = h + W_o (W_v h + b_v) + b_o
//! h = h + W_2 relu(W_1 h + b_1) + b_2
//! ```
//!
//! followed by a linear head to one output. Parameters are kept as named
//! tensors so the state serializes like a framework state dict.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SequenceError {
    #[error("Invalid architecture: {0}")]
    InvalidArchitecture(String),

    #[error("Missing tensor: {0}")]
    MissingTensor(String),

    #[error("Tensor {name} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Input has {actual} features, expected {expected}")]
    InputWidth { expected: usize, actual: usize },
}

/// Dense row-major tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Shape hyperparameters of the regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceArchitecture {
    pub input_dim: usize,
    pub d_model: usize,
    pub nhead: usize,
    pub num_layers: usize,
    pub dim_feedforward: usize,
}

impl SequenceArchitecture {
    pub fn validate(&self) -> Result<(), SequenceError> {
        let dims = [
            ("input_dim", self.input_dim),
            ("d_model", self.d_model),
            ("nhead", self.nhead),
            ("dim_feedforward", self.dim_feedforward),
        ];
        if let Some((name, _)) = dims.iter().find(|(_, v)| *v == 0) {
            return Err(SequenceError::InvalidArchitecture(format!("{name} must be positive")));
        }
        if self.d_model % self.nhead != 0 {
            return Err(SequenceError::InvalidArchitecture(format!(
                "d_model {} is not divisible by nhead {}",
                self.d_model, self.nhead
            )));
        }
        Ok(())
    }

    /// Every parameter tensor name with its expected shape, in a fixed order.
    pub fn tensor_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let (d, ff) = (self.d_model, self.dim_feedforward);
        let mut shapes = vec![
            (names::INPUT_WEIGHT.to_string(), vec![d, self.input_dim]),
            (names::INPUT_BIAS.to_string(), vec![d]),
        ];
        for layer in 0..self.num_layers {
            shapes.extend([
                (names::layer(layer, names::VALUE_WEIGHT), vec![d, d]),
                (names::layer(layer, names::VALUE_BIAS), vec![d]),
                (names::layer(layer, names::OUT_WEIGHT), vec![d, d]),
                (names::layer(layer, names::OUT_BIAS), vec![d]),
                (names::layer(layer, names::FF1_WEIGHT), vec![ff, d]),
                (names::layer(layer, names::FF1_BIAS), vec![ff]),
                (names::layer(layer, names::FF2_WEIGHT), vec![d, ff]),
                (names::layer(layer, names::FF2_BIAS), vec![d]),
            ]);
        }
        shapes.push((names::HEAD_WEIGHT.to_string(), vec![1, d]));
        shapes.push((names::HEAD_BIAS.to_string(), vec![1]));
        shapes
    }
}

/// Tensor naming scheme.
pub mod names {
    pub const INPUT_WEIGHT: &str = "input.weight";
    pub const INPUT_BIAS: &str = "input.bias";
    pub const VALUE_WEIGHT: &str = "value.weight";
    pub const VALUE_BIAS: &str = "value.bias";
    pub const OUT_WEIGHT: &str = "out.weight";
    pub const OUT_BIAS: &str = "out.bias";
    pub const FF1_WEIGHT: &str = "ff1.weight";
    pub const FF1_BIAS: &str = "ff1.bias";
    pub const FF2_WEIGHT: &str = "ff2.weight";
    pub const FF2_BIAS: &str = "ff2.bias";
    pub const HEAD_WEIGHT: &str = "head.weight";
    pub const HEAD_BIAS: &str = "head.bias";

    pub fn layer(index: usize, param: &str) -> String {
        format!("layers.{index}.{param}")
    }
}

/// Activations of one encoder block, kept for backpropagation.
#[derive(Debug, Clone)]
pub struct BlockTrace {
    pub input: Vec<f64>,
    pub value: Vec<f64>,
    pub mid: Vec<f64>,
    pub ff_pre: Vec<f64>,
    pub ff_act: Vec<f64>,
    pub output: Vec<f64>,
}

/// Every intermediate of a forward pass over one row.
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    pub input: Vec<f64>,
    pub embedded: Vec<f64>,
    pub blocks: Vec<BlockTrace>,
    pub prediction: f64,
}

impl ForwardTrace {
    /// Hidden state fed to the head.
    pub fn last_hidden(&self) -> &[f64] {
        self.blocks
            .last()
            .map(|b| b.output.as_slice())
            .unwrap_or(&self.embedded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceModelState {
    pub architecture: SequenceArchitecture,
    pub tensors: BTreeMap<String, Tensor>,
}

impl SequenceModelState {
    /// All-zero parameters for the given architecture.
    pub fn zeros(architecture: SequenceArchitecture) -> Result<Self, SequenceError> {
        architecture.validate()?;
        let tensors = architecture
            .tensor_shapes()
            .into_iter()
            .map(|(name, shape)| (name, Tensor::zeros(shape)))
            .collect();
        Ok(Self {
            architecture,
            tensors,
        })
    }

    /// Check the architecture and that every tensor is present with its expected shape.
    pub fn validate(&self) -> Result<(), SequenceError> {
        self.architecture.validate()?;
        for (name, shape) in self.architecture.tensor_shapes() {
            let tensor = self.tensor(&name)?;
            if tensor.shape != shape || tensor.data.len() != shape.iter().product::<usize>() {
                return Err(SequenceError::ShapeMismatch {
                    name,
                    expected: shape,
                    actual: tensor.shape.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn tensor(&self, name: &str) -> Result<&Tensor, SequenceError> {
        self.tensors
            .get(name)
            .ok_or_else(|| SequenceError::MissingTensor(name.to_string()))
    }

    pub fn tensor_mut(&mut self, name: &str) -> Result<&mut Tensor, SequenceError> {
        self.tensors
            .get_mut(name)
            .ok_or_else(|| SequenceError::MissingTensor(name.to_string()))
    }

    pub fn parameter_count(&self) -> usize {
        self.tensors.values().map(Tensor::len).sum()
    }

    pub fn forward_trace(&self, row: &[f64]) -> Result<ForwardTrace, SequenceError> {
        if row.len() != self.architecture.input_dim {
            return Err(SequenceError::InputWidth {
                expected: self.architecture.input_dim,
                actual: row.len(),
            });
        }

        let embedded = self.linear(names::INPUT_WEIGHT, names::INPUT_BIAS, row)?;
        let mut blocks = Vec::with_capacity(self.architecture.num_layers);
        let mut h = embedded.clone();

        for layer in 0..self.architecture.num_layers {
            let value = self.linear(
                &names::layer(layer, names::VALUE_WEIGHT),
                &names::layer(layer, names::VALUE_BIAS),
                &h,
            )?;
            let attn = self.linear(
                &names::layer(layer, names::OUT_WEIGHT),
                &names::layer(layer, names::OUT_BIAS),
                &value,
            )?;
            let mid: Vec<f64> = h.iter().zip(&attn).map(|(a, b)| a + b).collect();

            let ff_pre = self.linear(
                &names::layer(layer, names::FF1_WEIGHT),
                &names::layer(layer, names::FF1_BIAS),
                &mid,
            )?;
            let ff_act: Vec<f64> = ff_pre.iter().map(|v| v.max(0.0)).collect();
            let ff_out = self.linear(
                &names::layer(layer, names::FF2_WEIGHT),
                &names::layer(layer, names::FF2_BIAS),
                &ff_act,
            )?;
            let output: Vec<f64> = mid.iter().zip(&ff_out).map(|(a, b)| a + b).collect();

            blocks.push(BlockTrace {
                input: std::mem::replace(&mut h, output.clone()),
                value,
                mid,
                ff_pre,
                ff_act,
                output,
            });
        }

        let prediction = self.linear(names::HEAD_WEIGHT, names::HEAD_BIAS, &h)?[0];
        Ok(ForwardTrace {
            input: row.to_vec(),
            embedded,
            blocks,
            prediction,
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<f64, SequenceError> {
        Ok(self.forward_trace(row)?.prediction)
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, SequenceError> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    /// `W x + b` with `W` of shape `[out, in]`.
    fn linear(&self, weight: &str, bias: &str, x: &[f64]) -> Result<Vec<f64>, SequenceError> {
        let w = self.tensor(weight)?;
        let b = self.tensor(bias)?;
        let cols = x.len();
        if w.shape.len() != 2 || w.shape[1] != cols || b.len() != w.shape[0] {
            return Err(SequenceError::ShapeMismatch {
                name: weight.to_string(),
                expected: vec![b.len(), cols],
                actual: w.shape.clone(),
            });
        }
        Ok(w.data
            .chunks_exact(cols)
            .zip(&b.data)
            .map(|(row, bias)| row.iter().zip(x).map(|(a, b)| a * b).sum::<f64>() + bias)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arch() -> SequenceArchitecture {
        SequenceArchitecture {
            input_dim: 3,
            d_model: 4,
            nhead: 2,
            num_layers: 2,
            dim_feedforward: 8,
        }
    }

    #[test]
    fn test_parameter_count() {
        let state = SequenceModelState::zeros(arch()).unwrap();
        let per_layer = 2 * (16 + 4) + (32 + 8) + (32 + 4);
        let expected = (12 + 4) + 2 * per_layer + (4 + 1);
        assert_eq!(state.parameter_count(), expected);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_nhead_must_divide_d_model() {
        let bad = SequenceArchitecture { nhead: 3, ..arch() };
        assert!(matches!(
            SequenceModelState::zeros(bad),
            Err(SequenceError::InvalidArchitecture(_))
        ));
    }

    #[test]
    fn test_zero_state_predicts_head_bias() {
        let mut state = SequenceModelState::zeros(arch()).unwrap();
        state.tensor_mut(names::HEAD_BIAS).unwrap().data[0] = 2.5;
        assert_eq!(state.predict_row(&[1.0, 2.0, 3.0]).unwrap(), 2.5);
    }

    #[test]
    fn test_residual_path_carries_embedding() {
        let mut state = SequenceModelState::zeros(arch()).unwrap();
        // embed feature 0 into hidden unit 0, read hidden unit 0 at the head
        state.tensor_mut(names::INPUT_WEIGHT).unwrap().data[0] = 1.0;
        state.tensor_mut(names::HEAD_WEIGHT).unwrap().data[0] = 2.0;
        let trace = state.forward_trace(&[1.5, 0.0, 0.0]).unwrap();
        assert_eq!(trace.blocks.len(), 2);
        assert_eq!(trace.last_hidden()[0], 1.5);
        assert_eq!(trace.prediction, 3.0);
    }

    #[test]
    fn test_wrong_input_width() {
        let state = SequenceModelState::zeros(arch()).unwrap();
        assert!(matches!(
            state.predict_row(&[1.0]),
            Err(SequenceError::InputWidth { expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn test_missing_tensor_fails_validation() {
        let mut state = SequenceModelState::zeros(arch()).unwrap();
        state.tensors.remove(names::HEAD_BIAS);
        assert_eq!(
            state.validate(),
            Err(SequenceError::MissingTensor(names::HEAD_BIAS.to_string()))
        );
    }
}
