//! Policy/value model seam.
//!
//! The trainer treats the model as an opaque differentiable function:
//! [`PolicyValueModel::apply`] maps parameters and an observation to a
//! factorized action distribution plus value estimate(s), and
//! [`PolicyValueModel::backward`] pulls a gradient on those outputs back to
//! the parameters.
//!
//! With the `rl-nn` feature, [`TchPolicyValue`] and [`TchAdam`] provide a
//! libtorch-backed model and optimizer.

#[cfg(feature = "rl-nn")]
pub mod torch;

use std::sync::Arc;

use crate::error::{Result, TrainError};
use crate::rng::PrngKey;

#[cfg(feature = "rl-nn")]
pub use torch::{TchAdam, TchPolicyValue};

/// An immutable snapshot of model parameters.
///
/// Cloning is cheap and shares storage. Updates never mutate a snapshot;
/// optimizers return a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Params(Arc<[f64]>);

impl Params {
    pub fn from_vec(values: Vec<f64>) -> Self {
        Self(values.into())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zeroed gradient buffer with the same length.
    pub fn zeros_like(&self) -> Vec<f64> {
        vec![0.0; self.0.len()]
    }
}

/// Declared layout of one action head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadSpec {
    /// Categorical head over `n` options.
    Categorical(usize),
    /// `k` independent Gaussian candidates.
    Gaussian(usize),
}

impl HeadSpec {
    pub fn width(&self) -> usize {
        match *self {
            HeadSpec::Categorical(n) | HeadSpec::Gaussian(n) => n,
        }
    }
}

/// Raw parameters of one action head, before masking.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadOutput {
    /// Unnormalized log-probabilities over the head's options.
    Categorical { logits: Vec<f64> },
    /// Independent normals, one per candidate.
    Gaussian { mean: Vec<f64>, log_std: Vec<f64> },
}

impl HeadOutput {
    /// Number of options (categorical) or candidates (Gaussian).
    pub fn width(&self) -> usize {
        match self {
            HeadOutput::Categorical { logits } => logits.len(),
            HeadOutput::Gaussian { mean, .. } => mean.len(),
        }
    }

    fn zero_grad(&self) -> HeadGrad {
        match self {
            HeadOutput::Categorical { logits } => HeadGrad::Categorical {
                logits: vec![0.0; logits.len()],
            },
            HeadOutput::Gaussian { mean, log_std } => HeadGrad::Gaussian {
                mean: vec![0.0; mean.len()],
                log_std: vec![0.0; log_std.len()],
            },
        }
    }
}

/// Distribution descriptor and value estimate for one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutput {
    pub heads: Vec<HeadOutput>,
    /// One value, or one per candidate (e.g. per path).
    pub value: Vec<f64>,
}

impl PolicyOutput {
    /// Returns the head at `i` or a shape error.
    pub fn head(&self, i: usize) -> Result<&HeadOutput> {
        self.heads
            .get(i)
            .ok_or_else(|| TrainError::shape("policy heads", i + 1, self.heads.len()))
    }

    /// Returns the value at `index` or a shape error.
    pub fn value_at(&self, index: usize) -> Result<f64> {
        self.value
            .get(index)
            .copied()
            .ok_or_else(|| TrainError::shape("value estimates", index + 1, self.value.len()))
    }
}

/// Gradient of a scalar loss with respect to one head's raw outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadGrad {
    Categorical { logits: Vec<f64> },
    Gaussian { mean: Vec<f64>, log_std: Vec<f64> },
}

/// Gradient of a scalar loss with respect to a [`PolicyOutput`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutputGrad {
    pub heads: Vec<HeadGrad>,
    pub value: Vec<f64>,
}

impl OutputGrad {
    /// A zero gradient shaped like `output`.
    pub fn zeros_like(output: &PolicyOutput) -> Self {
        Self {
            heads: output.heads.iter().map(HeadOutput::zero_grad).collect(),
            value: vec![0.0; output.value.len()],
        }
    }
}

/// A differentiable actor-critic function approximator.
pub trait PolicyValueModel {
    type Observation;

    /// Initial parameters drawn with `key`.
    fn init(&self, key: PrngKey) -> Params;

    /// Forward pass.
    fn apply(&self, params: &Params, obs: &Self::Observation) -> Result<PolicyOutput>;

    /// Vector-Jacobian product: accumulates `d(loss)/d(params)` into `grads`
    /// given `d(loss)/d(outputs)` for the forward pass at `obs`.
    fn backward(
        &self,
        params: &Params,
        obs: &Self::Observation,
        output_grad: &OutputGrad,
        grads: &mut [f64],
    ) -> Result<()>;
}

/// A stateful update rule mapping `(params, grads)` to new parameters.
///
/// Implementations clip `grads` to their configured global norm before
/// stepping and return a fresh snapshot.
pub trait Optimizer {
    fn step(&mut self, params: &Params, grads: &[f64]) -> Result<Params>;
}
