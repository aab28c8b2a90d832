//! Libtorch-backed actor-critic and Adam, behind the `rl-nn` feature.
//!
//! Parameters keep travelling as flat [`Params`] snapshots. The forward pass
//! slices weight and bias views out of one flat tensor, so
//! [`PolicyValueModel::backward`] is a single autograd vector-Jacobian
//! product over that tensor.

use tch::{nn, nn::OptimizerConfig, Device, Kind, Tensor};

use crate::config::TrainingConfig;
use crate::distribution::standard_normal;
use crate::error::{Result, TrainError};
use crate::rng::PrngKey;

use super::{
    HeadGrad, HeadOutput, HeadSpec, Optimizer, OutputGrad, Params, PolicyOutput, PolicyValueModel,
};

fn model_err(e: tch::TchError) -> TrainError {
    TrainError::Model(e.to_string())
}

/// Copies a tensor back into host `f64`s.
fn to_vec(t: &Tensor) -> Result<Vec<f64>> {
    let host = t.detach().to_device(Device::Cpu).to_kind(Kind::Double);
    Vec::<f64>::try_from(&host).map_err(model_err)
}

#[derive(Debug, Clone, Copy)]
struct Layer {
    offset: i64,
    fan_in: i64,
    fan_out: i64,
}

impl Layer {
    fn len(&self) -> i64 {
        self.fan_in * self.fan_out + self.fan_out
    }

    /// Weight `[fan_out, fan_in]` and bias `[fan_out]` views into `flat`.
    fn views(&self, flat: &Tensor) -> (Tensor, Tensor) {
        let weights = self.fan_in * self.fan_out;
        let w = flat
            .narrow(0, self.offset, weights)
            .view([self.fan_out, self.fan_in]);
        let b = flat.narrow(0, self.offset + weights, self.fan_out);
        (w, b)
    }
}

/// Tanh MLP actor-critic evaluated with libtorch.
///
/// Architecture matches `nn::seq()` of `nn::linear` layers: separate actor
/// (`obs_dim → hidden... → Σ head widths`) and critic
/// (`obs_dim → hidden... → value_dim`) trunks, plus one learned `log_std`
/// per Gaussian candidate.
#[derive(Debug, Clone)]
pub struct TchPolicyValue {
    obs_dim: usize,
    heads: Vec<HeadSpec>,
    value_dim: usize,
    actor: Vec<Layer>,
    critic: Vec<Layer>,
    log_std_offset: i64,
    num_log_std: i64,
    num_params: usize,
    device: Device,
}

impl TchPolicyValue {
    /// Initial `log_std` for Gaussian heads.
    pub const INIT_LOG_STD: f64 = -0.5;

    pub fn new(
        obs_dim: usize,
        hidden: &[usize],
        heads: Vec<HeadSpec>,
        value_dim: usize,
        device: Device,
    ) -> Self {
        let actor_out: usize = heads.iter().map(HeadSpec::width).sum();
        let num_log_std: usize = heads
            .iter()
            .filter_map(|h| match h {
                HeadSpec::Gaussian(k) => Some(*k),
                HeadSpec::Categorical(_) => None,
            })
            .sum();
        let mut offset = 0;
        let actor = Self::layout(obs_dim, hidden, actor_out, &mut offset);
        let critic = Self::layout(obs_dim, hidden, value_dim, &mut offset);
        let log_std_offset = offset;
        let num_params = offset as usize + num_log_std;

        Self {
            obs_dim,
            heads,
            value_dim,
            actor,
            critic,
            log_std_offset,
            num_log_std: num_log_std as i64,
            num_params,
            device,
        }
    }

    fn layout(input: usize, hidden: &[usize], output: usize, offset: &mut i64) -> Vec<Layer> {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut fan_in = input as i64;
        for &fan_out in hidden.iter().chain(std::iter::once(&output)) {
            let layer = Layer {
                offset: *offset,
                fan_in,
                fan_out: fan_out as i64,
            };
            *offset += layer.len();
            layers.push(layer);
            fan_in = fan_out as i64;
        }
        layers
    }

    pub fn num_params(&self) -> usize {
        self.num_params
    }

    pub fn heads(&self) -> &[HeadSpec] {
        &self.heads
    }

    fn trunk(flat: &Tensor, layers: &[Layer], input: &Tensor) -> Tensor {
        let mut x = input.shallow_clone();
        for (i, layer) in layers.iter().enumerate() {
            let (w, b) = layer.views(flat);
            x = w.mv(&x) + b;
            if i + 1 < layers.len() {
                x = x.tanh();
            }
        }
        x
    }

    /// Actor output, value estimates and `log_std` block for one observation.
    fn forward(&self, flat: &Tensor, obs: &Tensor) -> (Tensor, Tensor, Tensor) {
        let actor = Self::trunk(flat, &self.actor, obs);
        let value = Self::trunk(flat, &self.critic, obs);
        let log_std = flat.narrow(0, self.log_std_offset, self.num_log_std);
        (actor, value, log_std)
    }

    fn check(&self, params: &Params, obs: &[f64]) -> Result<()> {
        if params.len() != self.num_params {
            return Err(TrainError::shape("model parameters", self.num_params, params.len()));
        }
        if obs.len() != self.obs_dim {
            return Err(TrainError::shape("observation", self.obs_dim, obs.len()));
        }
        Ok(())
    }

    fn tensor(&self, values: &[f64]) -> Tensor {
        Tensor::from_slice(values).to_device(self.device)
    }
}

impl PolicyValueModel for TchPolicyValue {
    type Observation = Vec<f64>;

    /// Glorot-normal weights drawn from `key`, so initialisation follows the
    /// key discipline rather than libtorch's global generator.
    fn init(&self, key: PrngKey) -> Params {
        let mut rng = key.into_rng();
        let mut values = vec![0.0; self.num_params];
        let last_actor = self.actor.len() - 1;
        for (i, layer) in self.actor.iter().chain(self.critic.iter()).enumerate() {
            let mut std = (2.0 / (layer.fan_in + layer.fan_out) as f64).sqrt();
            if i == last_actor {
                // near-uniform initial policy
                std *= 0.01;
            }
            let start = layer.offset as usize;
            let end = start + (layer.fan_in * layer.fan_out) as usize;
            for w in &mut values[start..end] {
                *w = standard_normal(&mut rng) * std;
            }
        }
        values[self.log_std_offset as usize..].fill(Self::INIT_LOG_STD);
        Params::from_vec(values)
    }

    fn apply(&self, params: &Params, obs: &Vec<f64>) -> Result<PolicyOutput> {
        self.check(params, obs)?;
        let (actor, value, log_std) = tch::no_grad(|| {
            let flat = self.tensor(params.as_slice());
            self.forward(&flat, &self.tensor(obs))
        });
        let actor = to_vec(&actor)?;
        let log_std = to_vec(&log_std)?;

        let mut cursor = 0;
        let mut log_std_cursor = 0;
        let heads = self
            .heads
            .iter()
            .map(|head| {
                let width = head.width();
                let slice = actor[cursor..cursor + width].to_vec();
                cursor += width;
                match head {
                    HeadSpec::Categorical(_) => HeadOutput::Categorical { logits: slice },
                    HeadSpec::Gaussian(_) => {
                        let std_block = log_std[log_std_cursor..log_std_cursor + width].to_vec();
                        log_std_cursor += width;
                        HeadOutput::Gaussian {
                            mean: slice,
                            log_std: std_block,
                        }
                    }
                }
            })
            .collect();

        Ok(PolicyOutput {
            heads,
            value: to_vec(&value)?,
        })
    }

    fn backward(
        &self,
        params: &Params,
        obs: &Vec<f64>,
        output_grad: &OutputGrad,
        grads: &mut [f64],
    ) -> Result<()> {
        self.check(params, obs)?;
        if grads.len() != self.num_params {
            return Err(TrainError::shape("gradient buffer", self.num_params, grads.len()));
        }
        if output_grad.heads.len() != self.heads.len() {
            return Err(TrainError::shape(
                "head gradients",
                self.heads.len(),
                output_grad.heads.len(),
            ));
        }
        if output_grad.value.len() != self.value_dim {
            return Err(TrainError::shape(
                "value gradient",
                self.value_dim,
                output_grad.value.len(),
            ));
        }

        let mut d_actor = Vec::new();
        let mut d_log_std = Vec::with_capacity(self.num_log_std as usize);
        for (spec, grad) in self.heads.iter().zip(&output_grad.heads) {
            match (spec, grad) {
                (HeadSpec::Categorical(_), HeadGrad::Categorical { logits }) => {
                    d_actor.extend_from_slice(logits)
                }
                (HeadSpec::Gaussian(_), HeadGrad::Gaussian { mean, log_std }) => {
                    d_actor.extend_from_slice(mean);
                    d_log_std.extend_from_slice(log_std);
                }
                _ => {
                    return Err(TrainError::Model(
                        "head gradient kind does not match head layout".to_string(),
                    ))
                }
            }
        }

        let flat = self.tensor(params.as_slice()).set_requires_grad(true);
        let (actor, value, log_std) = self.forward(&flat, &self.tensor(obs));
        let surrogate = (actor * self.tensor(&d_actor)).sum(Kind::Double)
            + (value * self.tensor(&output_grad.value)).sum(Kind::Double)
            + (log_std * self.tensor(&d_log_std)).sum(Kind::Double);
        surrogate.backward();

        for (acc, g) in grads.iter_mut().zip(to_vec(&flat.grad())?) {
            *acc += g;
        }
        Ok(())
    }
}

struct AdamState {
    _vs: nn::VarStore,
    flat: Tensor,
    len: usize,
    opt: nn::Optimizer,
}

/// `nn::Adam` over a single flat variable holding the parameter snapshot.
///
/// The variable store is built on the first step and rebuilt if the parameter
/// count changes. Each step loads the snapshot, backpropagates
/// `sum(flat * grads)` so the variable's gradient equals `grads`, clips it to
/// `max_grad_norm` and steps.
pub struct TchAdam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub max_grad_norm: f64,
    state: Option<AdamState>,
    steps: u64,
}

impl std::fmt::Debug for TchAdam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TchAdam")
            .field("learning_rate", &self.learning_rate)
            .field("beta1", &self.beta1)
            .field("beta2", &self.beta2)
            .field("eps", &self.eps)
            .field("max_grad_norm", &self.max_grad_norm)
            .field("steps", &self.steps)
            .finish()
    }
}

impl TchAdam {
    pub fn new(learning_rate: f64, max_grad_norm: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            max_grad_norm,
            state: None,
            steps: 0,
        }
    }

    /// Builds an optimizer from the learning rate, betas, eps and clip norm in `config`.
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            beta1: config.adam_beta1,
            beta2: config.adam_beta2,
            eps: config.adam_eps,
            ..Self::new(config.learning_rate, config.max_grad_norm)
        }
    }

    /// Number of steps taken since the variable store was last built.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn build(&self, len: usize) -> Result<AdamState> {
        let mut vs = nn::VarStore::new(Device::Cpu);
        let _ = vs.root().zeros("params", &[len as i64]);
        vs.double();
        let flat = vs
            .variables()
            .remove("params")
            .ok_or_else(|| TrainError::Model("optimizer variable missing".to_string()))?;
        let opt = nn::Adam {
            beta1: self.beta1,
            beta2: self.beta2,
            wd: 0.0,
            eps: self.eps,
            amsgrad: false,
        }
        .build(&vs, self.learning_rate)
        .map_err(model_err)?;
        Ok(AdamState {
            _vs: vs,
            flat,
            len,
            opt,
        })
    }
}

impl Optimizer for TchAdam {
    fn step(&mut self, params: &Params, grads: &[f64]) -> Result<Params> {
        if params.len() != grads.len() {
            return Err(TrainError::shape("gradient", params.len(), grads.len()));
        }
        let state = match self.state.take() {
            Some(state) if state.len == params.len() => state,
            _ => {
                self.steps = 0;
                self.build(params.len())?
            }
        };
        let state = self.state.insert(state);

        let snapshot = Tensor::from_slice(params.as_slice());
        tch::no_grad(|| state.flat.shallow_clone().copy_(&snapshot));
        let surrogate = (&state.flat * Tensor::from_slice(grads)).sum(Kind::Double);
        state
            .opt
            .backward_step_clip_norm(&surrogate, self.max_grad_norm);
        self.steps += 1;

        Ok(Params::from_vec(to_vec(&state.flat)?))
    }
}
