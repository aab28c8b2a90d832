//! Small actor-critic MLP with hand-written backpropagation, for tests.
//!
//! Separate actor and critic trunks of tanh layers. The actor's linear output
//! is split into the declared heads; Gaussian heads use a learned,
//! state-independent `log_std` per candidate.

use crate::distribution::standard_normal;
use crate::error::{Result, TrainError};
use crate::model::{
    HeadGrad, HeadOutput, HeadSpec, OutputGrad, Params, PolicyOutput, PolicyValueModel,
};
use crate::rng::PrngKey;

#[derive(Debug, Clone, Copy)]
struct Layer {
    offset: usize,
    fan_in: usize,
    fan_out: usize,
}

impl Layer {
    fn weights_len(&self) -> usize {
        self.fan_in * self.fan_out
    }

    fn len(&self) -> usize {
        self.weights_len() + self.fan_out
    }

    fn bias_offset(&self) -> usize {
        self.offset + self.weights_len()
    }
}

/// MLP actor-critic over flat `f64` observations.
///
/// Architecture: `obs_dim → hidden... → Σ head widths` (actor) and
/// `obs_dim → hidden... → value_dim` (critic), tanh activations.
#[derive(Debug, Clone)]
pub struct Mlp {
    obs_dim: usize,
    heads: Vec<HeadSpec>,
    value_dim: usize,
    actor: Vec<Layer>,
    critic: Vec<Layer>,
    /// Offset of each Gaussian head's `log_std` block, by head index.
    log_std_offsets: Vec<Option<usize>>,
    num_params: usize,
}

impl Mlp {
    /// Initial `log_std` for Gaussian heads.
    pub const INIT_LOG_STD: f64 = -0.5;

    /// Creates a model description; parameters come from [`PolicyValueModel::init`].
    pub fn new(obs_dim: usize, hidden: &[usize], heads: Vec<HeadSpec>, value_dim: usize) -> Self {
        let actor_out: usize = heads.iter().map(HeadSpec::width).sum();
        let mut offset = 0;
        let actor = Self::layout(obs_dim, hidden, actor_out, &mut offset);
        let critic = Self::layout(obs_dim, hidden, value_dim, &mut offset);

        let mut log_std_offsets = Vec::with_capacity(heads.len());
        for head in &heads {
            match head {
                HeadSpec::Gaussian(k) => {
                    log_std_offsets.push(Some(offset));
                    offset += k;
                }
                HeadSpec::Categorical(_) => log_std_offsets.push(None),
            }
        }

        Self {
            obs_dim,
            heads,
            value_dim,
            actor,
            critic,
            log_std_offsets,
            num_params: offset,
        }
    }

    fn layout(input: usize, hidden: &[usize], output: usize, offset: &mut usize) -> Vec<Layer> {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut fan_in = input;
        for &fan_out in hidden.iter().chain(std::iter::once(&output)) {
            let layer = Layer {
                offset: *offset,
                fan_in,
                fan_out,
            };
            *offset += layer.len();
            layers.push(layer);
            fan_in = fan_out;
        }
        layers
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.num_params
    }

    pub fn heads(&self) -> &[HeadSpec] {
        &self.heads
    }

    /// Post-activations of every layer, starting with the input itself.
    fn trunk_forward(params: &[f64], layers: &[Layer], input: &[f64]) -> Vec<Vec<f64>> {
        let mut acts = Vec::with_capacity(layers.len() + 1);
        acts.push(input.to_vec());
        for (i, layer) in layers.iter().enumerate() {
            let x = &acts[i];
            let w = &params[layer.offset..layer.bias_offset()];
            let b = &params[layer.bias_offset()..layer.offset + layer.len()];
            let is_last = i + 1 == layers.len();
            let z: Vec<f64> = (0..layer.fan_out)
                .map(|j| {
                    let pre = b[j]
                        + (0..layer.fan_in)
                            .map(|k| x[k] * w[k * layer.fan_out + j])
                            .sum::<f64>();
                    if is_last {
                        pre
                    } else {
                        pre.tanh()
                    }
                })
                .collect();
            acts.push(z);
        }
        acts
    }

    fn trunk_backward(
        params: &[f64],
        layers: &[Layer],
        acts: &[Vec<f64>],
        d_out: &[f64],
        grads: &mut [f64],
    ) {
        let mut delta = d_out.to_vec();
        for i in (0..layers.len()).rev() {
            let layer = layers[i];
            if i + 1 != layers.len() {
                // d tanh(z) / dz = 1 - tanh(z)^2
                for (d, a) in delta.iter_mut().zip(&acts[i + 1]) {
                    *d *= 1.0 - a * a;
                }
            }
            let a_prev = &acts[i];
            for k in 0..layer.fan_in {
                for j in 0..layer.fan_out {
                    grads[layer.offset + k * layer.fan_out + j] += a_prev[k] * delta[j];
                }
            }
            for j in 0..layer.fan_out {
                grads[layer.bias_offset() + j] += delta[j];
            }
            if i > 0 {
                let w = &params[layer.offset..layer.bias_offset()];
                delta = (0..layer.fan_in)
                    .map(|k| {
                        (0..layer.fan_out)
                            .map(|j| w[k * layer.fan_out + j] * delta[j])
                            .sum()
                    })
                    .collect();
            }
        }
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
}

impl PolicyValueModel for Mlp {
    type Observation = Vec<f64>;

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
            for w in &mut values[layer.offset..layer.bias_offset()] {
                *w = standard_normal(&mut rng) * std;
            }
        }
        for (head, offset) in self.heads.iter().zip(&self.log_std_offsets) {
            if let Some(offset) = offset {
                let k = head.width();
                values[*offset..*offset + k].fill(Self::INIT_LOG_STD);
            }
        }
        Params::from_vec(values)
    }

    fn apply(&self, params: &Params, obs: &Vec<f64>) -> Result<PolicyOutput> {
        self.check(params, obs)?;
        let p = params.as_slice();
        let actor_acts = Self::trunk_forward(p, &self.actor, obs);
        let critic_acts = Self::trunk_forward(p, &self.critic, obs);
        let actor_out = actor_acts.last().map(Vec::as_slice).unwrap_or(&[]);

        let mut cursor = 0;
        let heads = self
            .heads
            .iter()
            .zip(&self.log_std_offsets)
            .map(|(head, log_std_offset)| {
                let width = head.width();
                let slice = actor_out[cursor..cursor + width].to_vec();
                cursor += width;
                match (head, log_std_offset) {
                    (HeadSpec::Gaussian(_), Some(off)) => HeadOutput::Gaussian {
                        mean: slice,
                        log_std: p[*off..*off + width].to_vec(),
                    },
                    _ => HeadOutput::Categorical { logits: slice },
                }
            })
            .collect();

        Ok(PolicyOutput {
            heads,
            value: critic_acts.last().cloned().unwrap_or_default(),
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
        let p = params.as_slice();

        let mut d_actor = Vec::with_capacity(self.actor.last().map_or(0, |l| l.fan_out));
        for ((spec, grad), log_std_offset) in self
            .heads
            .iter()
            .zip(&output_grad.heads)
            .zip(&self.log_std_offsets)
        {
            match (grad, log_std_offset) {
                (HeadGrad::Categorical { logits }, None) => d_actor.extend_from_slice(logits),
                (HeadGrad::Gaussian { mean, log_std }, Some(off)) => {
                    d_actor.extend_from_slice(mean);
                    for (g, d) in grads[*off..*off + spec.width()].iter_mut().zip(log_std) {
                        *g += d;
                    }
                }
                _ => {
                    return Err(TrainError::Model(
                        "head gradient kind does not match head layout".to_string(),
                    ))
                }
            }
        }

        let actor_acts = Self::trunk_forward(p, &self.actor, obs);
        Self::trunk_backward(p, &self.actor, &actor_acts, &d_actor, grads);
        let critic_acts = Self::trunk_forward(p, &self.critic, obs);
        Self::trunk_backward(p, &self.critic, &critic_acts, &output_grad.value, grads);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Mlp {
        Mlp::new(
            3,
            &[5, 4],
            vec![HeadSpec::Categorical(4), HeadSpec::Gaussian(2)],
            2,
        )
    }

    /// A fixed linear functional of every output.
    fn functional(out: &PolicyOutput) -> f64 {
        let mut s = 0.0;
        for (h, head) in out.heads.iter().enumerate() {
            match head {
                HeadOutput::Categorical { logits } => {
                    s += logits
                        .iter()
                        .enumerate()
                        .map(|(i, l)| l * (i as f64 + 1.0 + h as f64))
                        .sum::<f64>()
                }
                HeadOutput::Gaussian { mean, log_std } => {
                    s += mean.iter().map(|m| 0.7 * m).sum::<f64>();
                    s += log_std.iter().map(|l| -0.3 * l).sum::<f64>();
                }
            }
        }
        s + out.value.iter().enumerate().map(|(i, v)| v * (2.0 - i as f64)).sum::<f64>()
    }

    fn functional_grad(out: &PolicyOutput) -> OutputGrad {
        let mut g = OutputGrad::zeros_like(out);
        for (h, head) in g.heads.iter_mut().enumerate() {
            match head {
                HeadGrad::Categorical { logits } => {
                    for (i, l) in logits.iter_mut().enumerate() {
                        *l = i as f64 + 1.0 + h as f64;
                    }
                }
                HeadGrad::Gaussian { mean, log_std } => {
                    mean.iter_mut().for_each(|m| *m = 0.7);
                    log_std.iter_mut().for_each(|l| *l = -0.3);
                }
            }
        }
        for (i, v) in g.value.iter_mut().enumerate() {
            *v = 2.0 - i as f64;
        }
        g
    }

    #[test]
    fn forward_shapes() {
        let m = model();
        let params = m.init(PrngKey::from_seed(0));
        assert_eq!(params.len(), m.num_params());
        let out = m.apply(&params, &vec![0.1, -0.2, 0.3]).unwrap();
        assert_eq!(out.heads.len(), 2);
        assert_eq!(out.heads[0].width(), 4);
        assert_eq!(out.heads[1].width(), 2);
        assert_eq!(out.value.len(), 2);
        match &out.heads[1] {
            HeadOutput::Gaussian { log_std, .. } => {
                assert!(log_std.iter().all(|l| *l == Mlp::INIT_LOG_STD))
            }
            other => panic!("unexpected head {other:?}"),
        }
    }

    #[test]
    fn wrong_observation_length_is_rejected() {
        let m = model();
        let params = m.init(PrngKey::from_seed(0));
        assert!(matches!(
            m.apply(&params, &vec![0.0; 2]),
            Err(TrainError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn backward_matches_finite_differences() {
        let m = model();
        let params = m.init(PrngKey::from_seed(9));
        let obs = vec![0.4, -0.7, 0.2];
        let out = m.apply(&params, &obs).unwrap();

        let mut grads = params.zeros_like();
        m.backward(&params, &obs, &functional_grad(&out), &mut grads).unwrap();

        let h = 1e-6;
        for i in (0..params.len()).step_by(7) {
            let mut plus = params.as_slice().to_vec();
            plus[i] += h;
            let mut minus = params.as_slice().to_vec();
            minus[i] -= h;
            let f_plus = functional(&m.apply(&Params::from_vec(plus), &obs).unwrap());
            let f_minus = functional(&m.apply(&Params::from_vec(minus), &obs).unwrap());
            let numeric = (f_plus - f_minus) / (2.0 * h);
            assert!(
                (numeric - grads[i]).abs() < 1e-5,
                "param {i}: numeric {numeric} vs analytic {}",
                grads[i]
            );
        }
    }

    #[test]
    fn init_is_deterministic() {
        let m = model();
        assert_eq!(m.init(PrngKey::from_seed(4)), m.init(PrngKey::from_seed(4)));
        assert_ne!(m.init(PrngKey::from_seed(4)), m.init(PrngKey::from_seed(5)));
    }
}
