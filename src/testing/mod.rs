//! Test fixtures: a toy slot-allocation environment, a plain-`f64` MLP and
//! optimizers that run without libtorch.
//!
//! Each step places a request into one of `slots` slots. Placing into a free
//! slot earns +1, into an occupied one -1. A random occupied slot is released
//! with probability 0.3 per step, and the episode ends after `slots` steps.

mod mlp;
mod optim;

pub use mlp::Mlp;
pub use optim::{Adam, Sgd};

use rand::Rng;

use crate::action_space::{ActionSpace, PathActionCodec};
use crate::config::{EnvType, LaunchPowerType, TrainingConfig};
use crate::environment::{Environment, StepOutcome};
use crate::error::{Result, TrainError};
use crate::model::{HeadGrad, HeadOutput, HeadSpec, OutputGrad, PolicyOutput};
use crate::rng::PrngKey;
use crate::training::EnvBatch;
use crate::types::{Action, ActionMasks};

/// Action layout the environment declares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Layout {
    Single { masked: bool },
    /// Slot, a two-way modifier and a second slot, each with a mask.
    Factorized,
    /// Path action over `k_paths` copies of the slot range plus a launch power.
    Hybrid { k_paths: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotState {
    pub occupied: Vec<bool>,
    pub t: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    pub blocked: bool,
    pub utilisation: f64,
}

#[derive(Debug, Clone)]
pub struct SlotEnv {
    pub slots: usize,
    pub layout: Layout,
}

impl SlotEnv {
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            layout: Layout::Single { masked: true },
        }
    }

    pub fn with_layout(slots: usize, layout: Layout) -> Self {
        Self { slots, layout }
    }

    pub fn obs_dim(&self) -> usize {
        self.slots + 1
    }

    fn observe(&self, state: &SlotState) -> Vec<f64> {
        let mut obs: Vec<f64> = state
            .occupied
            .iter()
            .map(|&o| if o { 1.0 } else { 0.0 })
            .collect();
        obs.push(state.t as f64 / self.slots as f64);
        obs
    }

    fn free_mask(state: &SlotState) -> Vec<bool> {
        state.occupied.iter().map(|o| !o).collect()
    }

    fn chosen_slot(&self, action: &Action) -> Result<usize> {
        let a = action
            .primary()
            .ok_or_else(|| TrainError::Environment("empty action".to_string()))?;
        let slot = match self.layout {
            Layout::Hybrid { k_paths } => PathActionCodec::new(k_paths, self.slots).decode(a).1,
            _ => a,
        };
        if slot >= self.slots {
            return Err(TrainError::Environment(format!("slot {slot} out of range")));
        }
        Ok(slot)
    }
}

impl Environment for SlotEnv {
    type State = SlotState;
    type Observation = Vec<f64>;
    type Info = SlotInfo;

    fn reset(&self, _key: PrngKey) -> Result<(Vec<f64>, SlotState)> {
        if self.slots == 0 {
            return Err(TrainError::Environment("slot environment needs at least one slot".to_string()));
        }
        let state = SlotState {
            occupied: vec![false; self.slots],
            t: 0,
        };
        Ok((self.observe(&state), state))
    }

    fn step(
        &self,
        key: PrngKey,
        state: SlotState,
        action: &Action,
    ) -> Result<StepOutcome<SlotState, Vec<f64>, SlotInfo>> {
        let mut rng = key.into_rng();
        let mut state = state;
        let slot = self.chosen_slot(action)?;
        let blocked = state.occupied[slot];
        let mut reward = if blocked { -1.0 } else { 1.0 };
        if let Layout::Hybrid { .. } = self.layout {
            let power = action.continuous.first().copied().unwrap_or(0.0);
            reward -= 0.1 * (power - 1.0).abs();
        }
        state.occupied[slot] = true;
        state.t += 1;

        if rng.gen::<f64>() < 0.3 {
            let busy: Vec<usize> = (0..self.slots).filter(|&i| state.occupied[i]).collect();
            if !busy.is_empty() {
                let release = busy[rng.gen_range(0..busy.len())];
                state.occupied[release] = false;
            }
        }

        let utilisation =
            state.occupied.iter().filter(|o| **o).count() as f64 / self.slots as f64;
        let done = state.t >= self.slots;
        if done {
            state = SlotState {
                occupied: vec![false; self.slots],
                t: 0,
            };
        }
        Ok(StepOutcome {
            observation: self.observe(&state),
            state,
            reward,
            done,
            info: SlotInfo {
                blocked,
                utilisation,
            },
        })
    }

    fn action_masks(&self, state: &SlotState) -> ActionMasks {
        match self.layout {
            Layout::Single { masked: true } => ActionMasks::single(Self::free_mask(state)),
            Layout::Factorized => ActionMasks::from(vec![
                Self::free_mask(state),
                vec![true, true],
                Self::free_mask(state),
            ]),
            _ => ActionMasks::none(),
        }
    }
}

/// A small MLP matching the environment's action layout.
pub fn toy_model(env: &SlotEnv) -> Mlp {
    let (heads, value_dim) = match env.layout {
        Layout::Single { .. } => (vec![HeadSpec::Categorical(env.slots)], 1),
        Layout::Factorized => (
            vec![
                HeadSpec::Categorical(env.slots),
                HeadSpec::Categorical(2),
                HeadSpec::Categorical(env.slots),
            ],
            1,
        ),
        Layout::Hybrid { k_paths } => (
            vec![
                HeadSpec::Categorical(k_paths * env.slots),
                HeadSpec::Gaussian(k_paths),
            ],
            k_paths,
        ),
    };
    Mlp::new(env.obs_dim(), &[8], heads, value_dim)
}

/// Resets `lanes` environments with independent keys.
///
/// Panics if any reset fails, so a broken fixture cannot shrink the batch.
pub fn toy_batch(env: &SlotEnv, lanes: usize, key: PrngKey) -> EnvBatch<SlotState, Vec<f64>> {
    let mut states = Vec::with_capacity(lanes);
    let mut observations = Vec::with_capacity(lanes);
    for (lane, lane_key) in key.split_n(lanes).into_iter().enumerate() {
        let (obs, state) = env
            .reset(lane_key)
            .unwrap_or_else(|e| panic!("reset of lane {lane} failed: {e}"));
        observations.push(obs);
        states.push(state);
    }
    EnvBatch::new(states, observations).expect("lanes are aligned")
}

/// A valid configuration for `env` with a small rollout.
pub fn toy_config(env: &SlotEnv) -> TrainingConfig {
    let base = TrainingConfig::new()
        .rollout_length(8)
        .num_envs(2)
        .num_minibatches(2)
        .update_epochs(2)
        .learning_rate(1e-2)
        .with_derived_minibatch_size();
    match env.layout {
        Layout::Single { masked } => base.action_masking(masked),
        Layout::Factorized => base.env_type(EnvType::Vone).action_masking(true),
        Layout::Hybrid { k_paths } => TrainingConfig {
            k_paths,
            link_resources: env.slots,
            min_power: -2.0,
            max_power: 4.0,
            ..base
                .env_type(EnvType::RsaGnModel)
                .launch_power_type(LaunchPowerType::Rl)
        },
    }
}

/// Checks `space.accumulate_grad` against central differences of
/// `w_log_prob * log_prob + w_entropy * entropy`, entry by entry over every
/// head output.
pub fn assert_action_grad_matches(
    space: &dyn ActionSpace,
    output: &PolicyOutput,
    action: &Action,
    masks: &ActionMasks,
    w_log_prob: f64,
    w_entropy: f64,
) {
    let objective = |out: &PolicyOutput| {
        let (lp, h) = space
            .log_prob_and_entropy(out, action, masks)
            .expect("objective is defined");
        w_log_prob * lp + w_entropy * h
    };
    let mut grad = OutputGrad::zeros_like(output);
    space
        .accumulate_grad(output, action, masks, w_log_prob, w_entropy, &mut grad)
        .expect("gradient is defined");

    let h = 1e-6;
    for (i, head_grad) in grad.heads.iter().enumerate() {
        let fields: Vec<&[f64]> = match head_grad {
            HeadGrad::Categorical { logits } => vec![logits.as_slice()],
            HeadGrad::Gaussian { mean, log_std } => vec![mean.as_slice(), log_std.as_slice()],
        };
        for (f, field) in fields.iter().enumerate() {
            for (j, &analytic) in field.iter().enumerate() {
                let shifted = |delta: f64| {
                    let mut out = output.clone();
                    let entry = match &mut out.heads[i] {
                        HeadOutput::Categorical { logits } => &mut logits[j],
                        HeadOutput::Gaussian { mean, .. } if f == 0 => &mut mean[j],
                        HeadOutput::Gaussian { log_std, .. } => &mut log_std[j],
                    };
                    *entry += delta;
                    objective(&out)
                };
                let numeric = (shifted(h) - shifted(-h)) / (2.0 * h);
                assert!(
                    (numeric - analytic).abs() < 1e-6,
                    "{} head {i} field {f} entry {j}: numeric {numeric} vs analytic {analytic}",
                    space.name()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toy_batch_resets_every_lane() {
        let batch = toy_batch(&SlotEnv::new(3), 5, PrngKey::from_seed(0));
        assert_eq!(batch.len(), 5);
        assert!(batch.states.iter().all(|s| s.t == 0));
    }

    #[test]
    #[should_panic(expected = "reset of lane 0 failed")]
    fn toy_batch_surfaces_reset_errors() {
        toy_batch(&SlotEnv::new(0), 2, PrngKey::from_seed(0));
    }
}
