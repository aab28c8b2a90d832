//! Action-space strategies.
//!
//! The environment family and masking flags select exactly one
//! [`ActionMode`]. It is resolved once, during configuration validation, and
//! turned into a boxed [`ActionSpace`] that the collector and update engine
//! call without further dispatch on configuration.

mod factorized;
mod hybrid;
mod masked;
mod unmasked;

use std::fmt;

use crate::config::{EnvType, LaunchPowerType, TrainingConfig};
use crate::distribution::Categorical;
use crate::error::{Result, TrainError};
use crate::model::{HeadGrad, HeadOutput, OutputGrad, PolicyOutput};
use crate::rng::PrngKey;
use crate::types::{Action, ActionMasks, Mask};

pub use factorized::FactorizedHeads;
pub use hybrid::HybridPathPower;
pub use masked::MaskedCategorical;
pub use unmasked::UnmaskedCategorical;

/// Sampling, scoring and differentiation of actions for one action layout.
pub trait ActionSpace: fmt::Debug + Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Samples an action and returns it with its log-probability under `output`.
    fn sample(
        &self,
        output: &PolicyOutput,
        masks: &ActionMasks,
        key: PrngKey,
    ) -> Result<(Action, f64)>;

    /// Log-probability of a stored action and the entropy of the distribution.
    fn log_prob_and_entropy(
        &self,
        output: &PolicyOutput,
        action: &Action,
        masks: &ActionMasks,
    ) -> Result<(f64, f64)>;

    /// Accumulates `d_log_prob * ∇log_prob + d_entropy * ∇entropy` with
    /// respect to the raw head outputs into `grad`.
    fn accumulate_grad(
        &self,
        output: &PolicyOutput,
        action: &Action,
        masks: &ActionMasks,
        d_log_prob: f64,
        d_entropy: f64,
        grad: &mut OutputGrad,
    ) -> Result<()>;

    /// Index into the value vector that scores `action`.
    fn value_index(&self, _action: &Action) -> Result<usize> {
        Ok(0)
    }
}

/// The action layout selected by the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionMode {
    /// Independent source / path / destination heads, each with its own mask.
    FactorizedHeads,
    /// One categorical head with one validity mask.
    MaskedCategorical,
    /// Categorical path action plus a Gaussian launch power per candidate path.
    HybridPathPower {
        codec: PathActionCodec,
        min_power: f64,
        max_power: f64,
    },
    /// One categorical head, no masking.
    UnmaskedCategorical,
}

impl ActionMode {
    /// Selects the mode for `config`, rejecting combinations no mode can score.
    pub fn resolve(config: &TrainingConfig) -> Result<Self> {
        let power_rl = config.launch_power_type == LaunchPowerType::Rl;
        if power_rl && config.env_type != EnvType::RsaGnModel {
            return Err(TrainError::UnsupportedActionMode(format!(
                "launch_power_type 'rl' requires env_type 'rsa_gn_model', got '{}'",
                config.env_type
            )));
        }
        if power_rl && config.action_masking {
            return Err(TrainError::UnsupportedActionMode(
                "launch_power_type 'rl' cannot be combined with action_masking".to_string(),
            ));
        }

        if config.env_type == EnvType::Vone {
            if !config.action_masking {
                return Err(TrainError::UnsupportedActionMode(
                    "env_type 'vone' requires action_masking".to_string(),
                ));
            }
            return Ok(ActionMode::FactorizedHeads);
        }
        if config.action_masking {
            return Ok(ActionMode::MaskedCategorical);
        }
        if power_rl {
            if config.k_paths == 0 || config.link_resources == 0 {
                return Err(TrainError::UnsupportedActionMode(
                    "hybrid power control needs k_paths and link_resources > 0".to_string(),
                ));
            }
            if !(config.min_power < config.max_power) {
                return Err(TrainError::UnsupportedActionMode(format!(
                    "empty launch power range [{}, {}]",
                    config.min_power, config.max_power
                )));
            }
            return Ok(ActionMode::HybridPathPower {
                codec: PathActionCodec::new(config.k_paths, config.link_resources),
                min_power: config.min_power,
                max_power: config.max_power,
            });
        }
        Ok(ActionMode::UnmaskedCategorical)
    }

    /// Builds the strategy object for this mode.
    pub fn build(self) -> Box<dyn ActionSpace> {
        match self {
            ActionMode::FactorizedHeads => Box::new(FactorizedHeads::new(3)),
            ActionMode::MaskedCategorical => Box::new(MaskedCategorical),
            ActionMode::HybridPathPower {
                codec,
                min_power,
                max_power,
            } => Box::new(HybridPathPower::new(codec, min_power, max_power)),
            ActionMode::UnmaskedCategorical => Box::new(UnmaskedCategorical),
        }
    }

    /// Whether the environment is expected to provide validity masks.
    pub fn uses_masks(&self) -> bool {
        matches!(
            self,
            ActionMode::FactorizedHeads | ActionMode::MaskedCategorical
        )
    }
}

/// Fixed-width encoding of a path action shared with the environment.
///
/// A path action `a` selects candidate path `a / slots_per_path` and slot
/// `a % slots_per_path`. Path indices past the last candidate are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathActionCodec {
    pub k_paths: usize,
    pub slots_per_path: usize,
}

impl PathActionCodec {
    pub fn new(k_paths: usize, slots_per_path: usize) -> Self {
        Self {
            k_paths,
            slots_per_path,
        }
    }

    /// Number of distinct path actions.
    pub fn num_actions(&self) -> usize {
        self.k_paths * self.slots_per_path
    }

    /// Splits a path action into `(path_index, slot_index)`.
    pub fn decode(&self, action: usize) -> (usize, usize) {
        let slots = self.slots_per_path.max(1);
        let path = (action / slots).min(self.k_paths.saturating_sub(1));
        (path, action % slots)
    }

    pub fn encode(&self, path_index: usize, slot_index: usize) -> usize {
        path_index * self.slots_per_path + slot_index
    }
}

/// Categorical distribution of head `index`, masked when `mask` is given.
fn categorical_head(
    output: &PolicyOutput,
    index: usize,
    mask: Option<&Mask>,
) -> Result<Categorical> {
    match output.head(index)? {
        HeadOutput::Categorical { logits } => match mask {
            Some(mask) => Categorical::masked(logits, mask),
            None => Ok(Categorical::new(logits)),
        },
        HeadOutput::Gaussian { .. } => Err(TrainError::Model(format!(
            "head {index} is Gaussian, expected categorical logits"
        ))),
    }
}

/// Mutable logits gradient of head `index`.
fn categorical_grad(grad: &mut OutputGrad, index: usize) -> Result<&mut Vec<f64>> {
    let available = grad.heads.len();
    match grad.heads.get_mut(index) {
        Some(HeadGrad::Categorical { logits }) => Ok(logits),
        Some(HeadGrad::Gaussian { .. }) => Err(TrainError::Model(format!(
            "head {index} gradient is Gaussian, expected categorical"
        ))),
        None => Err(TrainError::shape("head gradients", index + 1, available)),
    }
}

/// Discrete component `index` of a stored action.
fn discrete_at(action: &Action, index: usize) -> Result<usize> {
    action
        .discrete
        .get(index)
        .copied()
        .ok_or_else(|| TrainError::shape("discrete action components", index + 1, action.discrete.len()))
}

/// Requires exactly `expected` masks.
fn require_masks(masks: &ActionMasks, expected: usize) -> Result<()> {
    if masks.len() != expected {
        return Err(TrainError::shape("action masks", expected, masks.len()));
    }
    Ok(())
}
