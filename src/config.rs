//! Training configuration.
//!
//! [`TrainingConfig`] carries every hyperparameter consumed by the rollout,
//! advantage and update phases. Call [`TrainingConfig::validate`] before
//! training: it checks ranges, the minibatch layout identity and resolves the
//! action-space mode, so every configuration error is fatal up front.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::action_space::ActionMode;
use crate::error::{Result, TrainError};

/// Simulated network environment family.
///
/// Determines the action layout and validity masks the environment declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EnvType {
    /// Virtual optical network embedding: source node, path, destination node.
    Vone,
    Rsa,
    Rmsa,
    Rwa,
    #[cfg_attr(feature = "serde", serde(rename = "deeprmsa"))]
    DeepRmsa,
    RwaLightpathReuse,
    /// RSA with a Gaussian-noise physical model and per-path launch power.
    RsaGnModel,
    RmsaGnModel,
}

impl EnvType {
    /// Returns all environment types.
    pub fn all() -> [EnvType; 8] {
        [
            EnvType::Vone,
            EnvType::Rsa,
            EnvType::Rmsa,
            EnvType::Rwa,
            EnvType::DeepRmsa,
            EnvType::RwaLightpathReuse,
            EnvType::RsaGnModel,
            EnvType::RmsaGnModel,
        ]
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvType::Vone => "vone",
            EnvType::Rsa => "rsa",
            EnvType::Rmsa => "rmsa",
            EnvType::Rwa => "rwa",
            EnvType::DeepRmsa => "deeprmsa",
            EnvType::RwaLightpathReuse => "rwa_lightpath_reuse",
            EnvType::RsaGnModel => "rsa_gn_model",
            EnvType::RmsaGnModel => "rmsa_gn_model",
        }
    }
}

impl fmt::Display for EnvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvType {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        EnvType::all()
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| TrainError::UnsupportedActionMode(format!("unknown env_type '{s}'")))
    }
}

/// How launch power is chosen in physical-layer-aware environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum LaunchPowerType {
    #[default]
    Fixed,
    Tabular,
    Scaled,
    /// Launch power is an output of the policy (continuous head).
    Rl,
}

/// Hyperparameters for trajectory collection and PPO updates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainingConfig {
    // --- Optimizer ---
    /// Learning rate.
    pub learning_rate: f64,
    /// Global gradient-norm clip applied before each step.
    pub max_grad_norm: f64,
    pub adam_eps: f64,
    pub adam_beta1: f64,
    pub adam_beta2: f64,

    // --- Rollout ---
    /// Number of environment instances advanced in lock-step (batch size B).
    pub num_envs: usize,
    /// Steps collected per environment per iteration (rollout length L).
    pub rollout_length: usize,
    /// Number of learner iterations.
    pub num_updates: usize,
    /// When set, overrides `num_updates` with `total_timesteps / (L * B)`.
    pub total_timesteps: Option<usize>,
    /// Lock-step environment steps taken under the initial policy before training.
    pub warmup_steps: usize,

    // --- Update ---
    /// Passes over each trajectory.
    pub update_epochs: usize,
    pub num_minibatches: usize,
    pub minibatch_size: usize,

    // --- Objective ---
    /// Discount factor γ.
    pub gamma: f64,
    /// GAE λ.
    pub gae_lambda: f64,
    /// Clip ratio ε, also the value-clipping band.
    pub clip_eps: f64,
    pub vf_coef: f64,
    pub ent_coef: f64,

    // --- Environment / action space ---
    pub env_type: EnvType,
    pub action_masking: bool,
    pub launch_power_type: LaunchPowerType,
    /// Number of candidate paths per request.
    pub k_paths: usize,
    /// Spectral slots per link; the path action encodes `path * link_resources + slot`.
    pub link_resources: usize,
    /// Launch power range in physical units (dBm).
    pub min_power: f64,
    pub max_power: f64,

    pub seed: u64,
    /// Emit per-step and per-minibatch `tracing::debug!` events.
    pub debug: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 5e-4,
            max_grad_norm: 0.5,
            adam_eps: 1e-5,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            num_envs: 1,
            rollout_length: 150,
            num_updates: 1,
            total_timesteps: None,
            warmup_steps: 0,
            update_epochs: 10,
            num_minibatches: 1,
            minibatch_size: 150,
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_eps: 0.2,
            vf_coef: 0.5,
            ent_coef: 0.0,
            env_type: EnvType::Rsa,
            action_masking: false,
            launch_power_type: LaunchPowerType::Fixed,
            k_paths: 5,
            link_resources: 5,
            min_power: -2.0,
            max_power: 4.0,
            seed: 42,
            debug: false,
        }
    }
}

impl TrainingConfig {
    /// Creates a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total transitions per rollout (`L * B`), or `None` if it overflows.
    pub fn batch_size(&self) -> Option<usize> {
        self.rollout_length.checked_mul(self.num_envs)
    }

    /// Number of learner iterations, derived from `total_timesteps` when set.
    pub fn effective_num_updates(&self) -> usize {
        match (self.total_timesteps, self.batch_size()) {
            (Some(total), Some(batch)) if batch > 0 => total / batch,
            _ => self.num_updates,
        }
    }

    /// Resolves the action-space mode this configuration selects.
    pub fn action_mode(&self) -> Result<ActionMode> {
        ActionMode::resolve(self)
    }

    /// Checks that `minibatch_size * num_minibatches == rollout_length * num_envs`.
    pub fn check_minibatch_layout(&self) -> Result<()> {
        check_layout(
            self.minibatch_size,
            self.num_minibatches,
            self.rollout_length,
            self.num_envs,
        )
    }

    /// Validates every parameter and resolves the action mode.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: &str) -> Result<()> {
            Err(TrainError::InvalidConfig(msg.to_string()))
        }

        // negated comparisons so NaN is rejected too
        if !(self.learning_rate > 0.0) {
            return invalid("learning_rate must be positive");
        }
        if !(self.max_grad_norm > 0.0) {
            return invalid("max_grad_norm must be positive");
        }
        if self.num_envs == 0 {
            return invalid("num_envs must be positive");
        }
        if self.rollout_length == 0 {
            return invalid("rollout_length must be positive");
        }
        if self.update_epochs == 0 {
            return invalid("update_epochs must be positive");
        }
        if self.num_minibatches == 0 || self.minibatch_size == 0 {
            return invalid("num_minibatches and minibatch_size must be positive");
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return invalid("gamma must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.gae_lambda) {
            return invalid("gae_lambda must be in [0, 1]");
        }
        if !(self.clip_eps > 0.0) {
            return invalid("clip_eps must be positive");
        }
        if !(self.vf_coef >= 0.0) {
            return invalid("vf_coef must be non-negative");
        }
        if !(self.ent_coef >= 0.0) {
            return invalid("ent_coef must be non-negative");
        }
        self.check_minibatch_layout()?;
        self.action_mode()?;
        Ok(())
    }

    /// Sets `minibatch_size` to `rollout_length * num_envs / num_minibatches`.
    pub fn with_derived_minibatch_size(mut self) -> Self {
        if let (Some(batch), true) = (self.batch_size(), self.num_minibatches > 0) {
            self.minibatch_size = batch / self.num_minibatches;
        }
        self
    }

    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn num_envs(mut self, n: usize) -> Self {
        self.num_envs = n;
        self
    }

    pub fn rollout_length(mut self, n: usize) -> Self {
        self.rollout_length = n;
        self
    }

    pub fn num_updates(mut self, n: usize) -> Self {
        self.num_updates = n;
        self
    }

    pub fn update_epochs(mut self, n: usize) -> Self {
        self.update_epochs = n;
        self
    }

    pub fn num_minibatches(mut self, n: usize) -> Self {
        self.num_minibatches = n;
        self
    }

    pub fn minibatch_size(mut self, n: usize) -> Self {
        self.minibatch_size = n;
        self
    }

    pub fn gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn gae_lambda(mut self, lambda: f64) -> Self {
        self.gae_lambda = lambda;
        self
    }

    pub fn clip_eps(mut self, eps: f64) -> Self {
        self.clip_eps = eps;
        self
    }

    pub fn ent_coef(mut self, coef: f64) -> Self {
        self.ent_coef = coef;
        self
    }

    pub fn vf_coef(mut self, coef: f64) -> Self {
        self.vf_coef = coef;
        self
    }

    pub fn env_type(mut self, env_type: EnvType) -> Self {
        self.env_type = env_type;
        self
    }

    pub fn action_masking(mut self, enabled: bool) -> Self {
        self.action_masking = enabled;
        self
    }

    pub fn launch_power_type(mut self, kind: LaunchPowerType) -> Self {
        self.launch_power_type = kind;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }
}

/// Fails unless `minibatch_size * num_minibatches == rollout_length * num_envs`.
///
/// Either product overflowing `usize` counts as a mismatch.
pub(crate) fn check_layout(
    minibatch_size: usize,
    num_minibatches: usize,
    rollout_length: usize,
    num_envs: usize,
) -> Result<()> {
    match (
        minibatch_size.checked_mul(num_minibatches),
        rollout_length.checked_mul(num_envs),
    ) {
        (Some(tiled), Some(batch)) if tiled == batch => Ok(()),
        _ => Err(TrainError::MinibatchMismatch {
            minibatch_size,
            num_minibatches,
            rollout_length,
            num_envs,
        }),
    }
}

#[cfg(feature = "serde")]
impl TrainingConfig {
    /// Parses a configuration from JSON. Missing fields take default values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TrainError::InvalidConfig(e.to_string()))
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| TrainError::InvalidConfig(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_json_str(&text)
    }
}
