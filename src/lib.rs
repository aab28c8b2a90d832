//! netrl - on-policy actor-critic training for network resource allocation
//!
//! Collects fixed-length lock-step rollouts from a batch of simulated network
//! environments, estimates advantages with GAE and updates a policy/value
//! model with the PPO clipped surrogate objective. Factorized, masked and
//! hybrid discrete/continuous action spaces are supported.
//!
//! The `rl-nn` feature adds a libtorch-backed model and Adam optimizer
//! (`tch`); the `serde` feature adds JSON configuration loading.

pub mod action_space;
pub mod config;
pub mod distribution;
pub mod environment;
pub mod error;
pub mod model;
pub mod rng;
pub mod training;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use action_space::{ActionMode, ActionSpace, PathActionCodec};
pub use config::{EnvType, LaunchPowerType, TrainingConfig};
pub use environment::{Environment, StepOutcome};
pub use error::{Result, TrainError};
pub use model::{Params, PolicyOutput, PolicyValueModel};
pub use rng::PrngKey;
pub use training::{Learner, LossInfo};
pub use types::{Action, ActionMasks, Mask};

/// Identifier attached to one training run.
pub type RunId = String;

/// Generates a new unique run identifier (UUID v4).
pub fn generate_run_id() -> RunId {
    uuid::Uuid::new_v4().to_string()
}
