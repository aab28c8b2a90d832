//! On-policy actor-critic training.
//!
//! Provides the trajectory buffer, rollout collection, GAE, the PPO update
//! engine and the learner loop that chains them.

pub mod buffer;
pub mod gae;
pub mod learner;
pub mod loss;
pub mod metrics;
pub mod minibatch;
pub mod ppo;
pub mod rollout;

pub use buffer::{Trajectory, Transition};
pub use gae::{compute_gae, AdvantageEstimator, Advantages};
pub use learner::{Learner, RunnerState, TrainOutput};
pub use metrics::{IterationMetrics, LossInfo};
pub use ppo::{PolicyUpdateEngine, UpdateResult};
pub use rollout::{EnvBatch, Rollout, RolloutCollector};
