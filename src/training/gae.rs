//! Generalized Advantage Estimation (GAE-λ).
//!
//! A single reverse pass per lane with two carried scalars: the running
//! advantage and the value of the following step. A terminated step cuts
//! both, so no credit crosses an episode boundary.

use crate::action_space::ActionSpace;
use crate::error::{Result, TrainError};

use super::buffer::{Trajectory, Transition};

/// Per-transition estimates, flat and step-major like the trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct Advantages {
    pub advantages: Vec<f64>,
    /// Value targets, `advantage + value`.
    pub targets: Vec<f64>,
    /// The scalar value each advantage was computed against.
    pub values: Vec<f64>,
}

impl Advantages {
    pub fn len(&self) -> usize {
        self.advantages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advantages.is_empty()
    }
}

/// Computes GAE-λ advantages and value targets for one lane.
///
/// `bootstrap` is the value of the observation following the last step.
/// Returns `(advantages, targets)`.
pub fn compute_gae(
    rewards: &[f64],
    values: &[f64],
    dones: &[bool],
    bootstrap: f64,
    gamma: f64,
    gae_lambda: f64,
) -> (Vec<f64>, Vec<f64>) {
    let n = rewards.len();
    let mut advantages = vec![0.0; n];
    let mut gae = 0.0;
    let mut next_value = bootstrap;

    for t in (0..n).rev() {
        let not_done = if dones[t] { 0.0 } else { 1.0 };
        let delta = rewards[t] + gamma * next_value * not_done - values[t];
        gae = delta + gamma * gae_lambda * not_done * gae;
        advantages[t] = gae;
        next_value = values[t];
    }

    let targets = advantages.iter().zip(values).map(|(a, v)| a + v).collect();
    (advantages, targets)
}

/// GAE over a full batched trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvantageEstimator {
    pub gamma: f64,
    pub gae_lambda: f64,
}

impl AdvantageEstimator {
    pub fn new(gamma: f64, gae_lambda: f64) -> Self {
        Self { gamma, gae_lambda }
    }

    /// Estimates advantages for every transition of `trajectory`.
    ///
    /// `bootstrap_values[b]` is the raw value output for lane `b`'s last
    /// observation. Per-candidate values are reduced to the scalar selected
    /// by each stored action; the bootstrap is sliced at the index selected
    /// by the lane's final action.
    pub fn estimate<O, I>(
        &self,
        trajectory: &Trajectory<O, I>,
        bootstrap_values: &[Vec<f64>],
        space: &dyn ActionSpace,
    ) -> Result<Advantages> {
        trajectory.ensure_complete()?;
        let steps = trajectory.rollout_length();
        let lanes = trajectory.num_envs();
        if bootstrap_values.len() != lanes {
            return Err(TrainError::shape("bootstrap values", lanes, bootstrap_values.len()));
        }

        let mut values = Vec::with_capacity(trajectory.len());
        for transition in trajectory.iter() {
            values.push(selected_value(space, transition)?);
        }

        let mut advantages = vec![0.0; trajectory.len()];
        let mut targets = vec![0.0; trajectory.len()];
        let mut lane_rewards = Vec::with_capacity(steps);
        let mut lane_values = Vec::with_capacity(steps);
        let mut lane_dones = Vec::with_capacity(steps);

        for (b, bootstrap) in bootstrap_values.iter().enumerate() {
            lane_rewards.clear();
            lane_values.clear();
            lane_dones.clear();
            for t in 0..steps {
                let i = t * lanes + b;
                let tr = trajectory
                    .flat(i)
                    .ok_or(TrainError::IncompleteTrajectory {
                        expected: trajectory.capacity(),
                        actual: trajectory.len(),
                    })?;
                lane_rewards.push(tr.reward);
                lane_values.push(values[i]);
                lane_dones.push(tr.done);
            }

            let bootstrap_index = match trajectory.get(steps.saturating_sub(1), b) {
                Some(last) if steps > 0 => space.value_index(&last.action)?,
                _ => 0,
            };
            let bootstrap = bootstrap.get(bootstrap_index).copied().ok_or_else(|| {
                TrainError::shape("bootstrap value width", bootstrap_index + 1, bootstrap.len())
            })?;

            let (adv, tgt) = compute_gae(
                &lane_rewards,
                &lane_values,
                &lane_dones,
                bootstrap,
                self.gamma,
                self.gae_lambda,
            );
            for t in 0..steps {
                advantages[t * lanes + b] = adv[t];
                targets[t * lanes + b] = tgt[t];
            }
        }

        Ok(Advantages {
            advantages,
            targets,
            values,
        })
    }
}

/// The stored value estimate that scores a transition's action.
pub(crate) fn selected_value<O, I>(
    space: &dyn ActionSpace,
    transition: &Transition<O, I>,
) -> Result<f64> {
    let index = space.value_index(&transition.action)?;
    transition
        .value
        .get(index)
        .copied()
        .ok_or_else(|| TrainError::shape("stored value width", index + 1, transition.value.len()))
}
