//! Fixed-size trajectory storage.
//!
//! A [`Trajectory`] holds `rollout_length * num_envs` transitions in
//! step-major order: every lane's transition for step `t` is stored before
//! any transition for step `t + 1`, so the transition of lane `b` at step `t`
//! lives at flat index `t * num_envs + b`.

use crate::error::{Result, TrainError};
use crate::types::{Action, ActionMasks};

/// One (environment lane, timestep) record.
#[derive(Debug, Clone)]
pub struct Transition<O, I> {
    /// Whether the episode terminated on this step.
    pub done: bool,
    pub action: Action,
    /// Value estimate(s) at selection time, under the acting parameters.
    pub value: Vec<f64>,
    pub reward: f64,
    /// Log-probability of `action` under the acting parameters.
    pub log_prob: f64,
    /// Observation the action was selected from.
    pub obs: O,
    pub info: I,
    /// Masks in force when the action was selected, one per head.
    pub masks: ActionMasks,
}

/// Transitions of one rollout, preallocated for `L * B` entries.
#[derive(Debug, Clone)]
pub struct Trajectory<O, I> {
    rollout_length: usize,
    num_envs: usize,
    transitions: Vec<Transition<O, I>>,
}

impl<O, I> Trajectory<O, I> {
    /// Creates an empty trajectory for `rollout_length` steps of `num_envs` lanes.
    pub fn with_capacity(rollout_length: usize, num_envs: usize) -> Self {
        Self {
            rollout_length,
            num_envs,
            transitions: Vec::with_capacity(rollout_length.saturating_mul(num_envs)),
        }
    }

    /// Appends one step: exactly one transition per lane, in lane order.
    pub fn push_step(&mut self, step: Vec<Transition<O, I>>) -> Result<()> {
        if step.len() != self.num_envs {
            return Err(TrainError::shape("transitions per step", self.num_envs, step.len()));
        }
        if self.steps() >= self.rollout_length {
            return Err(TrainError::shape(
                "trajectory steps",
                self.rollout_length,
                self.steps() + 1,
            ));
        }
        self.transitions.extend(step);
        Ok(())
    }

    pub fn rollout_length(&self) -> usize {
        self.rollout_length
    }

    pub fn num_envs(&self) -> usize {
        self.num_envs
    }

    /// Number of steps recorded so far.
    pub fn steps(&self) -> usize {
        if self.num_envs == 0 {
            0
        } else {
            self.transitions.len() / self.num_envs
        }
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Full capacity `L * B`, saturating at `usize::MAX`.
    pub fn capacity(&self) -> usize {
        self.rollout_length.saturating_mul(self.num_envs)
    }

    pub fn is_complete(&self) -> bool {
        self.transitions.len() == self.capacity()
    }

    /// Fails unless every step has been recorded.
    pub fn ensure_complete(&self) -> Result<()> {
        if !self.is_complete() {
            return Err(TrainError::IncompleteTrajectory {
                expected: self.capacity(),
                actual: self.transitions.len(),
            });
        }
        Ok(())
    }

    /// Transition of lane `env` at `step`.
    pub fn get(&self, step: usize, env: usize) -> Option<&Transition<O, I>> {
        if env >= self.num_envs {
            return None;
        }
        self.transitions.get(step * self.num_envs + env)
    }

    /// Transition at flat index `t * B + b`.
    pub fn flat(&self, index: usize) -> Option<&Transition<O, I>> {
        self.transitions.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transition<O, I>> {
        self.transitions.iter()
    }

    pub fn transitions(&self) -> &[Transition<O, I>] {
        &self.transitions
    }

    /// Mean reward over all recorded transitions.
    pub fn mean_reward(&self) -> f64 {
        if self.transitions.is_empty() {
            return 0.0;
        }
        self.transitions.iter().map(|t| t.reward).sum::<f64>() / self.transitions.len() as f64
    }

    /// Number of recorded episode terminations.
    pub fn num_done(&self) -> usize {
        self.transitions.iter().filter(|t| t.done).count()
    }
}

impl<O, I: Clone> Trajectory<O, I> {
    /// Auxiliary infos in step-major order.
    pub fn infos(&self) -> Vec<I> {
        self.transitions.iter().map(|t| t.info.clone()).collect()
    }
}
