//! Lock-step trajectory collection.

use crate::action_space::ActionSpace;
use crate::environment::Environment;
use crate::error::{Result, TrainError};
use crate::model::{Params, PolicyValueModel};
use crate::rng::PrngKey;
use crate::types::{Action, ActionMasks};

use super::buffer::{Trajectory, Transition};

/// Current state of every environment lane.
#[derive(Debug, Clone)]
pub struct EnvBatch<S, O> {
    pub states: Vec<S>,
    /// Most recent observation per lane; the next action is chosen from it.
    pub observations: Vec<O>,
}

impl<S, O> EnvBatch<S, O> {
    pub fn new(states: Vec<S>, observations: Vec<O>) -> Result<Self> {
        if states.len() != observations.len() {
            return Err(TrainError::shape(
                "lane observations",
                states.len(),
                observations.len(),
            ));
        }
        Ok(Self {
            states,
            observations,
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Output of one collection run.
#[derive(Debug)]
pub struct Rollout<S, O, I> {
    pub trajectory: Trajectory<O, I>,
    pub batch: EnvBatch<S, O>,
    pub key: PrngKey,
}

/// Action choice for one lane, made before any lane is stepped.
struct Selection {
    action: Action,
    log_prob: f64,
    value: Vec<f64>,
    masks: ActionMasks,
}

/// Drives a batch of environments with a fixed parameter snapshot.
pub struct RolloutCollector<'a, E, M> {
    env: &'a E,
    model: &'a M,
    space: &'a dyn ActionSpace,
    rollout_length: usize,
    debug: bool,
}

impl<'a, E, M> RolloutCollector<'a, E, M>
where
    E: Environment,
    M: PolicyValueModel<Observation = E::Observation>,
{
    pub fn new(env: &'a E, model: &'a M, space: &'a dyn ActionSpace, rollout_length: usize) -> Self {
        Self {
            env,
            model,
            space,
            rollout_length,
            debug: false,
        }
    }

    /// Emit a `debug` event per step.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Collects `rollout_length` lock-step transitions from every lane.
    pub fn collect(
        &self,
        params: &Params,
        batch: EnvBatch<E::State, E::Observation>,
        key: PrngKey,
    ) -> Result<Rollout<E::State, E::Observation, E::Info>> {
        let mut trajectory = Trajectory::with_capacity(self.rollout_length, batch.len());
        let mut batch = batch;
        let mut key = key;
        for t in 0..self.rollout_length {
            let (next_batch, step, next_key) = self.step_batch(params, batch, key)?;
            if self.debug {
                tracing::debug!(
                    step = t,
                    actions = ?step.iter().map(|s| &s.action).collect::<Vec<_>>(),
                    log_probs = ?step.iter().map(|s| s.log_prob).collect::<Vec<_>>(),
                    rewards = ?step.iter().map(|s| s.reward).collect::<Vec<_>>(),
                    dones = ?step.iter().map(|s| s.done).collect::<Vec<_>>(),
                    "rollout step"
                );
            }
            trajectory.push_step(step)?;
            batch = next_batch;
            key = next_key;
        }
        Ok(Rollout {
            trajectory,
            batch,
            key,
        })
    }

    /// Advances every lane `steps` times and discards the transitions.
    pub fn warmup(
        &self,
        params: &Params,
        batch: EnvBatch<E::State, E::Observation>,
        key: PrngKey,
        steps: usize,
    ) -> Result<(EnvBatch<E::State, E::Observation>, PrngKey)> {
        let mut batch = batch;
        let mut key = key;
        for _ in 0..steps {
            let (next_batch, _, next_key) = self.step_batch(params, batch, key)?;
            batch = next_batch;
            key = next_key;
        }
        Ok((batch, key))
    }

    /// Raw value outputs for each lane's current observation.
    pub fn bootstrap_values(&self, params: &Params, observations: &[E::Observation]) -> Result<Vec<Vec<f64>>> {
        observations
            .iter()
            .map(|obs| Ok(self.model.apply(params, obs)?.value))
            .collect()
    }

    /// Selects an action for every lane, then steps every lane.
    #[allow(clippy::type_complexity)]
    fn step_batch(
        &self,
        params: &Params,
        batch: EnvBatch<E::State, E::Observation>,
        key: PrngKey,
    ) -> Result<(
        EnvBatch<E::State, E::Observation>,
        Vec<Transition<E::Observation, E::Info>>,
        PrngKey,
    )> {
        let lanes = batch.len();
        let (key, action_key, step_key) = key.split3();
        let action_keys = action_key.split_n(lanes);
        let step_keys = step_key.split_n(lanes);

        let mut selections = Vec::with_capacity(lanes);
        for ((state, obs), lane_key) in batch.states.iter().zip(&batch.observations).zip(action_keys) {
            let masks = self.env.action_masks(state);
            let output = self.model.apply(params, obs)?;
            let (action, log_prob) = self.space.sample(&output, &masks, lane_key)?;
            selections.push(Selection {
                action,
                log_prob,
                value: output.value,
                masks,
            });
        }

        let mut states = Vec::with_capacity(lanes);
        let mut observations = Vec::with_capacity(lanes);
        let mut transitions = Vec::with_capacity(lanes);
        let lanes_iter = batch
            .states
            .into_iter()
            .zip(batch.observations)
            .zip(selections)
            .zip(step_keys);
        for (((state, obs), selection), lane_key) in lanes_iter {
            let outcome = self.env.step(lane_key, state, &selection.action)?;
            transitions.push(Transition {
                done: outcome.done,
                action: selection.action,
                value: selection.value,
                reward: outcome.reward,
                log_prob: selection.log_prob,
                obs,
                info: outcome.info,
                masks: selection.masks,
            });
            states.push(outcome.state);
            observations.push(outcome.observation);
        }

        Ok((
            EnvBatch {
                states,
                observations,
            },
            transitions,
            key,
        ))
    }
}
