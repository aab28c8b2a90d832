//! The outer training loop.
//!
//! Each iteration runs rollout, advantage estimation and the policy update
//! strictly in sequence, threading parameters, optimizer state, environment
//! lanes and the random key from one iteration into the next.

use tracing::{info, info_span};

use crate::action_space::ActionSpace;
use crate::config::TrainingConfig;
use crate::environment::Environment;
use crate::error::Result;
#[cfg(feature = "rl-nn")]
use crate::model::TchAdam;
use crate::model::{Optimizer, Params, PolicyValueModel};
use crate::rng::PrngKey;

use super::gae::AdvantageEstimator;
use super::metrics::{IterationMetrics, LossInfo};
use super::ppo::PolicyUpdateEngine;
use super::rollout::{EnvBatch, RolloutCollector};

/// Everything carried between iterations.
#[derive(Debug)]
pub struct RunnerState<S, O, Opt> {
    pub params: Params,
    pub optimizer: Opt,
    pub batch: EnvBatch<S, O>,
    pub key: PrngKey,
    /// Iterations completed so far.
    pub iteration: usize,
}

/// Final state plus everything recorded along the way.
#[derive(Debug)]
pub struct TrainOutput<S, O, I, Opt> {
    pub state: RunnerState<S, O, Opt>,
    pub metrics: Vec<IterationMetrics<I>>,
    /// Per-iteration diagnostics averaged over minibatches.
    pub loss_info: Vec<LossInfo>,
}

/// PPO learner over one environment family and one model.
pub struct Learner<E, M> {
    config: TrainingConfig,
    env: E,
    model: M,
    space: Box<dyn ActionSpace>,
    estimator: AdvantageEstimator,
    engine: PolicyUpdateEngine,
}

impl<E, M> Learner<E, M>
where
    E: Environment,
    M: PolicyValueModel<Observation = E::Observation>,
{
    /// Validates `config` and resolves its action mode.
    pub fn new(config: TrainingConfig, env: E, model: M) -> Result<Self> {
        config.validate()?;
        let space = config.action_mode()?.build();
        Ok(Self {
            estimator: AdvantageEstimator::new(config.gamma, config.gae_lambda),
            engine: PolicyUpdateEngine::from_config(&config),
            config,
            env,
            model,
            space,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn action_space(&self) -> &dyn ActionSpace {
        self.space.as_ref()
    }

    fn collector(&self) -> RolloutCollector<'_, E, M> {
        RolloutCollector::new(
            &self.env,
            &self.model,
            self.space.as_ref(),
            self.config.rollout_length,
        )
        .with_debug(self.config.debug)
    }

    /// Resets every lane, initialises the parameters and runs the warmup.
    ///
    /// `optimizer` is carried in the returned state and stepped once per minibatch.
    pub fn setup<Opt: Optimizer>(
        &self,
        key: PrngKey,
        optimizer: Opt,
    ) -> Result<RunnerState<E::State, E::Observation, Opt>> {
        let (rng, key) = key.split();
        let (reset_key, network_key, warmup_key) = key.split3();

        let mut states = Vec::with_capacity(self.config.num_envs);
        let mut observations = Vec::with_capacity(self.config.num_envs);
        for lane_key in reset_key.split_n(self.config.num_envs) {
            let (obs, state) = self.env.reset(lane_key)?;
            states.push(state);
            observations.push(obs);
        }
        let batch = EnvBatch::new(states, observations)?;
        let params = self.model.init(network_key);

        let batch = if self.config.warmup_steps > 0 {
            info!(steps = self.config.warmup_steps, "warming up environments");
            let (batch, _) =
                self.collector()
                    .warmup(&params, batch, warmup_key, self.config.warmup_steps)?;
            batch
        } else {
            batch
        };

        Ok(RunnerState {
            params,
            optimizer,
            batch,
            key: rng,
            iteration: 0,
        })
    }

    /// Runs one rollout / advantage / update cycle.
    pub fn iterate<Opt: Optimizer>(
        &self,
        state: RunnerState<E::State, E::Observation, Opt>,
    ) -> Result<(RunnerState<E::State, E::Observation, Opt>, IterationMetrics<E::Info>)> {
        let RunnerState {
            params,
            mut optimizer,
            batch,
            key,
            iteration,
        } = state;
        let (key, rng_epoch, rng_step) = key.split3();

        let collector = self.collector();
        let rollout = collector.collect(&params, batch, rng_step)?;
        let bootstrap = collector.bootstrap_values(&params, &rollout.batch.observations)?;
        let advantages =
            self.estimator
                .estimate(&rollout.trajectory, &bootstrap, self.space.as_ref())?;
        let update = self.engine.update(
            &self.model,
            self.space.as_ref(),
            &mut optimizer,
            params,
            &rollout.trajectory,
            &advantages,
            rng_epoch,
        )?;

        let metrics = IterationMetrics {
            iteration,
            infos: rollout.trajectory.infos(),
            mean_reward: rollout.trajectory.mean_reward(),
            episodes_done: rollout.trajectory.num_done(),
            loss: update.mean_loss(),
            minibatch_losses: update.losses,
        };
        let state = RunnerState {
            params: update.params,
            optimizer,
            batch: rollout.batch,
            key,
            iteration: iteration + 1,
        };
        Ok((state, metrics))
    }

    /// Runs `num_updates` iterations from `state`.
    pub fn run<Opt: Optimizer>(
        &self,
        state: RunnerState<E::State, E::Observation, Opt>,
        num_updates: usize,
    ) -> Result<TrainOutput<E::State, E::Observation, E::Info, Opt>> {
        let run_id = crate::generate_run_id();
        let span = info_span!("learner", %run_id, mode = self.space.name());
        let _guard = span.enter();
        info!(
            num_updates,
            num_envs = self.config.num_envs,
            rollout_length = self.config.rollout_length,
            "starting training"
        );

        let mut state = state;
        let mut metrics = Vec::with_capacity(num_updates);
        let mut loss_info = Vec::with_capacity(num_updates);
        for _ in 0..num_updates {
            let (next, m) = self.iterate(state)?;
            info!(
                iteration = m.iteration,
                mean_reward = m.mean_reward,
                total_loss = m.loss.total_loss,
                value_loss = m.loss.value_loss,
                policy_loss = m.loss.policy_loss,
                entropy = m.loss.entropy,
                approx_kl = m.loss.approx_kl,
                clip_fraction = m.loss.clip_fraction,
                "iteration complete"
            );
            loss_info.push(m.loss.clone());
            metrics.push(m);
            state = next;
        }
        Ok(TrainOutput {
            state,
            metrics,
            loss_info,
        })
    }

    /// Sets up from `config.seed` and trains for the configured number of updates.
    pub fn train_with<Opt: Optimizer>(
        &self,
        optimizer: Opt,
    ) -> Result<TrainOutput<E::State, E::Observation, E::Info, Opt>> {
        let state = self.setup(PrngKey::from_seed(self.config.seed), optimizer)?;
        self.run(state, self.config.effective_num_updates())
    }

    /// [`Learner::train_with`] using libtorch Adam built from the configuration.
    #[cfg(feature = "rl-nn")]
    pub fn train(&self) -> Result<TrainOutput<E::State, E::Observation, E::Info, TchAdam>> {
        self.train_with(TchAdam::from_config(&self.config))
    }
}
