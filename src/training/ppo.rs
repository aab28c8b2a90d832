//! Clipped-surrogate policy update.
//!
//! Every epoch draws a fresh permutation of all `L * B` transitions and
//! partitions it into equal minibatches. Each minibatch recomputes the
//! distributions and values under the current parameters, forms the PPO
//! loss, pulls its gradient back through the model and takes one optimizer
//! step.

use crate::action_space::ActionSpace;
use crate::config::{check_layout, TrainingConfig};
use crate::error::{Result, TrainError};
use crate::model::{OutputGrad, Optimizer, Params, PolicyOutput, PolicyValueModel};
use crate::rng::PrngKey;

use super::buffer::Trajectory;
use super::gae::Advantages;
use super::loss::{explained_variance, normalize_advantages, policy_loss, value_loss};
use super::metrics::LossInfo;
use super::minibatch::minibatch_indices;

/// Result of updating on one trajectory.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub params: Params,
    /// Diagnostics per minibatch, in update order.
    pub losses: Vec<LossInfo>,
}

impl UpdateResult {
    /// Diagnostics averaged over all minibatches.
    pub fn mean_loss(&self) -> LossInfo {
        LossInfo::mean(&self.losses)
    }
}

/// PPO update hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyUpdateEngine {
    pub update_epochs: usize,
    pub num_minibatches: usize,
    pub minibatch_size: usize,
    pub clip_eps: f64,
    pub vf_coef: f64,
    pub ent_coef: f64,
    pub debug: bool,
}

impl PolicyUpdateEngine {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            update_epochs: config.update_epochs,
            num_minibatches: config.num_minibatches,
            minibatch_size: config.minibatch_size,
            clip_eps: config.clip_eps,
            vf_coef: config.vf_coef,
            ent_coef: config.ent_coef,
            debug: config.debug,
        }
    }

    /// Runs `update_epochs` passes over `trajectory`.
    ///
    /// Fails before touching the parameters if the minibatch layout does not
    /// tile the trajectory exactly, or if the trajectory is incomplete.
    #[allow(clippy::too_many_arguments)]
    pub fn update<M, I>(
        &self,
        model: &M,
        space: &dyn ActionSpace,
        optimizer: &mut dyn Optimizer,
        params: Params,
        trajectory: &Trajectory<M::Observation, I>,
        advantages: &Advantages,
        key: PrngKey,
    ) -> Result<UpdateResult>
    where
        M: PolicyValueModel,
    {
        check_layout(
            self.minibatch_size,
            self.num_minibatches,
            trajectory.rollout_length(),
            trajectory.num_envs(),
        )?;
        trajectory.ensure_complete()?;
        if advantages.len() != trajectory.len() || advantages.values.len() != trajectory.len() {
            return Err(TrainError::shape("advantages", trajectory.len(), advantages.len()));
        }

        let mut params = params;
        let mut losses = Vec::new();
        let mut key = key;
        for epoch in 0..self.update_epochs {
            let (next_key, perm_key) = key.split();
            key = next_key;
            let batches = minibatch_indices(perm_key, trajectory.len(), self.num_minibatches)?;
            for (mb, indices) in batches.iter().enumerate() {
                let (next_params, info) =
                    self.update_minibatch(model, space, optimizer, &params, trajectory, advantages, indices)?;
                if self.debug {
                    tracing::debug!(
                        epoch,
                        minibatch = mb,
                        total_loss = info.total_loss,
                        policy_loss = info.policy_loss,
                        value_loss = info.value_loss,
                        entropy = info.entropy,
                        approx_kl = info.approx_kl,
                        clip_fraction = info.clip_fraction,
                        "minibatch update"
                    );
                }
                params = next_params;
                losses.push(info);
            }
        }
        Ok(UpdateResult { params, losses })
    }

    #[allow(clippy::too_many_arguments)]
    fn update_minibatch<M, I>(
        &self,
        model: &M,
        space: &dyn ActionSpace,
        optimizer: &mut dyn Optimizer,
        params: &Params,
        trajectory: &Trajectory<M::Observation, I>,
        advantages: &Advantages,
        indices: &[usize],
    ) -> Result<(Params, LossInfo)>
    where
        M: PolicyValueModel,
    {
        let n = indices.len();
        let mut outputs: Vec<PolicyOutput> = Vec::with_capacity(n);
        let mut value_indices = Vec::with_capacity(n);
        let mut new_log_probs = Vec::with_capacity(n);
        let mut old_log_probs = Vec::with_capacity(n);
        let mut entropies = Vec::with_capacity(n);
        let mut new_values = Vec::with_capacity(n);
        let mut old_values = Vec::with_capacity(n);
        let mut targets = Vec::with_capacity(n);
        let mut raw_advantages = Vec::with_capacity(n);

        for &i in indices {
            let tr = trajectory
                .flat(i)
                .ok_or_else(|| TrainError::shape("transition index", trajectory.len(), i + 1))?;
            let output = model.apply(params, &tr.obs)?;
            let (log_prob, entropy) = space.log_prob_and_entropy(&output, &tr.action, &tr.masks)?;
            let value_index = space.value_index(&tr.action)?;
            new_values.push(output.value_at(value_index)?);
            new_log_probs.push(log_prob);
            entropies.push(entropy);
            old_log_probs.push(tr.log_prob);
            old_values.push(advantages.values[i]);
            targets.push(advantages.targets[i]);
            raw_advantages.push(advantages.advantages[i]);
            value_indices.push(value_index);
            outputs.push(output);
        }

        let (norm_advantages, _) = normalize_advantages(&raw_advantages);
        let policy = policy_loss(&new_log_probs, &old_log_probs, &norm_advantages, self.clip_eps);
        let value = value_loss(&new_values, &old_values, &targets, self.clip_eps);
        let entropy = entropies.iter().sum::<f64>() / n.max(1) as f64;
        let total = policy.loss + self.vf_coef * value.loss - self.ent_coef * entropy;

        if self.debug {
            tracing::debug!(
                min_ratio = policy.min_ratio,
                max_ratio = policy.max_ratio,
                "minibatch ratio range"
            );
        }

        let d_entropy = -self.ent_coef / n.max(1) as f64;
        let mut grads = params.zeros_like();
        for (j, &i) in indices.iter().enumerate() {
            let tr = trajectory
                .flat(i)
                .ok_or_else(|| TrainError::shape("transition index", trajectory.len(), i + 1))?;
            let output = &outputs[j];
            let mut output_grad = OutputGrad::zeros_like(output);
            space.accumulate_grad(
                output,
                &tr.action,
                &tr.masks,
                policy.d_log_prob[j],
                d_entropy,
                &mut output_grad,
            )?;
            output_grad.value[value_indices[j]] += self.vf_coef * value.d_value[j];
            model.backward(params, &tr.obs, &output_grad, &mut grads)?;
        }
        let next = optimizer.step(params, &grads)?;

        let info = LossInfo {
            total_loss: total,
            value_loss: value.loss,
            policy_loss: policy.loss,
            entropy,
            approx_kl: policy.approx_kl,
            clip_fraction: policy.clip_fraction,
            explained_variance: explained_variance(&new_values, &targets),
            num_updates: 1,
        };
        Ok((next, info))
    }
}
