//! Loss diagnostics and per-iteration metrics.

use std::ops::AddAssign;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Scalar diagnostics of one minibatch update, or an average over several.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LossInfo {
    /// `policy + vf_coef * value - ent_coef * entropy`.
    pub total_loss: f64,
    pub value_loss: f64,
    pub policy_loss: f64,
    /// Mean entropy of the recomputed distributions.
    pub entropy: f64,
    pub approx_kl: f64,
    pub clip_fraction: f64,
    pub explained_variance: f64,
    /// Number of minibatch updates summed into this record.
    pub num_updates: usize,
}

impl LossInfo {
    /// Adds another record's sums.
    pub fn add(&mut self, other: &LossInfo) {
        self.total_loss += other.total_loss;
        self.value_loss += other.value_loss;
        self.policy_loss += other.policy_loss;
        self.entropy += other.entropy;
        self.approx_kl += other.approx_kl;
        self.clip_fraction += other.clip_fraction;
        self.explained_variance += other.explained_variance;
        self.num_updates += other.num_updates;
    }

    /// Averages over the summed updates.
    pub fn average(&self) -> LossInfo {
        if self.num_updates == 0 {
            return LossInfo::default();
        }
        let scale = self.num_updates as f64;
        LossInfo {
            total_loss: self.total_loss / scale,
            value_loss: self.value_loss / scale,
            policy_loss: self.policy_loss / scale,
            entropy: self.entropy / scale,
            approx_kl: self.approx_kl / scale,
            clip_fraction: self.clip_fraction / scale,
            explained_variance: self.explained_variance / scale,
            num_updates: 1,
        }
    }

    /// Average of a sequence of records.
    pub fn mean<'a>(infos: impl IntoIterator<Item = &'a LossInfo>) -> LossInfo {
        let mut sum = LossInfo::default();
        for info in infos {
            sum += info;
        }
        sum.average()
    }
}

impl AddAssign<&LossInfo> for LossInfo {
    fn add_assign(&mut self, other: &LossInfo) {
        self.add(other);
    }
}

/// What one learner iteration hands back for external logging.
#[derive(Debug, Clone)]
pub struct IterationMetrics<I> {
    pub iteration: usize,
    /// Raw environment infos, step-major.
    pub infos: Vec<I>,
    pub mean_reward: f64,
    /// Episode terminations observed during the rollout.
    pub episodes_done: usize,
    /// Loss diagnostics averaged over all minibatches of the iteration.
    pub loss: LossInfo,
    /// One record per minibatch update (`update_epochs * num_minibatches`), in update order.
    pub minibatch_losses: Vec<LossInfo>,
}
