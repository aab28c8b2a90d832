use crate::error::Result;
use crate::model::{OutputGrad, PolicyOutput};
use crate::rng::PrngKey;
use crate::types::{Action, ActionMasks};

use super::{categorical_grad, categorical_head, discrete_at, require_masks, ActionSpace};

/// Independent masked categorical heads, e.g. source node, path and
/// destination node for virtual network embedding.
///
/// The joint log-probability and entropy are sums over heads.
#[derive(Debug, Clone, Copy)]
pub struct FactorizedHeads {
    num_heads: usize,
}

impl FactorizedHeads {
    pub fn new(num_heads: usize) -> Self {
        Self { num_heads }
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }
}

impl ActionSpace for FactorizedHeads {
    fn name(&self) -> &'static str {
        "factorized"
    }

    fn sample(
        &self,
        output: &PolicyOutput,
        masks: &ActionMasks,
        key: PrngKey,
    ) -> Result<(Action, f64)> {
        require_masks(masks, self.num_heads)?;
        let mut choices = Vec::with_capacity(self.num_heads);
        let mut log_prob = 0.0;
        for (i, head_key) in key.split_n(self.num_heads).into_iter().enumerate() {
            let dist = categorical_head(output, i, masks.get(i))?;
            let a = dist.sample(&mut head_key.into_rng());
            log_prob += dist.log_prob(a)?;
            choices.push(a);
        }
        Ok((Action::factorized(choices), log_prob))
    }

    fn log_prob_and_entropy(
        &self,
        output: &PolicyOutput,
        action: &Action,
        masks: &ActionMasks,
    ) -> Result<(f64, f64)> {
        require_masks(masks, self.num_heads)?;
        let mut log_prob = 0.0;
        let mut entropy = 0.0;
        for i in 0..self.num_heads {
            let dist = categorical_head(output, i, masks.get(i))?;
            log_prob += dist.log_prob(discrete_at(action, i)?)?;
            entropy += dist.entropy();
        }
        Ok((log_prob, entropy))
    }

    fn accumulate_grad(
        &self,
        output: &PolicyOutput,
        action: &Action,
        masks: &ActionMasks,
        d_log_prob: f64,
        d_entropy: f64,
        grad: &mut OutputGrad,
    ) -> Result<()> {
        require_masks(masks, self.num_heads)?;
        for i in 0..self.num_heads {
            let dist = categorical_head(output, i, masks.get(i))?;
            let a = discrete_at(action, i)?;
            let g = categorical_grad(grad, i)?;
            dist.log_prob_grad(a, d_log_prob, g);
            dist.entropy_grad(d_entropy, g);
        }
        Ok(())
    }
}
