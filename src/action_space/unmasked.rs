use crate::error::Result;
use crate::model::{OutputGrad, PolicyOutput};
use crate::rng::PrngKey;
use crate::types::{Action, ActionMasks};

use super::{categorical_grad, categorical_head, discrete_at, ActionSpace};

/// A single categorical head evaluated without masks.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnmaskedCategorical;

impl ActionSpace for UnmaskedCategorical {
    fn name(&self) -> &'static str {
        "unmasked"
    }

    fn sample(
        &self,
        output: &PolicyOutput,
        _masks: &ActionMasks,
        key: PrngKey,
    ) -> Result<(Action, f64)> {
        let dist = categorical_head(output, 0, None)?;
        let a = dist.sample(&mut key.into_rng());
        Ok((Action::discrete(a), dist.log_prob(a)?))
    }

    fn log_prob_and_entropy(
        &self,
        output: &PolicyOutput,
        action: &Action,
        _masks: &ActionMasks,
    ) -> Result<(f64, f64)> {
        let dist = categorical_head(output, 0, None)?;
        Ok((dist.log_prob(discrete_at(action, 0)?)?, dist.entropy()))
    }

    fn accumulate_grad(
        &self,
        output: &PolicyOutput,
        action: &Action,
        _masks: &ActionMasks,
        d_log_prob: f64,
        d_entropy: f64,
        grad: &mut OutputGrad,
    ) -> Result<()> {
        let dist = categorical_head(output, 0, None)?;
        let a = discrete_at(action, 0)?;
        let g = categorical_grad(grad, 0)?;
        dist.log_prob_grad(a, d_log_prob, g);
        dist.entropy_grad(d_entropy, g);
        Ok(())
    }
}
