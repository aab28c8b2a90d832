use crate::distribution::{Categorical, Gaussian};
use crate::error::{Result, TrainError};
use crate::model::{HeadGrad, HeadOutput, OutputGrad, PolicyOutput};
use crate::rng::PrngKey;
use crate::types::{Action, ActionMasks};

use super::{categorical_grad, categorical_head, discrete_at, ActionSpace, PathActionCodec};

/// A path action paired with a launch power for the chosen path.
///
/// Head 0 is a categorical over all `k_paths * slots_per_path` path actions,
/// head 1 holds one Gaussian per candidate path over the launch power
/// rescaled to `[0, 1]`. Only the Gaussian of the selected path scores the
/// power, and the value estimate of that path scores the action.
///
/// Sampled powers are clamped to `[0, 1]` before they are stored, and the
/// stored power is scored with the Gaussian density. The density ignores the
/// probability mass the clamp piles onto the two boundaries, so log-probs of
/// boundary powers are biased low relative to the true clipped distribution.
/// Rollout and update both score the stored value, so the PPO ratio stays
/// consistent; the bias only matters when the mean drifts outside the range.
#[derive(Debug, Clone, Copy)]
pub struct HybridPathPower {
    codec: PathActionCodec,
    min_power: f64,
    max_power: f64,
}

impl HybridPathPower {
    pub fn new(codec: PathActionCodec, min_power: f64, max_power: f64) -> Self {
        Self {
            codec,
            min_power,
            max_power,
        }
    }

    pub fn codec(&self) -> PathActionCodec {
        self.codec
    }

    /// Maps a physical power into `[0, 1]`.
    pub fn normalize_power(&self, power: f64) -> f64 {
        (power - self.min_power) / (self.max_power - self.min_power)
    }

    /// Maps a unit-interval power back to physical units.
    pub fn denormalize_power(&self, unit: f64) -> f64 {
        self.min_power + unit * (self.max_power - self.min_power)
    }

    fn path_head(&self, output: &PolicyOutput) -> Result<Categorical> {
        let dist = categorical_head(output, 0, None)?;
        if dist.num_options() != self.codec.num_actions() {
            return Err(TrainError::shape(
                "path action logits",
                self.codec.num_actions(),
                dist.num_options(),
            ));
        }
        Ok(dist)
    }

    fn power_head<'a>(&self, output: &'a PolicyOutput) -> Result<Gaussian<'a>> {
        match output.head(1)? {
            HeadOutput::Gaussian { mean, log_std } => {
                let dist = Gaussian::new(mean, log_std)?;
                if dist.num_candidates() != self.codec.k_paths {
                    return Err(TrainError::shape(
                        "launch power candidates",
                        self.codec.k_paths,
                        dist.num_candidates(),
                    ));
                }
                Ok(dist)
            }
            HeadOutput::Categorical { .. } => Err(TrainError::Model(
                "head 1 is categorical, expected a Gaussian launch power head".to_string(),
            )),
        }
    }

    fn stored_power(&self, action: &Action) -> Result<f64> {
        action
            .continuous
            .first()
            .map(|&p| self.normalize_power(p))
            .ok_or_else(|| TrainError::shape("continuous action components", 1, 0))
    }
}

impl ActionSpace for HybridPathPower {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn sample(
        &self,
        output: &PolicyOutput,
        _masks: &ActionMasks,
        key: PrngKey,
    ) -> Result<(Action, f64)> {
        let (path_key, power_key) = key.split();
        let paths = self.path_head(output)?;
        let powers = self.power_head(output)?;

        let path_action = paths.sample(&mut path_key.into_rng());
        let (path, _) = self.codec.decode(path_action);
        let unit = powers
            .sample(path, &mut power_key.into_rng())?
            .clamp(0.0, 1.0);
        let power = self.denormalize_power(unit);

        // density at the stored (clamped, round-tripped) power, see the type docs
        let log_prob = paths.log_prob(path_action)? + powers.log_prob(path, self.normalize_power(power))?;
        Ok((Action::hybrid(path_action, power), log_prob))
    }

    fn log_prob_and_entropy(
        &self,
        output: &PolicyOutput,
        action: &Action,
        _masks: &ActionMasks,
    ) -> Result<(f64, f64)> {
        let paths = self.path_head(output)?;
        let powers = self.power_head(output)?;
        let path_action = discrete_at(action, 0)?;
        let (path, _) = self.codec.decode(path_action);
        let unit = self.stored_power(action)?;

        let log_prob = paths.log_prob(path_action)? + powers.log_prob(path, unit)?;
        let entropy = paths.entropy() + powers.mean_entropy();
        Ok((log_prob, entropy))
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
        let paths = self.path_head(output)?;
        let powers = self.power_head(output)?;
        let path_action = discrete_at(action, 0)?;
        let (path, _) = self.codec.decode(path_action);
        let unit = self.stored_power(action)?;

        let g = categorical_grad(grad, 0)?;
        paths.log_prob_grad(path_action, d_log_prob, g);
        paths.entropy_grad(d_entropy, g);

        let available = grad.heads.len();
        match grad.heads.get_mut(1) {
            Some(HeadGrad::Gaussian { mean, log_std }) => {
                powers.log_prob_grad(path, unit, d_log_prob, mean, log_std)?;
                powers.mean_entropy_grad(d_entropy, log_std);
                Ok(())
            }
            Some(HeadGrad::Categorical { .. }) => Err(TrainError::Model(
                "head 1 gradient is categorical, expected Gaussian".to_string(),
            )),
            None => Err(TrainError::shape("head gradients", 2, available)),
        }
    }

    fn value_index(&self, action: &Action) -> Result<usize> {
        Ok(self.codec.decode(discrete_at(action, 0)?).0)
    }
}
