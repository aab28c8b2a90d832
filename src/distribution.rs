//! Action distributions with analytic gradients.
//!
//! [`Categorical`] supports validity masks: invalid options have their logit
//! replaced by [`MASK_LOGIT`] before normalisation, which gives them an exact
//! zero probability in `f64` while keeping every quantity finite. A fully
//! masked head therefore degrades to a uniform distribution, not NaN.

use rand::Rng;

use crate::error::{Result, TrainError};

/// Logit assigned to masked-out options.
pub const MASK_LOGIT: f64 = -1e8;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Standard normal sample via Box-Muller.
pub(crate) fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // gen::<f64>() is in [0, 1); shift away from zero for ln
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// A (possibly masked) categorical distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Categorical {
    /// Logits after masking.
    logits: Vec<f64>,
    /// Which raw logits pass through to `logits` (false where masked).
    active: Vec<bool>,
    log_probs: Vec<f64>,
}

impl Categorical {
    /// An unmasked distribution.
    pub fn new(logits: &[f64]) -> Self {
        Self::from_masked(logits.to_vec(), vec![true; logits.len()])
    }

    /// A distribution whose options with `mask[i] == false` have zero probability.
    pub fn masked(logits: &[f64], mask: &[bool]) -> Result<Self> {
        if mask.len() != logits.len() {
            return Err(TrainError::shape("action mask", logits.len(), mask.len()));
        }
        if !mask.iter().any(|&m| m) {
            tracing::warn!(options = mask.len(), "all options masked; falling back to uniform");
        }
        let masked = logits
            .iter()
            .zip(mask)
            .map(|(&l, &m)| if m { l } else { MASK_LOGIT })
            .collect();
        Ok(Self::from_masked(masked, mask.to_vec()))
    }

    fn from_masked(logits: Vec<f64>, active: Vec<bool>) -> Self {
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lse = max + logits.iter().map(|l| (l - max).exp()).sum::<f64>().ln();
        let log_probs = logits.iter().map(|l| l - lse).collect();
        Self {
            logits,
            active,
            log_probs,
        }
    }

    pub fn num_options(&self) -> usize {
        self.logits.len()
    }

    pub fn log_probs(&self) -> &[f64] {
        &self.log_probs
    }

    pub fn probs(&self) -> Vec<f64> {
        self.log_probs.iter().map(|lp| lp.exp()).collect()
    }

    /// Log-probability of option `a`.
    pub fn log_prob(&self, a: usize) -> Result<f64> {
        self.log_probs
            .get(a)
            .copied()
            .ok_or_else(|| TrainError::shape("categorical option", self.num_options(), a + 1))
    }

    /// Shannon entropy. Masked options contribute `0 * MASK_LOGIT = 0`.
    pub fn entropy(&self) -> f64 {
        -self
            .log_probs
            .iter()
            .map(|lp| lp.exp() * lp)
            .sum::<f64>()
    }

    /// Inverse-CDF sample.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let u: f64 = rng.gen();
        let mut cumulative = 0.0;
        let mut fallback = 0;
        for (i, lp) in self.log_probs.iter().enumerate() {
            let p = lp.exp();
            if p > 0.0 {
                fallback = i;
            }
            cumulative += p;
            if u < cumulative {
                return i;
            }
        }
        // rounding left u above the total mass: last option with mass
        fallback
    }

    /// Accumulates `scale * d log_prob(a) / d raw_logits` into `grad`.
    ///
    /// Masked positions receive no gradient.
    pub fn log_prob_grad(&self, a: usize, scale: f64, grad: &mut [f64]) {
        for (i, (lp, g)) in self.log_probs.iter().zip(grad.iter_mut()).enumerate() {
            if !self.active[i] {
                continue;
            }
            let indicator = if i == a { 1.0 } else { 0.0 };
            *g += scale * (indicator - lp.exp());
        }
    }

    /// Accumulates `scale * d entropy / d raw_logits` into `grad`.
    pub fn entropy_grad(&self, scale: f64, grad: &mut [f64]) {
        let h = self.entropy();
        for (i, (lp, g)) in self.log_probs.iter().zip(grad.iter_mut()).enumerate() {
            if !self.active[i] {
                continue;
            }
            let p = lp.exp();
            *g += scale * (-p * (lp + h));
        }
    }
}

/// Independent normals, one per candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian<'a> {
    pub mean: &'a [f64],
    pub log_std: &'a [f64],
}

impl<'a> Gaussian<'a> {
    pub fn new(mean: &'a [f64], log_std: &'a [f64]) -> Result<Self> {
        if mean.len() != log_std.len() {
            return Err(TrainError::shape("gaussian log_std", mean.len(), log_std.len()));
        }
        Ok(Self { mean, log_std })
    }

    pub fn num_candidates(&self) -> usize {
        self.mean.len()
    }

    fn component(&self, i: usize) -> Result<(f64, f64)> {
        match (self.mean.get(i), self.log_std.get(i)) {
            (Some(&m), Some(&s)) => Ok((m, s)),
            _ => Err(TrainError::shape("gaussian candidate", self.mean.len(), i + 1)),
        }
    }

    /// Log-density of `x` under candidate `i`.
    pub fn log_prob(&self, i: usize, x: f64) -> Result<f64> {
        let (mean, log_std) = self.component(i)?;
        let z = (x - mean) / log_std.exp();
        Ok(-0.5 * z * z - log_std - 0.5 * LN_2PI)
    }

    /// Differential entropy of candidate `i`.
    pub fn entropy(&self, i: usize) -> Result<f64> {
        let (_, log_std) = self.component(i)?;
        Ok(0.5 + 0.5 * LN_2PI + log_std)
    }

    /// Mean entropy over all candidates.
    pub fn mean_entropy(&self) -> f64 {
        if self.log_std.is_empty() {
            return 0.0;
        }
        self.log_std
            .iter()
            .map(|s| 0.5 + 0.5 * LN_2PI + s)
            .sum::<f64>()
            / self.log_std.len() as f64
    }

    pub fn sample<R: Rng + ?Sized>(&self, i: usize, rng: &mut R) -> Result<f64> {
        let (mean, log_std) = self.component(i)?;
        Ok(mean + log_std.exp() * standard_normal(rng))
    }

    /// Accumulates `scale * d log_prob(i, x) / d(mean, log_std)`.
    pub fn log_prob_grad(
        &self,
        i: usize,
        x: f64,
        scale: f64,
        d_mean: &mut [f64],
        d_log_std: &mut [f64],
    ) -> Result<()> {
        let (mean, log_std) = self.component(i)?;
        let var = (2.0 * log_std).exp();
        let diff = x - mean;
        d_mean[i] += scale * diff / var;
        d_log_std[i] += scale * (diff * diff / var - 1.0);
        Ok(())
    }

    /// Accumulates `scale * d mean_entropy / d log_std`.
    pub fn mean_entropy_grad(&self, scale: f64, d_log_std: &mut [f64]) {
        if self.log_std.is_empty() {
            return;
        }
        let per = scale / self.log_std.len() as f64;
        d_log_std.iter_mut().for_each(|g| *g += per);
    }
}
