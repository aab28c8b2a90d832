//! PPO loss terms with their gradients.
//!
//! Each function returns the scalar loss together with the derivative of
//! that loss with respect to each of its per-sample inputs (new log-probs or
//! new values), ready to be pulled back through the model.

/// Added to the advantage standard deviation before dividing.
pub const ADV_NORM_EPS: f64 = 1e-8;

/// Clipped surrogate policy loss.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyLoss {
    pub loss: f64,
    /// `d loss / d new_log_prob[i]`.
    pub d_log_prob: Vec<f64>,
    /// Fraction of samples with `|ratio - 1| > clip_eps`.
    pub clip_fraction: f64,
    /// `mean(old_log_prob - new_log_prob)`.
    pub approx_kl: f64,
    pub min_ratio: f64,
    pub max_ratio: f64,
}

/// Clipped value regression loss.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueLoss {
    pub loss: f64,
    /// `d loss / d new_value[i]`.
    pub d_value: Vec<f64>,
}

/// Normalizes to zero mean and unit (population) standard deviation.
///
/// Returns the normalized values and the standard deviation used.
pub fn normalize_advantages(advantages: &[f64]) -> (Vec<f64>, f64) {
    if advantages.is_empty() {
        return (Vec::new(), 0.0);
    }
    let n = advantages.len() as f64;
    let mean = advantages.iter().sum::<f64>() / n;
    let std = (advantages.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std < ADV_NORM_EPS {
        tracing::warn!(std, samples = advantages.len(), "degenerate advantage batch");
    }
    let normalized = advantages
        .iter()
        .map(|a| (a - mean) / (std + ADV_NORM_EPS))
        .collect();
    (normalized, std)
}

/// `-mean(min(ratio * A, clip(ratio, 1 - ε, 1 + ε) * A))`.
///
/// The gradient flows only through samples where the unclipped term is the
/// minimum; clipped samples contribute zero.
pub fn policy_loss(
    new_log_probs: &[f64],
    old_log_probs: &[f64],
    advantages: &[f64],
    clip_eps: f64,
) -> PolicyLoss {
    let n = new_log_probs.len();
    if n == 0 {
        return PolicyLoss {
            loss: 0.0,
            d_log_prob: Vec::new(),
            clip_fraction: 0.0,
            approx_kl: 0.0,
            min_ratio: 1.0,
            max_ratio: 1.0,
        };
    }
    let scale = 1.0 / n as f64;
    let mut loss = 0.0;
    let mut d_log_prob = vec![0.0; n];
    let mut clipped = 0usize;
    let mut kl = 0.0;
    let mut min_ratio = f64::INFINITY;
    let mut max_ratio = f64::NEG_INFINITY;

    for i in 0..n {
        let ratio = (new_log_probs[i] - old_log_probs[i]).exp();
        let adv = advantages[i];
        let unclipped = ratio * adv;
        let clipped_term = ratio.clamp(1.0 - clip_eps, 1.0 + clip_eps) * adv;
        if unclipped <= clipped_term {
            loss -= unclipped * scale;
            // d(ratio)/d(log_prob) = ratio
            d_log_prob[i] = -unclipped * scale;
        } else {
            loss -= clipped_term * scale;
        }
        if (ratio - 1.0).abs() > clip_eps {
            clipped += 1;
        }
        kl += (old_log_probs[i] - new_log_probs[i]) * scale;
        min_ratio = min_ratio.min(ratio);
        max_ratio = max_ratio.max(ratio);
    }

    PolicyLoss {
        loss,
        d_log_prob,
        clip_fraction: clipped as f64 * scale,
        approx_kl: kl,
        min_ratio,
        max_ratio,
    }
}

/// `0.5 * mean(max((v - R)^2, (v_clip - R)^2))` where
/// `v_clip = v_old + clip(v - v_old, -ε, ε)`.
pub fn value_loss(values: &[f64], old_values: &[f64], targets: &[f64], clip_eps: f64) -> ValueLoss {
    let n = values.len();
    if n == 0 {
        return ValueLoss {
            loss: 0.0,
            d_value: Vec::new(),
        };
    }
    let scale = 1.0 / n as f64;
    let mut loss = 0.0;
    let mut d_value = vec![0.0; n];

    for i in 0..n {
        let v = values[i];
        let clipped = old_values[i] + (v - old_values[i]).clamp(-clip_eps, clip_eps);
        let raw_err = v - targets[i];
        let clipped_err = clipped - targets[i];
        if raw_err * raw_err >= clipped_err * clipped_err {
            loss += 0.5 * raw_err * raw_err * scale;
            d_value[i] = raw_err * scale;
        } else {
            // clipped prediction is constant in v
            loss += 0.5 * clipped_err * clipped_err * scale;
        }
    }

    ValueLoss { loss, d_value }
}

/// `1 - Var(targets - predictions) / Var(targets)`; 1 when the targets are constant.
pub fn explained_variance(predictions: &[f64], targets: &[f64]) -> f64 {
    let var = |xs: &mut dyn Iterator<Item = f64>| {
        let v: Vec<f64> = xs.collect();
        if v.is_empty() {
            return 0.0;
        }
        let mean = v.iter().sum::<f64>() / v.len() as f64;
        v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / v.len() as f64
    };
    let var_targets = var(&mut targets.iter().copied());
    if var_targets == 0.0 {
        return 1.0;
    }
    let var_residual = var(&mut targets.iter().zip(predictions).map(|(t, p)| t - p));
    1.0 - var_residual / var_targets
}
