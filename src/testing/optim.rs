//! Plain-`f64` update rules for tests that need exact, libtorch-free steps.
//!
//! Both clip the gradient to a maximum global L2 norm before stepping.

use crate::config::TrainingConfig;
use crate::error::{Result, TrainError};
use crate::model::{Optimizer, Params};

/// Scales `grads` in place so that their global L2 norm is at most `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_by_global_norm(grads: &mut [f64], max_norm: f64) -> f64 {
    let norm = grads.iter().map(|g| g * g).sum::<f64>().sqrt();
    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        grads.iter_mut().for_each(|g| *g *= scale);
    }
    norm
}

fn check_len(params: &Params, grads: &[f64]) -> Result<()> {
    if params.len() != grads.len() {
        return Err(TrainError::shape("gradient", params.len(), grads.len()));
    }
    Ok(())
}

/// Plain gradient descent.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub learning_rate: f64,
    pub max_grad_norm: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64, max_grad_norm: f64) -> Self {
        Self {
            learning_rate,
            max_grad_norm,
        }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &Params, grads: &[f64]) -> Result<Params> {
        check_len(params, grads)?;
        let mut g = grads.to_vec();
        clip_by_global_norm(&mut g, self.max_grad_norm);
        let next = params
            .as_slice()
            .iter()
            .zip(&g)
            .map(|(p, g)| p - self.learning_rate * g)
            .collect();
        Ok(Params::from_vec(next))
    }
}

/// Adam with bias correction.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub max_grad_norm: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: u64,
}

impl Adam {
    pub fn new(learning_rate: f64, max_grad_norm: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            max_grad_norm,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    /// Builds an optimizer from the learning rate, betas, eps and clip norm in `config`.
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            beta1: config.adam_beta1,
            beta2: config.adam_beta2,
            eps: config.adam_eps,
            ..Self::new(config.learning_rate, config.max_grad_norm)
        }
    }

    /// Number of steps taken so far.
    pub fn steps(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &Params, grads: &[f64]) -> Result<Params> {
        check_len(params, grads)?;
        if self.m.len() != grads.len() {
            self.m = vec![0.0; grads.len()];
            self.v = vec![0.0; grads.len()];
            self.t = 0;
        }
        let mut g = grads.to_vec();
        clip_by_global_norm(&mut g, self.max_grad_norm);

        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        let mut next = Vec::with_capacity(g.len());
        for (i, (p, g)) in params.as_slice().iter().zip(&g).enumerate() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            next.push(p - self.learning_rate * m_hat / (v_hat.sqrt() + self.eps));
        }
        Ok(Params::from_vec(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_scales_to_max_norm() {
        let mut g = vec![3.0, 4.0];
        let norm = clip_by_global_norm(&mut g, 1.0);
        assert!((norm - 5.0).abs() < 1e-12);
        assert!((g[0] - 0.6).abs() < 1e-12);
        assert!((g[1] - 0.8).abs() < 1e-12);

        let mut small = vec![0.1, 0.0];
        clip_by_global_norm(&mut small, 1.0);
        assert_eq!(small, vec![0.1, 0.0]);
    }

    #[test]
    fn sgd_returns_new_snapshot() {
        let params = Params::from_vec(vec![1.0, -1.0]);
        let mut opt = Sgd::new(0.1, 10.0);
        let next = opt.step(&params, &[1.0, -2.0]).unwrap();
        assert_eq!(params.as_slice(), &[1.0, -1.0]);
        assert!((next.as_slice()[0] - 0.9).abs() < 1e-12);
        assert!((next.as_slice()[1] + 0.8).abs() < 1e-12);
    }

    #[test]
    fn adam_first_step_moves_by_learning_rate() {
        let params = Params::from_vec(vec![0.0, 0.0]);
        let mut opt = Adam::new(0.01, 100.0);
        let next = opt.step(&params, &[2.0, -0.5]).unwrap();
        // bias-corrected first step is lr * sign(g)
        assert!((next.as_slice()[0] + 0.01).abs() < 1e-6);
        assert!((next.as_slice()[1] - 0.01).abs() < 1e-6);
        assert_eq!(opt.steps(), 1);
    }

    #[test]
    fn adam_minimizes_quadratic() {
        let mut params = Params::from_vec(vec![3.0, -2.0]);
        let mut opt = Adam::new(0.1, 10.0);
        for _ in 0..500 {
            let grads: Vec<f64> = params.as_slice().iter().map(|p| 2.0 * p).collect();
            params = opt.step(&params, &grads).unwrap();
        }
        assert!(params.as_slice().iter().all(|p| p.abs() < 1e-2));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let params = Params::from_vec(vec![0.0; 3]);
        assert!(Sgd::new(0.1, 1.0).step(&params, &[0.0; 2]).is_err());
        assert!(Adam::new(0.1, 1.0).step(&params, &[0.0; 4]).is_err());
    }
}
