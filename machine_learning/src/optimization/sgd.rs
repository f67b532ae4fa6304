use rayon::prelude::*;

use super::Optimizer;
use crate::{MlErr, Result};

/// Stochastic gradient descent with momentum, optional Nesterov momentum and a learning rate
/// that decays with the amount of updates made: `lr / (1 + decay * iterations)`.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f32,
    decay: f32,
    momentum: f32,
    nesterov: bool,
    iterations: u64,
    velocity: Box<[f32]>,
}

impl Sgd {
    /// Creates a new `Sgd` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The initial step size.
    /// * `decay` - The learning rate decay per update.
    /// * `momentum` - The velocity's decay factor, in `[0, 1)`.
    /// * `nesterov` - Whether to look ahead along the velocity when updating.
    ///
    /// # Returns
    /// A new `Sgd` instance or an error if any hyper parameter is out of range.
    pub fn new(
        len: usize,
        learning_rate: f32,
        decay: f32,
        momentum: f32,
        nesterov: bool,
    ) -> Result<Self> {
        let checks = [
            ("learning rate", learning_rate, learning_rate > 0.),
            ("decay", decay, decay >= 0.),
            ("momentum", momentum, (0.0..1.0).contains(&momentum)),
        ];

        if let Some(&(name, value, _)) = checks.iter().find(|(_, _, ok)| !ok) {
            return Err(MlErr::InvalidHyperParam { name, value });
        }

        Ok(Self {
            learning_rate,
            decay,
            momentum,
            nesterov,
            iterations: 0,
            velocity: vec![0.; len].into_boxed_slice(),
        })
    }

    /// The learning rate the next update will use.
    pub fn current_learning_rate(&self) -> f32 {
        self.learning_rate / (1. + self.decay * self.iterations as f32)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }
}

impl Optimizer for Sgd {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        for (what, len) in [("grad", grad.len()), ("velocity", self.velocity.len())] {
            if len != params.len() {
                return Err(MlErr::SizeMismatch {
                    what,
                    got: len,
                    expected: params.len(),
                });
            }
        }

        let lr = self.current_learning_rate();
        let mu = self.momentum;
        let nesterov = self.nesterov;

        params
            .par_iter_mut()
            .zip(grad)
            .zip(self.velocity.par_iter_mut())
            .for_each(|((p, g), v)| {
                *v = mu * *v - lr * g;

                if nesterov {
                    *p += mu * *v - lr * g;
                } else {
                    *p += *v;
                }
            });

        self.iterations += 1;
        Ok(())
    }
}
