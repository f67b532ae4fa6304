use ndarray::{Array4, ArrayView4, Zip};

use super::{LossFn, loss_fn::check_shapes};
use crate::{Result, arch::activations::Sigmoid};

/// Binary cross entropy computed on logits, averaged over every element of the batch.
///
/// Uses the stable form `max(x, 0) - x * t + ln(1 + e^-|x|)`.
#[derive(Default, Clone, Copy, Debug)]
pub struct SigmoidCrossEntropy;

impl SigmoidCrossEntropy {
    /// Returns a new `SigmoidCrossEntropy`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for SigmoidCrossEntropy {
    fn loss(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> Result<f32> {
        check_shapes(&y_pred, &y)?;

        let total = Zip::from(&y_pred)
            .and(&y)
            .fold(0.0, |acc, &x, &t| {
                acc + x.max(0.) - x * t + (-x.abs()).exp().ln_1p()
            });

        Ok(total / y_pred.len().max(1) as f32)
    }

    fn loss_prime(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> Result<Array4<f32>> {
        check_shapes(&y_pred, &y)?;

        let n = y_pred.len().max(1) as f32;
        let sigmoid = Sigmoid::new();

        Ok(Zip::from(&y_pred)
            .and(&y)
            .map_collect(|&x, &t| (sigmoid.f(x) - t) / n))
    }
}
