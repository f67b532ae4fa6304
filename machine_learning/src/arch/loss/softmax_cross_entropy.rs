use ndarray::{Array4, ArrayView4, Axis, Zip};

use super::{LossFn, loss_fn::check_shapes};
use crate::Result;

/// Categorical cross entropy over the channel axis, computed on logits and averaged over every
/// pixel of the batch.
#[derive(Default, Clone, Copy, Debug)]
pub struct SoftmaxCrossEntropy;

impl SoftmaxCrossEntropy {
    /// Returns a new `SoftmaxCrossEntropy`.
    pub fn new() -> Self {
        Self
    }
}

/// Softmax over the channel axis, shifted by each pixel's max logit.
pub fn softmax(x: ArrayView4<f32>) -> Array4<f32> {
    let max = x.fold_axis(Axis(1), f32::NEG_INFINITY, |&m, &v| m.max(v));
    let mut e = &x - &max.insert_axis(Axis(1));
    e.mapv_inplace(f32::exp);
    let sum = e.sum_axis(Axis(1)).insert_axis(Axis(1));
    e / &sum
}

fn pixels(x: &ArrayView4<f32>) -> f32 {
    let (b, _, h, w) = x.dim();
    (b * h * w).max(1) as f32
}

impl LossFn for SoftmaxCrossEntropy {
    fn loss(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> Result<f32> {
        check_shapes(&y_pred, &y)?;

        let max = y_pred.fold_axis(Axis(1), f32::NEG_INFINITY, |&m, &v| m.max(v));
        let shifted = &y_pred - &max.insert_axis(Axis(1));
        let log_sum = shifted
            .mapv(f32::exp)
            .sum_axis(Axis(1))
            .mapv(f32::ln)
            .insert_axis(Axis(1));

        let total = Zip::from(&shifted)
            .and_broadcast(&log_sum)
            .and(&y)
            .fold(0.0, |acc, &s, &ls, &t| acc - t * (s - ls));

        Ok(total / pixels(&y_pred))
    }

    fn loss_prime(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> Result<Array4<f32>> {
        check_shapes(&y_pred, &y)?;

        let n = pixels(&y_pred);
        let p = softmax(y_pred);
        let t_sum = y.sum_axis(Axis(1)).insert_axis(Axis(1));

        Ok((p * &t_sum - &y) / n)
    }
}
