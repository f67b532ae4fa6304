use ndarray::{Array4, ArrayView4};

use crate::{MlErr, Result};

/// A loss over channels-first batches of model outputs.
///
/// The model's outputs are logits, each loss applies its own output activation.
pub trait LossFn {
    fn loss(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> Result<f32>;
    fn loss_prime(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> Result<Array4<f32>>;
}

pub(crate) fn check_shapes(y_pred: &ArrayView4<f32>, y: &ArrayView4<f32>) -> Result<()> {
    if y_pred.shape() != y.shape() {
        return Err(MlErr::ShapeMismatch {
            what: "loss targets".into(),
            got: y.shape().to_vec(),
            expected: y_pred.shape().to_vec(),
        });
    }

    Ok(())
}
