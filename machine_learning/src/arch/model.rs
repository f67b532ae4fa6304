use ndarray::{Array4, ArrayView4, Axis};

use super::{Mode, loss::LossFn};
use crate::{MlErr, Result, metrics::Metric, optimization::Optimizer};

pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Makes a forward pass through the model.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - The input batch.
    /// * `mode` - Whether to keep what `backward` needs.
    ///
    /// # Returns
    /// The output batch, or an error if the input or parameters don't fit the model.
    fn forward(&mut self, params: &[f32], x: ArrayView4<f32>, mode: Mode) -> Result<Array4<f32>>;

    /// Backpropagates `d`, the deltas of the last training forward pass' output, writing the
    /// gradient of the parameters into `grad`.
    ///
    /// # Returns
    /// The deltas with respect to the model's input.
    fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array4<f32>,
    ) -> Result<Array4<f32>>;

    /// Computes the gradient of the loss function with respect to the parameters of the model over
    /// the provided batches. **`params` gets updated** for each batch according to the
    /// optimization algorithm.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `grad` - A buffer for writing the computed gradient on each batch pass.
    /// * `loss_fn` - The loss function.
    /// * `metrics` - The metrics to measure on each batch's training output.
    /// * `optimizer` - The optimizer that dictates how to update the weights on each gradient calculation.
    /// * `batches` - The batches of data.
    ///
    /// # Returns
    /// The epoch loss and the epoch value of each metric.
    //
    // NOTE: since getting the actual loss would require forwarding over all batches again at
    // the end of the epoch, it's approximated by averaging the loss of each batch, same goes
    // for the metrics.
    fn backprop<'a, L, O, I>(
        &mut self,
        params: &mut [f32],
        grad: &mut [f32],
        loss_fn: &L,
        metrics: &[Metric],
        optimizer: &mut O,
        batches: I,
    ) -> Result<(f32, Vec<f32>)>
    where
        L: LossFn,
        O: Optimizer,
        I: Iterator<Item = (ArrayView4<'a, f32>, ArrayView4<'a, f32>)>,
    {
        let mut total_loss = 0.0;
        let mut total_metrics = vec![0.0; metrics.len()];
        let mut num_batches = 0;

        for (x, y) in batches {
            let y_pred = self.forward(params, x, Mode::Train)?;
            total_loss += loss_fn.loss(y_pred.view(), y)?;
            for (total, metric) in total_metrics.iter_mut().zip(metrics) {
                *total += metric.compute(y_pred.view(), y)?;
            }
            num_batches += 1;

            let d = loss_fn.loss_prime(y_pred.view(), y)?;
            grad.fill(0.);
            self.backward(params, grad, d)?;
            optimizer.update_params(params, grad)?;
        }

        let n = num_batches.max(1) as f32;
        total_metrics.iter_mut().for_each(|total| *total /= n);
        Ok((total_loss / n, total_metrics))
    }

    /// Runs inference over `x` in batches of `batch_size` samples.
    ///
    /// # Returns
    /// The outputs of every sample, or an error if `x` is empty.
    fn predict(
        &mut self,
        params: &[f32],
        x: ArrayView4<f32>,
        batch_size: usize,
    ) -> Result<Array4<f32>> {
        let outputs = x
            .axis_chunks_iter(Axis(0), batch_size.max(1))
            .map(|batch| self.forward(params, batch, Mode::Infer))
            .collect::<Result<Vec<_>>>()?;

        if outputs.is_empty() {
            return Err(MlErr::EmptyDataset);
        }

        let views: Vec<_> = outputs.iter().map(|output| output.view()).collect();
        Ok(ndarray::concatenate(Axis(0), &views)?)
    }
}
