use std::{collections::BTreeMap, num::NonZeroUsize, path::PathBuf};

use log::{debug, info};
use ndarray::Axis;
use rand::Rng;

use super::{EpochRecord, History};
use crate::{
    MlErr, Result,
    arch::{Graph, Mode, Model, loss::LossFn},
    dataset::Dataset,
    metrics::Metric,
    optimization::Optimizer,
    weights::WeightSet,
};

/// A model `Trainer`. Contains the relevant components needed for training a model,
/// including the model itself.
pub struct ModelTrainer<M, O, L, R>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
    R: Rng,
{
    model: M,
    optimizer: O,
    loss_fn: L,
    metrics: Vec<Metric>,

    epochs: usize,
    batch_size: NonZeroUsize,
    validation_split: f32,
    rng: R,
}

impl<M, O, L, R> ModelTrainer<M, O, L, R>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
    R: Rng,
{
    /// Returns a new `ModelTrainer`.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained.
    /// * `optimizer` - The optimizer, sized for the model's parameters.
    /// * `loss_fn` - The loss function used to measure the difference between a model's output and the expected one.
    /// * `metrics` - The metrics reported after every epoch.
    /// * `epochs` - The amount of passes over the training data per `fit` call.
    /// * `batch_size` - The amount of samples per gradient step.
    /// * `validation_split` - The fraction of the data, taken from its end, held out for validation.
    /// * `rng` - A random number generator, used for shuffling.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: M,
        optimizer: O,
        loss_fn: L,
        metrics: Vec<Metric>,
        epochs: usize,
        batch_size: NonZeroUsize,
        validation_split: f32,
        rng: R,
    ) -> Self {
        Self {
            model,
            optimizer,
            loss_fn,
            metrics,
            epochs,
            batch_size,
            validation_split,
            rng,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Trains the model over `dataset` for the configured amount of epochs.
    ///
    /// # Returns
    /// The history of the training.
    pub fn fit(&mut self, params: &mut [f32], dataset: Dataset) -> Result<History> {
        self.fit_with(params, dataset, |_, _, _| Ok(()))
    }

    /// Like `fit`, calling `on_best` with the model, its parameters and the epoch record every
    /// time the monitored loss (the validation loss if there's a validation set) improves.
    pub fn fit_with<F>(
        &mut self,
        params: &mut [f32],
        dataset: Dataset,
        mut on_best: F,
    ) -> Result<History>
    where
        F: FnMut(&M, &[f32], &EpochRecord) -> Result<()>,
    {
        let (mut train, validation) = dataset.split_validation(self.validation_split)?;
        if train.is_empty() {
            return Err(MlErr::EmptyDataset);
        }

        info!(
            "training on {} samples, validating on {}",
            train.len(),
            validation.as_ref().map_or(0, Dataset::len)
        );

        let mut grad = vec![0.; self.model.size()];
        let mut history = History::default();
        let mut best = f32::INFINITY;

        for epoch in 1..=self.epochs {
            train.shuffle(&mut self.rng);

            let (loss, metrics) = self.model.backprop(
                params,
                &mut grad,
                &self.loss_fn,
                &self.metrics,
                &mut self.optimizer,
                train.batches(self.batch_size.get()),
            )?;

            let mut record = EpochRecord {
                epoch,
                loss,
                metrics: self.name_metrics(metrics),
                ..Default::default()
            };

            if let Some(validation) = &validation {
                let (val_loss, val_metrics) = self.evaluate(params, validation)?;
                record.val_loss = Some(val_loss);
                record.val_metrics = val_metrics;
            }

            info!("epoch {epoch}/{}: {}", self.epochs, format_record(&record));

            if record.monitored_loss() < best {
                debug!("monitored loss improved from {best} to {}", record.monitored_loss());
                best = record.monitored_loss();
                on_best(&self.model, params, &record)?;
            }

            history.push(record);
        }

        Ok(history)
    }

    /// Computes the loss and metrics of the model over `dataset` without training it, averaged
    /// over its samples.
    pub fn evaluate(
        &mut self,
        params: &[f32],
        dataset: &Dataset,
    ) -> Result<(f32, BTreeMap<String, f32>)> {
        let mut loss = 0.;
        let mut metrics = vec![0.; self.metrics.len()];

        for (x, y) in dataset.batches(self.batch_size.get()) {
            let weight = x.len_of(Axis(0)) as f32;
            let y_pred = self.model.forward(params, x, Mode::Infer)?;

            loss += self.loss_fn.loss(y_pred.view(), y)? * weight;
            for (total, metric) in metrics.iter_mut().zip(&self.metrics) {
                *total += metric.compute(y_pred.view(), y)? * weight;
            }
        }

        let n = dataset.len().max(1) as f32;
        let metrics = metrics.into_iter().map(|total| total / n).collect();

        Ok((loss / n, self.name_metrics(metrics)))
    }

    fn name_metrics(&self, values: Vec<f32>) -> BTreeMap<String, f32> {
        self.metrics
            .iter()
            .zip(values)
            .map(|(metric, value)| (metric.name().to_string(), value))
            .collect()
    }
}

fn format_record(record: &EpochRecord) -> String {
    let mut line = format!("loss {:.4}", record.loss);

    for (name, value) in &record.metrics {
        line += &format!(", {name} {value:.4}");
    }

    if let Some(val_loss) = record.val_loss {
        line += &format!(", val_loss {val_loss:.4}");
    }

    for (name, value) in &record.val_metrics {
        line += &format!(", val_{name} {value:.4}");
    }

    line
}

/// An `on_best` callback for `ModelTrainer::fit_with` that saves the graph's weights to `path`.
pub fn checkpoint(path: impl Into<PathBuf>) -> impl FnMut(&Graph, &[f32], &EpochRecord) -> Result<()> {
    let path = path.into();

    move |graph, params, record| {
        WeightSet::capture(graph, params)?.save(&path)?;
        info!(
            "epoch {}: saved checkpoint to {}",
            record.epoch,
            path.display()
        );
        Ok(())
    }
}
