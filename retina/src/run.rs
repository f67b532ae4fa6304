use std::num::NonZeroUsize;

use log::info;
use machine_learning::{
    MlErr,
    arch::{Model, loss::SigmoidCrossEntropy},
    dataset::Dataset,
    metrics::Metric,
    optimization::Sgd,
    training::{History, ModelTrainer, checkpoint},
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Result,
    config::{Paths, TrainConfig},
    data::DataSplits,
    model::RetinaModel,
    weights::save_weights,
};

/// Trains the model over the train split, checkpointing the best epoch and saving the final
/// weights and the history next to it.
pub fn train(
    model: &RetinaModel,
    params: &mut [f32],
    data: &DataSplits,
    config: &TrainConfig,
    paths: &Paths,
) -> Result<History> {
    let graph = model.graph().clone();
    let optimizer = Sgd::new(
        graph.size(),
        config.learning_rate,
        config.decay,
        config.momentum,
        config.nesterov,
    )?;

    let batch_size = NonZeroUsize::new(config.batch_size).ok_or(MlErr::InvalidHyperParam {
        name: "batch size",
        value: 0.,
    })?;

    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut trainer = ModelTrainer::new(
        graph,
        optimizer,
        SigmoidCrossEntropy,
        vec![Metric::Accuracy, Metric::ImageAccuracy],
        config.epochs,
        batch_size,
        config.validation_split,
        rng,
    );

    let dataset = Dataset::new(data.train_images.clone(), data.train_labels.clone())?;
    info!(
        "training for {} epochs with batches of {}",
        config.epochs, config.batch_size
    );

    let history = trainer.fit_with(params, dataset, checkpoint(paths.checkpoint_file()))?;

    save_weights(model, params, paths)?;

    let history_file = paths.history_file(model.classification(), model.activation().name());
    history.save(&history_file)?;
    info!("saved the training history to {}", history_file.display());

    Ok(history)
}
