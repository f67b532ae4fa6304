#![cfg(test)]

use std::{cell::RefCell, num::NonZeroUsize, rc::Rc};

use ndarray::{Array4, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    arch::{
        Graph, GraphBuilder, Model,
        activations::ActFn,
        layers::Layer,
        loss::{LossFn, SigmoidCrossEntropy},
    },
    dataset::Dataset,
    metrics::Metric,
    optimization::Sgd,
    training::{ModelTrainer, checkpoint},
    weights::WeightSet,
};

/// Pixels are labeled by the sign of the sum of their two channels, a 1x1 convolution can
/// learn it.
fn sign_dataset(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array4::from_shape_simple_fn((n, 2, 3, 3), || rng.random_range(-1.0..1.0f32));

    let y = Array4::from_shape_fn((n, 2, 3, 3), |(i, c, h, w)| {
        let positive = x[[i, 0, h, w]] + x[[i, 1, h, w]] > 0.;
        if (c == 1) == positive { 1. } else { 0. }
    });

    Dataset::new(x, y).unwrap()
}

fn small_graph() -> Graph {
    let mut builder = GraphBuilder::new("input", [2, 3, 3]);
    let input = builder.input();
    let hidden = builder
        .add("hidden", Layer::conv2d(2, 4, (1, 1), Some(ActFn::Tanh)), input)
        .unwrap();
    let drop = builder.add("drop", Layer::dropout(0.1, Some(1)).unwrap(), hidden).unwrap();
    let out = builder
        .add("out", Layer::conv2d(4, 2, (1, 1), None), drop)
        .unwrap();
    builder.build(out)
}

#[test]
fn test_ml_pixel_sign_convergence() {
    let dataset = sign_dataset(40, 1);
    let graph = small_graph();

    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(2)));
    let mut params = graph.init_params(rng).unwrap();

    let optimizer = Sgd::new(graph.size(), 0.5, 1e-4, 0.9, true).unwrap();
    let mut trainer = ModelTrainer::new(
        graph,
        optimizer,
        SigmoidCrossEntropy,
        vec![Metric::Accuracy, Metric::ImageAccuracy],
        60,
        NonZeroUsize::new(5).unwrap(),
        0.1,
        StdRng::seed_from_u64(3),
    );

    let dir = tempfile::tempdir().unwrap();
    let checkpoint_path = dir.path().join("checkpoint_weights.safetensors");
    let history = trainer
        .fit_with(&mut params, dataset, checkpoint(&checkpoint_path))
        .unwrap();

    assert_eq!(history.epochs.len(), 60);
    let first = &history.epochs[0];
    let last = history.last().unwrap();
    assert!(last.loss < first.loss, "{} >= {}", last.loss, first.loss);
    assert!(last.val_loss.is_some());
    assert!(checkpoint_path.exists());

    let test = sign_dataset(10, 4);
    let y_pred = trainer
        .model_mut()
        .predict(&params, test.x(), 4)
        .unwrap();
    assert_eq!(y_pred.len_of(Axis(0)), 10);

    let accuracy = Metric::Accuracy.compute(y_pred.view(), test.y()).unwrap();
    assert!(accuracy > 0.8, "accuracy {accuracy}");

    // The checkpoint holds the best epoch, which can't be worse than the first one.
    let mut restored = vec![0.; params.len()];
    let weights = WeightSet::load(&checkpoint_path).unwrap();
    assert_eq!(weights.restore(trainer.model(), &mut restored).unwrap(), 2);

    let (val_x, val_y) = (test.x(), test.y());
    let restored_pred = trainer
        .model_mut()
        .predict(&restored, val_x, 10)
        .unwrap();
    let restored_loss = SigmoidCrossEntropy.loss(restored_pred.view(), val_y).unwrap();
    assert!(restored_loss.is_finite());
}

#[test]
fn test_ml_checkpoint_holds_the_best_epoch() {
    let dataset = sign_dataset(30, 5);
    let graph = small_graph();

    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(6)));
    let mut params = graph.init_params(rng).unwrap();

    // A large learning rate makes the validation loss bounce, so the best epoch is rarely the
    // last one.
    let optimizer = Sgd::new(graph.size(), 1., 0., 0.9, true).unwrap();
    let mut trainer = ModelTrainer::new(
        graph,
        optimizer,
        SigmoidCrossEntropy,
        vec![Metric::Accuracy],
        25,
        NonZeroUsize::new(4).unwrap(),
        0.2,
        StdRng::seed_from_u64(7),
    );

    let dir = tempfile::tempdir().unwrap();
    let checkpoint_path = dir.path().join("checkpoint_weights.safetensors");
    let mut save = checkpoint(&checkpoint_path);
    let mut saved = Vec::new();

    let history = trainer
        .fit_with(&mut params, dataset.clone(), |graph, params, record| {
            saved.push((record.epoch, params.to_vec()));
            save(graph, params, record)
        })
        .unwrap();

    let best = history.best().unwrap();
    let (last_epoch, best_params) = saved.last().unwrap();
    assert_eq!(*last_epoch, best.epoch);

    let losses: Vec<_> = saved
        .iter()
        .map(|(epoch, _)| history.epochs[epoch - 1].monitored_loss())
        .collect();
    assert!(losses.windows(2).all(|pair| pair[1] < pair[0]), "{losses:?}");

    let mut restored = vec![0.; params.len()];
    let weights = WeightSet::load(&checkpoint_path).unwrap();
    assert_eq!(weights.restore(trainer.model(), &mut restored).unwrap(), 2);
    assert_eq!(&restored, best_params);

    let (_, validation) = dataset.split_validation(0.2).unwrap();
    let (val_loss, _) = trainer
        .evaluate(&restored, &validation.unwrap())
        .unwrap();
    let best_val_loss = best.val_loss.unwrap();
    assert!(
        (val_loss - best_val_loss).abs() < 1e-5,
        "{val_loss} vs {best_val_loss}"
    );
}
