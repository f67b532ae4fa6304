use std::path::Path;

use image::{GrayImage, Luma, Rgb, RgbImage};
use machine_learning::arch::activations::ActFn;
use ndarray::Array4;
use ndarray_npy::read_npy;
use retina::{
    app::App,
    config::{ArchConfig, DataConfig, DatasetSize, Paths, TrainConfig},
    model::RetinaModel,
    weights::{WeightSource, init_params, save_weights, transfer_weights},
};

const SIDE: u32 = 18;
const INPUT: usize = 16;

/// Vessel-like images: bright left half, labeled class 1 there and class 0 elsewhere.
fn write_split(root: &Path, split: &str, n: usize) {
    let base = root.join("small").join(split);
    std::fs::create_dir_all(base.join("image")).unwrap();
    std::fs::create_dir_all(base.join("label")).unwrap();

    for i in 0..n {
        let image = RgbImage::from_fn(SIDE, SIDE, |x, _| {
            let v = if x < SIDE / 2 { 200 } else { 20 } + i as u8;
            Rgb([v, v / 2, v / 3])
        });
        image.save(base.join("image").join(format!("{i:02}.png"))).unwrap();

        let label = GrayImage::from_fn(SIDE, SIDE, |x, _| Luma([(x < SIDE / 2) as u8]));
        label.save(base.join("label").join(format!("{i:02}.png"))).unwrap();
    }
}

fn test_app(root: &Path, train: bool) -> App {
    let mut paths = Paths::new(Some(root), root);
    paths.model_dir = root.join("models");

    App {
        activation: ActFn::relu(),
        arch: ArchConfig {
            input_size: INPUT,
            width_divisor: 64,
            side_channels: 2,
            seed: Some(3),
            ..Default::default()
        },
        data: DataConfig {
            dataset: DatasetSize::Small,
            classification: 2,
            input_size: INPUT,
            cache: true,
            ..Default::default()
        },
        train: train.then(|| TrainConfig {
            epochs: 2,
            batch_size: 2,
            predict_batch_size: 2,
            seed: Some(5),
            ..Default::default()
        }),
        weights: WeightSource {
            cache: true,
            transfer: None,
            seed: Some(7),
        },
        paths,
    }
}

#[test]
fn train_then_predict() {
    let dir = tempfile::tempdir().unwrap();
    write_split(dir.path(), "train", 4);
    write_split(dir.path(), "test", 3);

    let app = test_app(dir.path(), true);
    let outcome = app.run().unwrap();

    let history = outcome.history.unwrap();
    assert_eq!(history.epochs.len(), 2);
    assert!(history.epochs.iter().all(|record| record.loss.is_finite()));

    let paths = &app.paths;
    assert!(paths.weights_file(2, "relu").is_file());
    assert!(paths.history_file(2, "relu").is_file());
    assert!(paths.checkpoint_file().is_file());
    assert!(paths.image_cache(DatasetSize::Small).is_dir());

    assert_eq!(outcome.prediction, paths.prediction_file(0, 2, "relu"));
    let prediction: Array4<f32> = read_npy(&outcome.prediction).unwrap();
    assert_eq!(prediction.dim(), (3, 2, INPUT, INPUT));

    // A second run picks the cached weights and the next free prediction file.
    let outcome = test_app(dir.path(), false).run().unwrap();
    assert!(outcome.history.is_none());
    assert_eq!(outcome.prediction, paths.prediction_file(1, 2, "relu"));
    let again: Array4<f32> = read_npy(&outcome.prediction).unwrap();
    assert_eq!(again, prediction);
}

#[test]
fn transfer_skips_layers_that_do_not_fit() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), false);

    let source = RetinaModel::build(3, ActFn::relu(), &app.arch).unwrap();
    let source_params = init_params(&source, &app.paths, &app.weights).unwrap();
    let path = save_weights(&source, &source_params, &app.paths).unwrap();

    let target = RetinaModel::build(2, ActFn::relu(), &app.arch).unwrap();
    let mut params = init_params(&target, &app.paths, &WeightSource::default()).unwrap();
    let fuse_before = params[params.len() - 2..].to_vec();

    // Only the fuse convolution depends on the amount of classes.
    let restored = transfer_weights(&target, &mut params, &path).unwrap();
    assert_eq!(restored, target.graph().param_slots().len() - 1);
    assert_eq!(&params[..10], &source_params[..10]);
    assert_eq!(&params[params.len() - 2..], fuse_before.as_slice());
}
