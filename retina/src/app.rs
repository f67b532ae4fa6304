use std::path::PathBuf;

use log::info;
use machine_learning::{arch::activations::ActFn, training::History};
use ndarray::Axis;

use crate::{
    Result,
    cli::Cli,
    config::{ArchConfig, DataConfig, Paths, TrainConfig},
    data::get_data,
    model::RetinaModel,
    predict::{predict, save_prediction},
    run::train,
    weights::{WeightSource, init_params},
};

/// Everything a run needs: build the model, initialize its weights, load the data, optionally
/// train and finally predict the test split.
#[derive(Clone, Debug)]
pub struct App {
    pub activation: ActFn,
    pub arch: ArchConfig,
    pub data: DataConfig,
    pub train: Option<TrainConfig>,
    pub weights: WeightSource,
    pub paths: Paths,
}

/// What a run produced.
#[derive(Debug)]
pub struct Outcome {
    pub history: Option<History>,
    pub prediction: PathBuf,
}

impl App {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        Ok(Self {
            activation: cli.activation.parse()?,
            arch: ArchConfig::from(cli),
            data: DataConfig::from(cli),
            train: cli.train.then(|| TrainConfig::from(cli)),
            weights: WeightSource {
                cache: cli.cache,
                transfer: cli.transfer.clone(),
                seed: cli.seed,
            },
            paths: Paths::from_env(cli.data_dir.clone()),
        })
    }

    pub fn run(&self) -> Result<Outcome> {
        let mut model = RetinaModel::build(self.data.classification, self.activation, &self.arch)?;
        let mut params = init_params(&model, &self.paths, &self.weights)?;

        let data = get_data(&self.data, &self.paths)?;
        info!(
            "train images {:?}, test labels {:?}",
            data.train_images.dim(),
            data.test_labels.dim()
        );

        let history = match &self.train {
            Some(config) => Some(train(&model, &mut params, &data, config, &self.paths)?),
            None => None,
        };

        let batch_size = self
            .train
            .as_ref()
            .map_or(TrainConfig::default().predict_batch_size, |c| c.predict_batch_size);
        let prediction = predict(&mut model, &params, data.test_images.view(), batch_size)?;
        info!(
            "first prediction spans [{}, {}]",
            prediction
                .index_axis(Axis(0), 0)
                .fold(f32::INFINITY, |m, &v| m.min(v)),
            prediction
                .index_axis(Axis(0), 0)
                .fold(f32::NEG_INFINITY, |m, &v| m.max(v))
        );

        let prediction = save_prediction(
            &prediction,
            &self.paths,
            self.data.classification,
            self.activation.name(),
        )?;

        Ok(Outcome {
            history,
            prediction,
        })
    }
}
