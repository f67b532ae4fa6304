use std::path::PathBuf;

use clap::Parser;

use crate::config::{
    ArchConfig, DEFAULT_INPUT_SIZE, DataConfig, DatasetSize, LabelEncoding, TrainConfig,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "retina", version, about = "Multi-scale retina segmentation network")]
pub struct Cli {
    /// Cache data and weights wherever possible
    #[arg(short, long)]
    pub cache: bool,

    /// Amount of classes each pixel is segmented into
    #[arg(short = 't', long, default_value_t = 4)]
    pub classification: usize,

    /// Which dataset to read
    #[arg(short, long, value_enum, default_value_t = DatasetSize::Big)]
    pub dataset: DatasetSize,

    /// Remove the data cache before loading
    #[arg(short, long)]
    pub reload: bool,

    /// Activation function of the tower convolutions
    #[arg(short, long, default_value = "relu")]
    pub activation: String,

    /// Log level used when RUST_LOG is unset
    #[arg(short = 'l', long, default_value = "INFO")]
    pub log_level: String,

    /// Train the model before predicting
    #[arg(long)]
    pub train: bool,

    #[arg(long, default_value_t = 1000)]
    pub epochs: usize,

    #[arg(long, default_value_t = 5)]
    pub batch_size: usize,

    /// Root of the raw datasets, laid out as <dataset>/<split>/<image|label>/
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Side of the square window cropped from the center of every image
    #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
    pub input_size: usize,

    /// Divides the filter count of every tower, for quick runs on small machines
    #[arg(long, default_value_t = 1)]
    pub width_divisor: usize,

    /// How label gray levels map to classes
    #[arg(long, value_enum, default_value_t = LabelEncoding::Index)]
    pub label_encoding: LabelEncoding,

    /// Copy matching layers from this weight file when there are no cached weights
    #[arg(long)]
    pub transfer: Option<PathBuf>,

    /// Seed for weight initialization, dropout and shuffling
    #[arg(long)]
    pub seed: Option<u64>,
}

impl From<&Cli> for ArchConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            input_size: cli.input_size,
            width_divisor: cli.width_divisor,
            seed: cli.seed,
            ..Default::default()
        }
    }
}

impl From<&Cli> for DataConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            dataset: cli.dataset,
            classification: cli.classification,
            input_size: cli.input_size,
            label_encoding: cli.label_encoding,
            cache: cli.cache,
            reload: cli.reload,
        }
    }
}

impl From<&Cli> for TrainConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            epochs: cli.epochs,
            batch_size: cli.batch_size,
            seed: cli.seed,
            ..Default::default()
        }
    }
}
