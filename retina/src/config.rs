use std::{
    env,
    fmt,
    path::{Path, PathBuf},
};

use clap::ValueEnum;

/// Side of the square images the model takes by default.
pub const DEFAULT_INPUT_SIZE: usize = 565;

/// Environment variable pointing to the scratch volume the data cache lives in.
pub const SCRATCH_VAR: &str = "SCRATCH";

/// Which corpus the splits are read from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum DatasetSize {
    Small,
    #[default]
    Big,
}

impl DatasetSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Big => "big",
        }
    }
}

impl fmt::Display for DatasetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the gray level of a label pixel maps to its class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LabelEncoding {
    /// The pixel value is the class index.
    #[default]
    Index,
    /// The 256 gray levels are split into equally sized bands, one per class.
    Levels,
}

/// The shape and regularization of the retina network.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchConfig {
    pub input_size: usize,
    pub in_channels: usize,
    /// Every tower's filter count is divided by this, down to a minimum of one filter.
    pub width_divisor: usize,
    pub side_channels: usize,
    pub side_kernel: usize,
    pub dropout: f32,
    pub seed: Option<u64>,
}

impl ArchConfig {
    pub fn filters(&self, base: usize) -> usize {
        (base / self.width_divisor.max(1)).max(1)
    }
}

impl Default for ArchConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            in_channels: 3,
            width_divisor: 1,
            side_channels: 16,
            side_kernel: 1,
            dropout: 0.2,
            seed: None,
        }
    }
}

/// Optimizer and fit loop settings.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    pub learning_rate: f32,
    pub decay: f32,
    pub momentum: f32,
    pub nesterov: bool,
    pub epochs: usize,
    pub batch_size: usize,
    pub predict_batch_size: usize,
    pub validation_split: f32,
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            decay: 1e-4,
            momentum: 0.9,
            nesterov: true,
            epochs: 1000,
            batch_size: 5,
            predict_batch_size: 10,
            validation_split: 0.05,
            seed: None,
        }
    }
}

/// What data to load and whether to go through the cache.
#[derive(Clone, Debug, PartialEq)]
pub struct DataConfig {
    pub dataset: DatasetSize,
    pub classification: usize,
    pub input_size: usize,
    pub label_encoding: LabelEncoding,
    pub cache: bool,
    pub reload: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetSize::default(),
            classification: 4,
            input_size: DEFAULT_INPUT_SIZE,
            label_encoding: LabelEncoding::default(),
            cache: false,
            reload: false,
        }
    }
}

/// Where everything is read from and written to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    pub cache_root: PathBuf,
    pub model_dir: PathBuf,
    pub data_root: PathBuf,
}

impl Paths {
    /// Resolves the cache root from the `SCRATCH` environment variable, falling back to the
    /// working directory.
    pub fn from_env(data_root: impl Into<PathBuf>) -> Self {
        let scratch = env::var_os(SCRATCH_VAR).filter(|s| !s.is_empty());
        Self::new(scratch.as_deref().map(Path::new), data_root)
    }

    /// # Args
    /// * `scratch` - The scratch volume, the cache goes under `<scratch>/cache` or `./cache`.
    /// * `data_root` - The directory holding the raw datasets.
    pub fn new(scratch: Option<&Path>, data_root: impl Into<PathBuf>) -> Self {
        let cache_root = scratch.unwrap_or(Path::new(".")).join("cache");

        Self {
            cache_root,
            model_dir: PathBuf::from("cache"),
            data_root: data_root.into(),
        }
    }

    /// Directory of the cached image and label tensors of a dataset.
    pub fn image_cache(&self, dataset: DatasetSize) -> PathBuf {
        self.cache_root.join(dataset.as_str()).join("image")
    }

    pub fn weights_file(&self, classification: usize, activation: &str) -> PathBuf {
        self.model_dir
            .join(format!("retina_weights_{classification}class_{activation}.safetensors"))
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.model_dir.join("checkpoint_weights.safetensors")
    }

    pub fn history_file(&self, classification: usize, activation: &str) -> PathBuf {
        self.model_dir
            .join(format!("retina_history_{classification}class_{activation}.json"))
    }

    pub fn prediction_file(&self, n: usize, classification: usize, activation: &str) -> PathBuf {
        self.model_dir
            .join(format!("test_predict{n}_class_{classification}_{activation}.npy"))
    }
}
