mod history;
mod model_trainer;

pub use history::{EpochRecord, History};
pub use model_trainer::{ModelTrainer, checkpoint};
