pub mod arch;
pub mod dataset;
pub mod error;
pub mod initialization;
pub mod metrics;
pub mod optimization;
mod test;
pub mod training;
pub mod weights;

pub use error::{MlErr, Result};
