pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod predict;
pub mod run;
pub mod weights;

pub use error::{Result, RetinaErr};
