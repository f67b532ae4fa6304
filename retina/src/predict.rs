use std::{fs, path::PathBuf};

use log::info;
use machine_learning::arch::Model;
use ndarray::{Array4, ArrayView4};
use ndarray_npy::write_npy;

use crate::{Result, config::Paths, model::RetinaModel};

/// Runs inference over `images` in batches, dropout disabled.
pub fn predict(
    model: &mut RetinaModel,
    params: &[f32],
    images: ArrayView4<f32>,
    batch_size: usize,
) -> Result<Array4<f32>> {
    let prediction = model.graph_mut().predict(params, images, batch_size)?;
    info!("predicted {:?}", prediction.dim());
    Ok(prediction)
}

/// Writes the raw prediction to the first free `test_predict<n>_class_<C>_<activation>.npy`.
pub fn save_prediction(
    prediction: &Array4<f32>,
    paths: &Paths,
    classification: usize,
    activation: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(&paths.model_dir)?;

    let path = (0..)
        .map(|n| paths.prediction_file(n, classification, activation))
        .find(|path| !path.exists())
        .unwrap_or_else(|| paths.prediction_file(0, classification, activation));

    write_npy(&path, prediction)?;
    info!("saved the prediction to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predictions_never_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths {
            model_dir: dir.path().join("cache"),
            ..Paths::new(None, "data")
        };
        let prediction = Array4::zeros((1, 2, 3, 3));

        let first = save_prediction(&prediction, &paths, 2, "relu").unwrap();
        let second = save_prediction(&prediction, &paths, 2, "relu").unwrap();

        assert_eq!(first.file_name().unwrap(), "test_predict0_class_2_relu.npy");
        assert_eq!(second.file_name().unwrap(), "test_predict1_class_2_relu.npy");
    }
}
