use std::{cell::RefCell, path::Path, path::PathBuf, rc::Rc};

use log::{debug, info};
use machine_learning::weights::WeightSet;
use rand::{SeedableRng, rngs::StdRng};

use crate::{Result, config::Paths, model::RetinaModel};

/// Where the initial parameters of a run come from, besides the random initialization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeightSource {
    /// Restore the keyed weight file of the model if it exists.
    pub cache: bool,
    /// Copy every matching layer of this weight file, used when there are no cached weights.
    pub transfer: Option<PathBuf>,
    pub seed: Option<u64>,
}

/// Creates the model's parameters: Glorot uniform kernels and zero biases, overwritten by the
/// cached weights when asked for and present, or else by the layers of the transfer file.
pub fn init_params(model: &RetinaModel, paths: &Paths, source: &WeightSource) -> Result<Vec<f32>> {
    let rng = match source.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let graph = model.graph();
    let mut params = graph.init_params(Rc::new(RefCell::new(rng)))?;

    let cached = paths.weights_file(model.classification(), model.activation().name());
    if source.cache && cached.is_file() {
        let restored = WeightSet::load(&cached)?.restore(graph, &mut params)?;
        info!("restored {restored} layers from {}", cached.display());
        return Ok(params);
    }

    if source.cache {
        debug!("no cached weights at {}", cached.display());
    }

    if let Some(transfer) = &source.transfer {
        let restored = transfer_weights(model, &mut params, transfer)?;
        info!("transferred {restored} layers from {}", transfer.display());
    }

    Ok(params)
}

/// Copies the layers of the weight file at `path` whose names and shapes match the model's.
///
/// # Returns
/// The amount of layers copied.
pub fn transfer_weights(model: &RetinaModel, params: &mut [f32], path: &Path) -> Result<usize> {
    Ok(WeightSet::load(path)?.restore(model.graph(), params)?)
}

/// Saves the parameters to the model's keyed weight file.
pub fn save_weights(model: &RetinaModel, params: &[f32], paths: &Paths) -> Result<PathBuf> {
    let path = paths.weights_file(model.classification(), model.activation().name());
    WeightSet::capture(model.graph(), params)?.save(&path)?;
    info!("saved the weights to {}", path.display());
    Ok(path)
}
