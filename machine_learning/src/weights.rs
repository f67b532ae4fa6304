use std::{collections::BTreeMap, fs, path::Path};

use log::{debug, warn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{
    MlErr, Result,
    arch::{Graph, Model},
};

#[derive(Clone, Debug, PartialEq)]
struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// A snapshot of a graph's parameters keyed by `<layer>/<param>`, e.g. `conv1_1/kernel`.
///
/// Weight sets are stored as safetensors files and restored by layer name, so a set captured
/// from one graph can seed any other graph sharing some of its layers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightSet {
    tensors: BTreeMap<String, Tensor>,
}

impl WeightSet {
    /// Captures the parameters of every parametrized layer of `graph`.
    ///
    /// # Returns
    /// An error if `params` doesn't match the graph's size.
    pub fn capture(graph: &Graph, params: &[f32]) -> Result<Self> {
        if params.len() != graph.size() {
            return Err(MlErr::SizeMismatch {
                what: "captured params",
                got: params.len(),
                expected: graph.size(),
            });
        }

        let mut tensors = BTreeMap::new();

        for slot in graph.param_slots() {
            let mut offset = slot.offset;

            for shape in slot.shapes {
                let len = shape.len();
                tensors.insert(
                    format!("{}/{}", slot.layer, shape.name),
                    Tensor {
                        shape: shape.shape,
                        data: params[offset..offset + len].to_vec(),
                    },
                );
                offset += len;
            }
        }

        Ok(Self { tensors })
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Copies the stored parameters into the layers of `graph` with matching names.
    ///
    /// Layers with no stored tensors are left untouched, as are layers whose stored tensors
    /// have different shapes.
    ///
    /// # Returns
    /// The amount of layers that were restored.
    pub fn restore(&self, graph: &Graph, params: &mut [f32]) -> Result<usize> {
        if params.len() != graph.size() {
            return Err(MlErr::SizeMismatch {
                what: "restored params",
                got: params.len(),
                expected: graph.size(),
            });
        }

        let mut restored = 0;

        'slots: for slot in graph.param_slots() {
            let mut found = Vec::with_capacity(slot.shapes.len());

            for shape in &slot.shapes {
                let key = format!("{}/{}", slot.layer, shape.name);

                let Some(tensor) = self.tensors.get(&key) else {
                    debug!("no stored weights for {key}, keeping its current values");
                    continue 'slots;
                };

                if tensor.shape != shape.shape {
                    warn!(
                        "stored weights for {key} are shaped {:?} but the layer expects {:?}, skipping {}",
                        tensor.shape, shape.shape, slot.layer
                    );
                    continue 'slots;
                }

                found.push(tensor);
            }

            let mut offset = slot.offset;
            for tensor in found {
                params[offset..offset + tensor.data.len()].copy_from_slice(&tensor.data);
                offset += tensor.data.len();
            }

            restored += 1;
        }

        Ok(restored)
    }

    /// Writes the set to a safetensors file at `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let views = self
            .tensors
            .iter()
            .map(|(name, tensor)| -> Result<_> {
                let bytes: &[u8] = bytemuck::cast_slice(tensor.data.as_slice());
                Ok((name.as_str(), TensorView::new(Dtype::F32, tensor.shape.clone(), bytes)?))
            })
            .collect::<Result<Vec<_>>>()?;

        safetensors::serialize_to_file(views, &None, path)?;
        debug!("saved {} tensors to {}", self.len(), path.display());
        Ok(())
    }

    /// Reads a set from the safetensors file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        let file = SafeTensors::deserialize(&bytes)?;
        let mut tensors = BTreeMap::new();

        for (name, view) in file.tensors() {
            if view.dtype() != Dtype::F32 {
                return Err(MlErr::UnsupportedDtype(name));
            }

            let tensor = Tensor {
                shape: view.shape().to_vec(),
                data: bytemuck::pod_collect_to_vec(view.data()),
            };
            tensors.insert(name, tensor);
        }

        Ok(Self { tensors })
    }
}
