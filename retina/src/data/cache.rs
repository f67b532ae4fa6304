use std::{fs, io, path::Path};

use log::debug;
use ndarray::Array4;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use super::DataSplits;
use crate::{Result, RetinaErr};

/// Key of the single tensor stored in every cache file.
pub const TENSOR_KEY: &str = "image";

pub const TRAIN_IMAGES: &str = "train_images";
pub const TRAIN_LABELS: &str = "train_labels";
pub const TEST_IMAGES: &str = "test_images";
pub const TEST_LABELS: &str = "test_labels";

const FILES: [&str; 4] = [TRAIN_IMAGES, TRAIN_LABELS, TEST_IMAGES, TEST_LABELS];

fn file(dir: &Path, name: &str) -> std::path::PathBuf {
    dir.join(format!("{name}.safetensors"))
}

/// Removes the cache directory and everything in it, a missing directory is not an error.
pub fn clear(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            debug!("removed the cache at {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Reads the four cached tensors from `dir`.
///
/// # Returns
/// `None` if the directory or any of the files is missing, or an error if a file exists but
/// can't be read.
pub fn read(dir: &Path) -> Result<Option<DataSplits>> {
    if let Some(missing) = FILES.iter().find(|name| !file(dir, name).is_file()) {
        debug!("no cached {missing} in {}", dir.display());
        return Ok(None);
    }

    Ok(Some(DataSplits {
        train_images: read_tensor(&file(dir, TRAIN_IMAGES))?,
        train_labels: read_tensor(&file(dir, TRAIN_LABELS))?,
        test_images: read_tensor(&file(dir, TEST_IMAGES))?,
        test_labels: read_tensor(&file(dir, TEST_LABELS))?,
    }))
}

/// Writes the four tensors to `dir`, creating it if needed.
pub fn write(dir: &Path, data: &DataSplits) -> Result<()> {
    fs::create_dir_all(dir)?;

    let tensors = [
        (TRAIN_IMAGES, &data.train_images),
        (TRAIN_LABELS, &data.train_labels),
        (TEST_IMAGES, &data.test_images),
        (TEST_LABELS, &data.test_labels),
    ];

    for (name, tensor) in tensors {
        write_tensor(&file(dir, name), tensor)?;
    }

    debug!("cached the dataset in {}", dir.display());
    Ok(())
}

fn read_tensor(path: &Path) -> Result<Array4<f32>> {
    let invalid = |reason: String| RetinaErr::Cache {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = fs::read(path)?;
    let container = SafeTensors::deserialize(&bytes)?;
    let view = container.tensor(TENSOR_KEY)?;

    if view.dtype() != Dtype::F32 {
        return Err(invalid(format!("expected f32 data, got {:?}", view.dtype())));
    }

    let &[n, c, h, w] = view.shape() else {
        return Err(invalid(format!("expected 4 dimensions, got {:?}", view.shape())));
    };

    let data: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
    Ok(Array4::from_shape_vec((n, c, h, w), data)?)
}

fn write_tensor(path: &Path, tensor: &Array4<f32>) -> Result<()> {
    let data: Vec<f32> = tensor.iter().copied().collect();
    let view = TensorView::new(
        Dtype::F32,
        tensor.shape().to_vec(),
        bytemuck::cast_slice(data.as_slice()),
    )?;

    safetensors::serialize_to_file([(TENSOR_KEY, view)], &None, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splits() -> DataSplits {
        DataSplits {
            train_images: Array4::from_shape_fn((2, 3, 2, 2), |(n, c, y, x)| (n + c + y + x) as f32),
            train_labels: Array4::ones((2, 3, 2, 2)),
            test_images: Array4::zeros((1, 3, 2, 2)),
            test_labels: Array4::from_elem((1, 3, 2, 2), 0.5),
        }
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("small").join("image");

        write(&cache, &splits()).unwrap();
        let read = read(&cache).unwrap().unwrap();

        assert_eq!(read.train_images, splits().train_images);
        assert_eq!(read.test_labels, splits().test_labels);
    }

    #[test]
    fn incomplete_cache_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(&dir.path().join("missing")).unwrap().is_none());

        write(dir.path(), &splits()).unwrap();
        fs::remove_file(file(dir.path(), TEST_LABELS)).unwrap();
        assert!(read(dir.path()).unwrap().is_none());
    }

    #[test]
    fn clearing_a_missing_cache_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");

        clear(&cache).unwrap();
        write(&cache, &splits()).unwrap();
        clear(&cache).unwrap();
        assert!(!cache.exists());
    }
}
