pub mod cache;
mod loader;

use log::{debug, info, warn};
use ndarray::{Array4, Axis};

pub use loader::{Modality, Split, class_of, load_images, source_dir};

use crate::{
    Result, RetinaErr,
    config::{DataConfig, Paths},
};

/// The train and test tensors of a dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct DataSplits {
    pub train_images: Array4<f32>,
    pub train_labels: Array4<f32>,
    pub test_images: Array4<f32>,
    pub test_labels: Array4<f32>,
}

impl DataSplits {
    fn check_counts(&self) -> Result<()> {
        let pairs = [
            (Split::Train, &self.train_images, &self.train_labels),
            (Split::Test, &self.test_images, &self.test_labels),
        ];

        for (split, images, labels) in pairs {
            let (images, labels) = (images.len_of(Axis(0)), labels.len_of(Axis(0)));
            if images != labels {
                return Err(RetinaErr::SampleCountMismatch {
                    split: split.to_string(),
                    images,
                    labels,
                });
            }
        }

        Ok(())
    }

    fn classes(&self) -> usize {
        self.train_labels.len_of(Axis(1))
    }

    /// Height and width of the train images.
    fn side(&self) -> (usize, usize) {
        let (_, _, h, w) = self.train_images.dim();
        (h, w)
    }

    /// Whether the tensors were loaded with the class count and input size of `config`.
    fn fits(&self, config: &DataConfig) -> bool {
        let size = config.input_size;
        self.classes() == config.classification && self.side() == (size, size)
    }
}

/// Loads the train and test splits of the configured dataset.
///
/// With `reload` the cache is removed first. With `cache` the tensors are read from the cache
/// when it's complete, otherwise they're decoded from the source images and cached.
pub fn get_data(config: &DataConfig, paths: &Paths) -> Result<DataSplits> {
    let cache_dir = paths.image_cache(config.dataset);

    if config.reload {
        cache::clear(&cache_dir)?;
    }

    if config.cache {
        match cache::read(&cache_dir)? {
            Some(data) if data.fits(config) => {
                data.check_counts()?;
                info!("loaded the {} dataset from {}", config.dataset, cache_dir.display());
                return Ok(data);
            }
            Some(data) => warn!(
                "the cache at {} holds {} classes of {:?} pixels, not {} of {}x{}, reloading it",
                cache_dir.display(),
                data.classes(),
                data.side(),
                config.classification,
                config.input_size,
                config.input_size
            ),
            None => debug!("cache miss, loading the {} dataset from source", config.dataset),
        }
    }

    let load = |split, modality| load_images(&paths.data_root, config, split, modality);
    let data = DataSplits {
        train_images: load(Split::Train, Modality::Image)?,
        train_labels: load(Split::Train, Modality::Label)?,
        test_images: load(Split::Test, Modality::Image)?,
        test_labels: load(Split::Test, Modality::Label)?,
    };
    data.check_counts()?;

    info!(
        "loaded the {} dataset: {} train and {} test samples",
        config.dataset,
        data.train_images.len_of(Axis(0)),
        data.test_images.len_of(Axis(0))
    );

    if config.cache {
        cache::write(&cache_dir, &data)?;
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetSize;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::path::Path;

    fn write_split(root: &Path, split: &str, n: usize, labels: usize) {
        let base = root.join("small").join(split);
        std::fs::create_dir_all(base.join("image")).unwrap();
        std::fs::create_dir_all(base.join("label")).unwrap();

        for i in 0..n {
            RgbImage::from_pixel(5, 5, Rgb([i as u8, 0, 0]))
                .save(base.join("image").join(format!("{i:02}.png")))
                .unwrap();
        }
        for i in 0..labels {
            GrayImage::from_fn(5, 5, |x, _| Luma([(x % 3) as u8]))
                .save(base.join("label").join(format!("{i:02}.png")))
                .unwrap();
        }
    }

    fn config(cache: bool, reload: bool) -> DataConfig {
        DataConfig {
            dataset: DatasetSize::Small,
            classification: 3,
            input_size: 4,
            cache,
            reload,
            ..Default::default()
        }
    }

    #[test]
    fn small_dataset_with_three_classes() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "train", 3, 3);
        write_split(dir.path(), "test", 2, 2);
        let paths = Paths::new(Some(dir.path()), dir.path());

        let data = get_data(&config(false, false), &paths).unwrap();
        assert_eq!(data.train_images.dim(), (3, 3, 4, 4));
        assert_eq!(data.train_labels.dim(), (3, 3, 4, 4));
        assert_eq!(data.test_images.len_of(Axis(0)), data.test_labels.len_of(Axis(0)));
        assert_eq!(data.train_images[[2, 0, 0, 0]], 2. / 255.);
        assert!(!paths.image_cache(DatasetSize::Small).exists());
    }

    #[test]
    fn mismatched_counts_fail() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "train", 3, 2);
        write_split(dir.path(), "test", 2, 2);
        let paths = Paths::new(Some(dir.path()), dir.path());

        assert!(matches!(
            get_data(&config(false, false), &paths),
            Err(RetinaErr::SampleCountMismatch { images: 3, labels: 2, .. })
        ));
    }

    #[test]
    fn cache_is_written_then_used() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "train", 2, 2);
        write_split(dir.path(), "test", 1, 1);
        let paths = Paths::new(Some(dir.path()), dir.path());

        let loaded = get_data(&config(true, false), &paths).unwrap();
        assert!(paths.image_cache(DatasetSize::Small).join("train_images.safetensors").exists());

        // The sources are gone, only the cache can serve the data now.
        std::fs::remove_dir_all(dir.path().join("small")).unwrap();
        let cached = get_data(&config(true, false), &paths).unwrap();
        assert_eq!(cached, loaded);
    }

    #[test]
    fn cache_of_another_input_size_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "train", 2, 2);
        write_split(dir.path(), "test", 1, 1);
        let paths = Paths::new(Some(dir.path()), dir.path());

        get_data(&config(true, false), &paths).unwrap();

        let smaller = DataConfig {
            input_size: 3,
            ..config(true, false)
        };
        let data = get_data(&smaller, &paths).unwrap();
        assert_eq!(data.train_images.dim(), (2, 3, 3, 3));
        assert_eq!(data.test_labels.dim(), (1, 3, 3, 3));

        let cached = cache::read(&paths.image_cache(DatasetSize::Small))
            .unwrap()
            .unwrap();
        assert_eq!(cached, data);
    }

    #[test]
    fn reload_removes_the_cache_first() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "train", 2, 2);
        write_split(dir.path(), "test", 1, 1);
        let paths = Paths::new(Some(dir.path()), dir.path());
        let cache_dir = paths.image_cache(DatasetSize::Small);

        get_data(&config(true, false), &paths).unwrap();
        let stale = cache_dir.join("stale.safetensors");
        std::fs::write(&stale, b"stale").unwrap();

        get_data(&config(true, true), &paths).unwrap();
        assert!(!stale.exists());
        assert!(cache_dir.join("test_labels.safetensors").exists());
    }
}
