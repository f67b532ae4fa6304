use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use image::{GenericImageView, RgbImage};
use log::debug;
use ndarray::{Array2, Array3, Array4, Axis};
use rayon::prelude::*;

use crate::{
    Result, RetinaErr,
    config::{DataConfig, LabelEncoding},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modality {
    Image,
    Label,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Label => "label",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory holding the files of a split and modality:
/// `<data_root>/<dataset>/<split>/<modality>/`.
pub fn source_dir(data_root: &Path, config: &DataConfig, split: Split, modality: Modality) -> PathBuf {
    data_root
        .join(config.dataset.as_str())
        .join(split.as_str())
        .join(modality.as_str())
}

/// Decodes every file of a split and modality, in file name order.
///
/// Images become `(N, 3, S, S)` tensors in `[0, 1]` and labels `(N, C, S, S)` one-hot tensors,
/// `S` being the input size every file is center cropped to.
pub fn load_images(
    data_root: &Path,
    config: &DataConfig,
    split: Split,
    modality: Modality,
) -> Result<Array4<f32>> {
    let dir = source_dir(data_root, config, split, modality);

    let mut files = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(RetinaErr::EmptySplit(dir));
    }

    debug!("decoding {} files from {}", files.len(), dir.display());

    let samples = files
        .par_iter()
        .map(|path| match modality {
            Modality::Image => decode_image(path, config.input_size),
            Modality::Label => decode_label(
                path,
                config.input_size,
                config.classification,
                config.label_encoding,
            ),
        })
        .collect::<Result<Vec<_>>>()?;

    let views: Vec<_> = samples.iter().map(|sample| sample.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

/// Opens an image and computes the top-left corner of its centered `size x size` window.
fn open_centered(path: &Path, size: usize) -> Result<(image::DynamicImage, u32, u32)> {
    let img = image::open(path).map_err(|source| RetinaErr::Image {
        path: path.to_path_buf(),
        source,
    })?;

    let (w, h) = img.dimensions();
    let side = size as u32;

    if w < side || h < side {
        return Err(RetinaErr::ImageTooSmall {
            path: path.to_path_buf(),
            got: (w, h),
            expected: side,
        });
    }

    Ok((img, (w - side) / 2, (h - side) / 2))
}

fn decode_image(path: &Path, size: usize) -> Result<Array3<f32>> {
    let (img, x0, y0) = open_centered(path, size)?;
    let rgb: RgbImage = img.to_rgb8();

    Ok(Array3::from_shape_fn((3, size, size), |(c, y, x)| {
        rgb.get_pixel(x0 + x as u32, y0 + y as u32)[c] as f32 / 255.
    }))
}

fn decode_label(
    path: &Path,
    size: usize,
    classes: usize,
    encoding: LabelEncoding,
) -> Result<Array3<f32>> {
    let (img, x0, y0) = open_centered(path, size)?;
    let luma = img.to_luma8();

    let mut class_map = Array2::zeros((size, size));
    for ((y, x), class) in class_map.indexed_iter_mut() {
        let value = luma.get_pixel(x0 + x as u32, y0 + y as u32)[0];
        *class = class_of(value, classes, encoding).ok_or_else(|| RetinaErr::LabelOutOfRange {
            path: path.to_path_buf(),
            value,
            classes,
        })?;
    }

    Ok(Array3::from_shape_fn((classes, size, size), |(c, y, x)| {
        if class_map[[y, x]] == c { 1. } else { 0. }
    }))
}

/// Maps a gray level to its class, `None` if out of range.
pub fn class_of(value: u8, classes: usize, encoding: LabelEncoding) -> Option<usize> {
    let class = match encoding {
        LabelEncoding::Index => value as usize,
        LabelEncoding::Levels => value as usize * classes / 256,
    };

    (class < classes).then_some(class)
}
