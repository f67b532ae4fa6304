use std::{error::Error, fmt, io, path::PathBuf};

use image::ImageError;
use machine_learning::MlErr;
use ndarray_npy::WriteNpyError;
use safetensors::SafeTensorError;

/// The retina module's result type.
pub type Result<T> = std::result::Result<T, RetinaErr>;

/// Failures while building, feeding or running the retina model.
#[derive(Debug)]
pub enum RetinaErr {
    Io(io::Error),
    Ml(MlErr),
    Image {
        path: PathBuf,
        source: ImageError,
    },
    ImageTooSmall {
        path: PathBuf,
        got: (u32, u32),
        expected: u32,
    },
    LabelOutOfRange {
        path: PathBuf,
        value: u8,
        classes: usize,
    },
    SampleCountMismatch {
        split: String,
        images: usize,
        labels: usize,
    },
    EmptySplit(PathBuf),
    Cache {
        path: PathBuf,
        reason: String,
    },
    Tensors(SafeTensorError),
    Npy(WriteNpyError),
}

impl fmt::Display for RetinaErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetinaErr::Io(e) => write!(f, "io error: {e}"),
            RetinaErr::Ml(e) => write!(f, "model error: {e}"),
            RetinaErr::Image { path, source } => {
                write!(f, "couldn't decode {}: {source}", path.display())
            }
            RetinaErr::ImageTooSmall {
                path,
                got: (w, h),
                expected,
            } => write!(
                f,
                "{} is {w}x{h}, smaller than the {expected}x{expected} input",
                path.display()
            ),
            RetinaErr::LabelOutOfRange {
                path,
                value,
                classes,
            } => write!(
                f,
                "{} has label value {value}, out of range for {classes} classes",
                path.display()
            ),
            RetinaErr::SampleCountMismatch {
                split,
                images,
                labels,
            } => write!(
                f,
                "the {split} split has {images} images but {labels} labels"
            ),
            RetinaErr::EmptySplit(dir) => write!(f, "no images found in {}", dir.display()),
            RetinaErr::Cache { path, reason } => {
                write!(f, "invalid cache file {}: {reason}", path.display())
            }
            RetinaErr::Tensors(e) => write!(f, "tensor container error: {e}"),
            RetinaErr::Npy(e) => write!(f, "npy error: {e}"),
        }
    }
}

impl Error for RetinaErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RetinaErr::Io(e) => Some(e),
            RetinaErr::Ml(e) => Some(e),
            RetinaErr::Image { source, .. } => Some(source),
            RetinaErr::Tensors(e) => Some(e),
            RetinaErr::Npy(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RetinaErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for RetinaErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<SafeTensorError> for RetinaErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Tensors(value)
    }
}

impl From<WriteNpyError> for RetinaErr {
    fn from(value: WriteNpyError) -> Self {
        Self::Npy(value)
    }
}

impl From<ndarray::ShapeError> for RetinaErr {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Ml(MlErr::Shape(value))
    }
}
