use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;
use safetensors::SafeTensorError;

use crate::initialization::RandErr;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        what: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    DuplicateNode(String),
    UnknownNode(String),
    UnknownActivation(String),
    InvalidHyperParam {
        name: &'static str,
        value: f32,
    },
    MissingForward(&'static str),
    EmptyDataset,
    Shape(ShapeError),
    Rand(RandErr),
    UnsupportedDtype(String),
    Weights(SafeTensorError),
    Json(serde_json::Error),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a shape mismatch in {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::DuplicateNode(name) => write!(f, "A node named {name} already exists"),
            MlErr::UnknownNode(name) => write!(f, "There's no node named {name}"),
            MlErr::UnknownActivation(name) => write!(f, "Unknown activation function {name}"),
            MlErr::InvalidHyperParam { name, value } => {
                write!(f, "Invalid value {value} for hyper parameter {name}")
            }
            MlErr::MissingForward(layer) => write!(
                f,
                "Tried to backpropagate through a {layer} layer before a training forward pass"
            ),
            MlErr::EmptyDataset => write!(f, "The dataset has no samples"),
            MlErr::UnsupportedDtype(name) => {
                write!(f, "The tensor {name} isn't stored as 32 bit floats")
            }
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::Rand(e) => write!(f, "random generator error: {e}"),
            MlErr::Weights(e) => write!(f, "weight file error: {e}"),
            MlErr::Json(e) => write!(f, "json error: {e}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Rand(e) => Some(e),
            MlErr::Weights(e) => Some(e),
            MlErr::Json(e) => Some(e),
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<RandErr> for MlErr {
    fn from(value: RandErr) -> Self {
        Self::Rand(value)
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Weights(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
