mod conv2d;
mod crop;
mod dropout;
mod layer;
mod max_pool;
mod up_sample;

pub use conv2d::Conv2d;
pub use crop::Crop2d;
pub use dropout::Dropout;
pub use layer::Layer;
pub use max_pool::MaxPool2d;
pub use up_sample::UpSample2d;

/// The name and shape of one of the tensors a layer's parameters are made of, in layout order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamShape {
    pub name: &'static str,
    pub shape: Vec<usize>,
}

impl ParamShape {
    pub fn new(name: &'static str, shape: Vec<usize>) -> Self {
        Self { name, shape }
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
