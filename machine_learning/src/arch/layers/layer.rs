use std::{cell::RefCell, rc::Rc};

use ndarray::{Array4, ArrayView4};
use rand::Rng;

use super::{Conv2d, Crop2d, Dropout, MaxPool2d, ParamShape, UpSample2d};
use crate::{
    Result,
    arch::{Mode, Shape, activations::ActFn},
    initialization::ParamGen,
};

#[derive(Clone, Debug)]
pub enum Layer {
    Conv2d(Conv2d),
    MaxPool2d(MaxPool2d),
    UpSample2d(UpSample2d),
    Crop2d(Crop2d),
    Dropout(Dropout),
}

impl Layer {
    pub fn conv2d(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        act_fn: Option<ActFn>,
    ) -> Self {
        Self::Conv2d(Conv2d::new(in_channels, out_channels, kernel, act_fn))
    }

    pub fn max_pool(pool: usize) -> Self {
        Self::MaxPool2d(MaxPool2d::new(pool))
    }

    pub fn up_sample(factor: usize) -> Self {
        Self::UpSample2d(UpSample2d::new(factor))
    }

    pub fn crop(cropping: ((usize, usize), (usize, usize))) -> Self {
        Self::Crop2d(Crop2d::new(cropping))
    }

    pub fn dropout(rate: f32, seed: Option<u64>) -> Result<Self> {
        Ok(Self::Dropout(Dropout::new(rate, seed)?))
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Self::Conv2d(l) => l.size(),
            _ => 0,
        }
    }

    /// Computes the shape of this layer's output for a given input shape.
    ///
    /// # Returns
    /// An error if the layer can't take an input of that shape.
    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        match self {
            Self::Conv2d(l) => l.output_shape(input),
            Self::MaxPool2d(l) => l.output_shape(input),
            Self::UpSample2d(l) => l.output_shape(input),
            Self::Crop2d(l) => l.output_shape(input),
            Self::Dropout(_) => Ok(input),
        }
    }

    pub fn param_shapes(&self) -> Vec<ParamShape> {
        match self {
            Self::Conv2d(l) => l.param_shapes(),
            _ => Vec::new(),
        }
    }

    pub fn param_gens<R>(&self, rng: Rc<RefCell<R>>) -> Result<Vec<Box<dyn ParamGen>>>
    where
        R: Rng + 'static,
    {
        match self {
            Self::Conv2d(l) => l.param_gens(rng),
            _ => Ok(Vec::new()),
        }
    }

    /// Makes a forward pass through the layer.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of the model's parameters.
    /// * `x` - The input batch.
    /// * `mode` - Whether the pass is part of training, only then is backward metadata kept.
    pub fn forward(
        &mut self,
        params: &[f32],
        x: ArrayView4<f32>,
        mode: Mode,
    ) -> Result<Array4<f32>> {
        match self {
            Self::Conv2d(l) => l.forward(params, x, mode),
            Self::MaxPool2d(l) => l.forward(x, mode),
            Self::UpSample2d(l) => l.forward(x),
            Self::Crop2d(l) => l.forward(x),
            Self::Dropout(l) => l.forward(x, mode),
        }
    }

    /// Makes a backward pass through the layer, writing its gradient into `grad`.
    ///
    /// # Returns
    /// The deltas with respect to the layer's input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        match self {
            Self::Conv2d(l) => l.backward(params, grad, d),
            Self::MaxPool2d(l) => l.backward(d),
            Self::UpSample2d(l) => l.backward(d),
            Self::Crop2d(l) => l.backward(d),
            Self::Dropout(l) => l.backward(d),
        }
    }
}
