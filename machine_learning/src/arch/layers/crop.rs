use ndarray::prelude::*;

use crate::{MlErr, Result, arch::Shape};

/// Removes `((top, bottom), (left, right))` rows and columns from the spatial borders.
#[derive(Clone, Debug)]
pub struct Crop2d {
    cropping: ((usize, usize), (usize, usize)),
    input_hw: (usize, usize),
}

impl Crop2d {
    pub fn new(cropping: ((usize, usize), (usize, usize))) -> Self {
        Self {
            cropping,
            input_hw: (0, 0),
        }
    }

    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        let [c, h, w] = input;
        let ((top, bottom), (left, right)) = self.cropping;

        if top + bottom >= h || left + right >= w {
            return Err(MlErr::ShapeMismatch {
                what: "cropping input".into(),
                got: input.to_vec(),
                expected: vec![c, top + bottom + 1, left + right + 1],
            });
        }

        Ok([c, h - top - bottom, w - left - right])
    }

    fn window(&self, (h, w): (usize, usize)) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let ((top, bottom), (left, right)) = self.cropping;
        (top..h - bottom, left..w - right)
    }

    pub fn forward(&mut self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (_, c, h, w) = x.dim();
        self.output_shape([c, h, w])?;
        self.input_hw = (h, w);

        let (rows, cols) = self.window((h, w));
        Ok(x.slice(s![.., .., rows, cols]).to_owned())
    }

    /// Pads the deltas back with zeros where the input was cropped.
    pub fn backward(&self, d: Array4<f32>) -> Result<Array4<f32>> {
        let (b, c, _, _) = d.dim();
        let (h, w) = self.input_hw;
        let (rows, cols) = self.window((h, w));

        let mut dx = Array4::zeros((b, c, h, w));
        dx.slice_mut(s![.., .., rows, cols]).assign(&d);
        Ok(dx)
    }
}
