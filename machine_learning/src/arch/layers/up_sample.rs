use ndarray::{Zip, prelude::*};

use crate::{MlErr, Result, arch::Shape};

/// Nearest neighbour upsampling, repeats every pixel `factor` times along both spatial axes.
#[derive(Clone, Debug)]
pub struct UpSample2d {
    factor: usize,
}

impl UpSample2d {
    pub fn new(factor: usize) -> Self {
        Self { factor }
    }

    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        let [c, h, w] = input;

        if self.factor == 0 {
            return Err(MlErr::InvalidHyperParam {
                name: "upsampling factor",
                value: 0.,
            });
        }

        Ok([c, h * self.factor, w * self.factor])
    }

    pub fn forward(&self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (b, c, h, w) = x.dim();
        let [_, oh, ow] = self.output_shape([c, h, w])?;
        let f = self.factor;

        Ok(Array4::from_shape_fn((b, c, oh, ow), |(n, ch, y, x_)| {
            x[[n, ch, y / f, x_ / f]]
        }))
    }

    /// Every input pixel receives the sum of the deltas of its `factor x factor` copies.
    pub fn backward(&self, d: Array4<f32>) -> Result<Array4<f32>> {
        let (b, c, oh, ow) = d.dim();
        let f = self.factor;
        let mut dx = Array4::zeros((b, c, oh / f, ow / f));

        Zip::indexed(&d).for_each(|(n, ch, y, x), &d| {
            dx[[n, ch, y / f, x / f]] += d;
        });

        Ok(dx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_and_sums_back() {
        let up = UpSample2d::new(2);
        let x = array![[[[1., 2.], [3., 4.]]]];

        let out = up.forward(x.view()).unwrap();
        assert_eq!(out.dim(), (1, 1, 4, 4));
        assert_eq!(out.slice(s![0, 0, 0, ..]), array![1., 1., 2., 2.]);
        assert_eq!(out.slice(s![0, 0, 3, ..]), array![3., 3., 4., 4.]);

        let dx = up.backward(Array4::ones((1, 1, 4, 4))).unwrap();
        assert_eq!(dx, array![[[[4., 4.], [4., 4.]]]]);
    }
}
