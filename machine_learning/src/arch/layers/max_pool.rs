use ndarray::{Zip, prelude::*};

use crate::{
    MlErr, Result,
    arch::{Mode, Shape},
};

/// Square max pooling with stride equal to the pool size and "same" padding, that is, the
/// output has `ceil(h / pool)` rows and `ceil(w / pool)` columns and the windows that hang over
/// the bottom/right border only see the valid part of the input.
#[derive(Clone, Debug)]
pub struct MaxPool2d {
    pool: usize,

    // Forward metadata, flat `y * w + x` index of each window's maximum.
    argmax: Option<Array4<usize>>,
    input_hw: (usize, usize),
}

impl MaxPool2d {
    pub fn new(pool: usize) -> Self {
        Self {
            pool,
            argmax: None,
            input_hw: (0, 0),
        }
    }

    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        let [c, h, w] = input;

        if self.pool == 0 || h == 0 || w == 0 {
            return Err(MlErr::ShapeMismatch {
                what: "max pool input".into(),
                got: input.to_vec(),
                expected: vec![c, self.pool.max(1), self.pool.max(1)],
            });
        }

        Ok([c, h.div_ceil(self.pool), w.div_ceil(self.pool)])
    }

    /// Rows (or columns) of padding added before the input along a dimension of length `len`.
    fn pad_before(&self, len: usize) -> usize {
        let out = len.div_ceil(self.pool);
        (out * self.pool).saturating_sub(len) / 2
    }

    pub fn forward(&mut self, x: ArrayView4<f32>, mode: Mode) -> Result<Array4<f32>> {
        let (b, c, h, w) = x.dim();
        let [_, oh, ow] = self.output_shape([c, h, w])?;
        let (pad_h, pad_w) = (self.pad_before(h), self.pad_before(w));
        let pool = self.pool;

        let mut out = Array4::zeros((b, c, oh, ow));
        let mut argmax = Array4::zeros((b, c, oh, ow));

        Zip::indexed(&mut out)
            .and(&mut argmax)
            .par_for_each(|(n, ch, y, x_), out, argmax| {
                let rows = (y * pool).saturating_sub(pad_h)..((y + 1) * pool - pad_h).min(h);
                let cols = (x_ * pool).saturating_sub(pad_w)..((x_ + 1) * pool - pad_w).min(w);

                let mut best = f32::NEG_INFINITY;
                let mut best_idx = rows.start * w + cols.start;

                for iy in rows {
                    for ix in cols.clone() {
                        let v = x[[n, ch, iy, ix]];
                        if v > best {
                            best = v;
                            best_idx = iy * w + ix;
                        }
                    }
                }

                *out = best;
                *argmax = best_idx;
            });

        self.input_hw = (h, w);
        self.argmax = (mode == Mode::Train).then_some(argmax);

        Ok(out)
    }

    pub fn backward(&mut self, d: Array4<f32>) -> Result<Array4<f32>> {
        let argmax = self.argmax.take().ok_or(MlErr::MissingForward("MaxPool2d"))?;
        let (b, c, _, _) = d.dim();
        let (h, w) = self.input_hw;

        let mut dx = Array4::zeros((b, c, h, w));

        Zip::indexed(&d)
            .and(&argmax)
            .for_each(|(n, ch, _, _), &d, &idx| {
                dx[[n, ch, idx / w, idx % w]] += d;
            });

        Ok(dx)
    }
}
