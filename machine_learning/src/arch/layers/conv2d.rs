use std::{cell::RefCell, rc::Rc};

use ndarray::{linalg, prelude::*};
use rand::Rng;
use rayon::prelude::*;

use super::ParamShape;
use crate::{
    MlErr, Result,
    arch::{Mode, Shape, activations::ActFn},
    initialization::{ConstParamGen, ParamGen, RandParamGen},
};

/// Maximum amount of output positions unfolded at once by `im2col`, bounds the patch matrix
/// to `IM2COL_TILE x (in_channels * kh * kw)` regardless of the image size.
const IM2COL_TILE: usize = 4096;

/// The static part of a convolution: channels and kernel size, stride 1 and "same" padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ConvGeometry {
    in_channels: usize,
    out_channels: usize,
    kernel: (usize, usize),
}

impl ConvGeometry {
    fn patch_len(&self) -> usize {
        self.in_channels * self.kernel.0 * self.kernel.1
    }

    fn kernel_len(&self) -> usize {
        self.out_channels * self.patch_len()
    }

    /// Top/left padding, even kernels get the extra row and column at the bottom/right.
    fn padding(&self) -> (usize, usize) {
        ((self.kernel.0 - 1) / 2, (self.kernel.1 - 1) / 2)
    }

    /// Unfolds the patches of the output positions `start..start + n` of a single sample
    /// into the rows of a `(n, patch_len)` matrix.
    fn im2col(&self, x: ArrayView3<f32>, start: usize, n: usize) -> Array2<f32> {
        let (_, h, w) = x.dim();
        let (kh, kw) = self.kernel;
        let (ph, pw) = self.padding();
        let mut cols = Array2::zeros((n, self.patch_len()));

        for (r, mut row) in cols.outer_iter_mut().enumerate() {
            let (oh, ow) = ((start + r) / w, (start + r) % w);
            let mut col = 0;

            for ic in 0..self.in_channels {
                for ky in 0..kh {
                    for kx in 0..kw {
                        let iy = (oh + ky).checked_sub(ph).filter(|&iy| iy < h);
                        let ix = (ow + kx).checked_sub(pw).filter(|&ix| ix < w);

                        if let (Some(iy), Some(ix)) = (iy, ix) {
                            row[col] = x[[ic, iy, ix]];
                        }

                        col += 1;
                    }
                }
            }
        }

        cols
    }

    /// The adjoint of `im2col`: accumulates the rows of `cols` back into `dx`.
    fn col2im(&self, cols: ArrayView2<f32>, start: usize, dx: &mut Array3<f32>) {
        let (_, h, w) = dx.dim();
        let (kh, kw) = self.kernel;
        let (ph, pw) = self.padding();

        for (r, row) in cols.outer_iter().enumerate() {
            let (oh, ow) = ((start + r) / w, (start + r) % w);
            let mut col = 0;

            for ic in 0..self.in_channels {
                for ky in 0..kh {
                    for kx in 0..kw {
                        let iy = (oh + ky).checked_sub(ph).filter(|&iy| iy < h);
                        let ix = (ow + kx).checked_sub(pw).filter(|&ix| ix < w);

                        if let (Some(iy), Some(ix)) = (iy, ix) {
                            dx[[ic, iy, ix]] += row[col];
                        }

                        col += 1;
                    }
                }
            }
        }
    }

    fn forward_sample(
        &self,
        kernel: ArrayView2<f32>,
        bias: ArrayView1<f32>,
        x: ArrayView3<f32>,
    ) -> Result<Array3<f32>> {
        let (_, h, w) = x.dim();
        let hw = h * w;
        let mut z = Array2::zeros((self.out_channels, hw));

        for start in (0..hw).step_by(IM2COL_TILE) {
            let n = IM2COL_TILE.min(hw - start);
            let cols = self.im2col(x, start, n);
            let mut z_tile = z.slice_mut(s![.., start..start + n]);
            linalg::general_mat_mul(1.0, &kernel, &cols.t(), 0.0, &mut z_tile);
        }

        z += &bias.insert_axis(Axis(1));
        Ok(z.into_shape_with_order((self.out_channels, h, w))?)
    }

    fn backward_sample(
        &self,
        kernel: ArrayView2<f32>,
        x: ArrayView3<f32>,
        d: ArrayView3<f32>,
    ) -> Result<(Array3<f32>, Array2<f32>, Array1<f32>)> {
        let (c, h, w) = x.dim();
        let hw = h * w;
        let d = d.to_shape((self.out_channels, hw))?;

        let mut dx = Array3::zeros((c, h, w));
        let mut dw = Array2::zeros((self.out_channels, self.patch_len()));
        let db = d.sum_axis(Axis(1));

        for start in (0..hw).step_by(IM2COL_TILE) {
            let n = IM2COL_TILE.min(hw - start);
            let cols = self.im2col(x, start, n);
            let d_tile = d.slice(s![.., start..start + n]);

            linalg::general_mat_mul(1.0, &d_tile, &cols, 1.0, &mut dw);
            let dcols = d_tile.t().dot(&kernel);
            self.col2im(dcols.view(), start, &mut dx);
        }

        Ok((dx, dw, db))
    }
}

/// A 2D convolution over channels-first batches, stride 1 and "same" padding.
///
/// Parameters are laid out as the kernel, shaped `(out, in, kh, kw)`, followed by the bias.
#[derive(Clone, Debug)]
pub struct Conv2d {
    geometry: ConvGeometry,
    act_fn: Option<ActFn>,

    // Forward metadata
    x: Option<Array4<f32>>,
    z: Option<Array4<f32>>,
}

impl Conv2d {
    /// Creates a new `Conv2d`.
    ///
    /// # Arguments
    /// * `in_channels` - The amount of channels of the input.
    /// * `out_channels` - The amount of filters, hence channels of the output.
    /// * `kernel` - The kernel's height and width.
    /// * `act_fn` - An optional activation applied to the output.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        act_fn: Option<ActFn>,
    ) -> Self {
        Self {
            geometry: ConvGeometry {
                in_channels,
                out_channels,
                kernel,
            },
            act_fn,
            x: None,
            z: None,
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.geometry.kernel_len() + self.geometry.out_channels
    }

    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        let ConvGeometry {
            in_channels,
            out_channels,
            kernel,
        } = self.geometry;
        let [c, h, w] = input;

        if c != in_channels || kernel.0 == 0 || kernel.1 == 0 || h == 0 || w == 0 {
            return Err(MlErr::ShapeMismatch {
                what: "conv2d input".into(),
                got: input.to_vec(),
                expected: vec![in_channels, h.max(1), w.max(1)],
            });
        }

        Ok([out_channels, h, w])
    }

    pub fn param_shapes(&self) -> Vec<ParamShape> {
        let ConvGeometry {
            in_channels,
            out_channels,
            kernel: (kh, kw),
        } = self.geometry;

        vec![
            ParamShape::new("kernel", vec![out_channels, in_channels, kh, kw]),
            ParamShape::new("bias", vec![out_channels]),
        ]
    }

    /// Glorot uniform kernel and zero bias, in layout order.
    pub fn param_gens<R>(&self, rng: Rc<RefCell<R>>) -> Result<Vec<Box<dyn ParamGen>>>
    where
        R: Rng + 'static,
    {
        let receptive = self.geometry.kernel.0 * self.geometry.kernel.1;
        let fan_in = self.geometry.in_channels * receptive;
        let fan_out = self.geometry.out_channels * receptive;

        let kernel =
            RandParamGen::glorot_uniform(rng, self.geometry.kernel_len(), fan_in, fan_out)?;
        let bias = ConstParamGen::zeros(self.geometry.out_channels);

        Ok(vec![Box::new(kernel), Box::new(bias)])
    }

    pub fn forward(
        &mut self,
        params: &[f32],
        x: ArrayView4<f32>,
        mode: Mode,
    ) -> Result<Array4<f32>> {
        let (b, c, h, w) = x.dim();
        self.output_shape([c, h, w])?;

        let geometry = self.geometry;
        let (kernel, bias) = self.view_params(params)?;

        let samples = (0..b)
            .into_par_iter()
            .map(|i| geometry.forward_sample(kernel, bias, x.index_axis(Axis(0), i)))
            .collect::<Result<Vec<_>>>()?;

        let z = stack_samples(&samples, (geometry.out_channels, h, w))?;

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        if mode == Mode::Train {
            self.x = Some(x.to_owned());
            self.z = self.act_fn.map(|_| z);
        } else {
            self.x = None;
            self.z = None;
        }

        Ok(a)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        let x = self.x.take().ok_or(MlErr::MissingForward("Conv2d"))?;

        if let Some(act_fn) = &self.act_fn {
            let z = self.z.take().ok_or(MlErr::MissingForward("Conv2d"))?;
            d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        }

        let geometry = self.geometry;
        let (kernel, _) = self.view_params(params)?;
        let (b, c, h, w) = x.dim();

        let samples = (0..b)
            .into_par_iter()
            .map(|i| {
                geometry.backward_sample(
                    kernel,
                    x.index_axis(Axis(0), i),
                    d.index_axis(Axis(0), i),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let (mut dw, mut db) = self.view_grad(grad)?;
        dw.fill(0.);
        db.fill(0.);

        let mut dxs = Vec::with_capacity(samples.len());
        for (dx, sample_dw, sample_db) in samples {
            dw += &sample_dw;
            db += &sample_db;
            dxs.push(dx);
        }

        stack_samples(&dxs, (c, h, w))
    }

    /// Gives a view of the raw parameter slice as the kernel matrix `(out, in * kh * kw)` and
    /// the biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "conv2d params",
                got: params.len(),
                expected: self.size(),
            });
        }

        let (w_raw, b_raw) = params.split_at(self.geometry.kernel_len());
        let kernel = ArrayView2::from_shape(
            (self.geometry.out_channels, self.geometry.patch_len()),
            w_raw,
        )?;
        let bias = ArrayView1::from_shape(self.geometry.out_channels, b_raw)?;
        Ok((kernel, bias))
    }

    /// Gives a view of the raw gradient slice as the delta kernel and delta biases.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        if grad.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "conv2d grad",
                got: grad.len(),
                expected: self.size(),
            });
        }

        let (dw_raw, db_raw) = grad.split_at_mut(self.geometry.kernel_len());
        let dw = ArrayViewMut2::from_shape(
            (self.geometry.out_channels, self.geometry.patch_len()),
            dw_raw,
        )?;
        let db = ArrayViewMut1::from_shape(self.geometry.out_channels, db_raw)?;
        Ok((dw, db))
    }
}

/// Stacks per-sample results back into a batch, an empty batch keeps its sample shape.
fn stack_samples(samples: &[Array3<f32>], shape: (usize, usize, usize)) -> Result<Array4<f32>> {
    if samples.is_empty() {
        let (c, h, w) = shape;
        return Ok(Array4::zeros((0, c, h, w)));
    }

    let views: Vec<_> = samples.iter().map(|s| s.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn random_array(shape: (usize, usize, usize, usize), seed: u64) -> Array4<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array4::from_shape_simple_fn(shape, || rng.random_range(-1.0..1.0))
    }

    fn random_params(n: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.random_range(-1.0..1.0)).collect()
    }

    /// Loss `sum(out * r)`, linear in both the parameters and the input.
    fn probe_loss(conv: &mut Conv2d, params: &[f32], x: &Array4<f32>, r: &Array4<f32>) -> f32 {
        let out = conv.forward(params, x.view(), Mode::Infer).unwrap();
        (&out * r).sum()
    }

    #[test]
    fn same_padding_keeps_spatial_dims() {
        let conv = Conv2d::new(3, 8, (5, 5), Some(ActFn::relu()));
        assert_eq!(conv.output_shape([3, 17, 9]).unwrap(), [8, 17, 9]);
        assert!(conv.output_shape([4, 17, 9]).is_err());
        assert_eq!(conv.size(), 8 * 3 * 25 + 8);
    }

    #[test]
    fn identity_kernel_copies_the_input() {
        let mut conv = Conv2d::new(1, 1, (3, 3), None);
        let mut params = vec![0.; conv.size()];
        params[4] = 1.;
        params[9] = 0.5;

        let x = random_array((2, 1, 4, 5), 1);
        let out = conv.forward(&params, x.view(), Mode::Infer).unwrap();

        assert_eq!(out.dim(), (2, 1, 4, 5));
        out.iter()
            .zip(x.iter())
            .for_each(|(o, x)| assert!((o - (x + 0.5)).abs() < 1e-6));
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut conv = Conv2d::new(2, 3, (3, 3), None);
        let mut params = random_params(conv.size(), 2);
        let x = random_array((2, 2, 4, 5), 3);
        let r = random_array((2, 3, 4, 5), 4);

        conv.forward(&params, x.view(), Mode::Train).unwrap();
        let mut grad = vec![0.; conv.size()];
        let dx = conv.backward(&params, &mut grad, r.clone()).unwrap();

        let eps = 1e-2;
        for i in [0, 7, 20, 53, conv.size() - 1] {
            let original = params[i];
            params[i] = original + eps;
            let plus = probe_loss(&mut conv, &params, &x, &r);
            params[i] = original - eps;
            let minus = probe_loss(&mut conv, &params, &x, &r);
            params[i] = original;

            let numeric = (plus - minus) / (2. * eps);
            assert!((numeric - grad[i]).abs() < 1e-2, "param {i}: {numeric} vs {}", grad[i]);
        }

        for idx in [[0, 0, 0, 0], [1, 1, 2, 3], [0, 1, 3, 4]] {
            let mut xp = x.clone();
            xp[idx] += eps;
            let plus = probe_loss(&mut conv, &params, &xp, &r);
            xp[idx] -= 2. * eps;
            let minus = probe_loss(&mut conv, &params, &xp, &r);

            let numeric = (plus - minus) / (2. * eps);
            assert!((numeric - dx[idx]).abs() < 1e-2, "input {idx:?}: {numeric} vs {}", dx[idx]);
        }
    }

    #[test]
    fn backward_without_forward_fails() {
        let mut conv = Conv2d::new(1, 1, (1, 1), None);
        let params = vec![1., 0.];
        let mut grad = vec![0.; 2];

        conv.forward(&params, Array4::zeros((1, 1, 2, 2)).view(), Mode::Infer)
            .unwrap();
        let err = conv.backward(&params, &mut grad, Array4::zeros((1, 1, 2, 2)));

        assert!(matches!(err, Err(MlErr::MissingForward("Conv2d"))));
    }
}
