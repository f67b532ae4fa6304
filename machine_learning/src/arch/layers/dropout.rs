use ndarray::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{MlErr, Result, arch::Mode};

/// Inverted dropout: during training every activation is zeroed with probability `rate` and
/// the survivors are scaled by `1 / (1 - rate)`, at inference it's the identity.
#[derive(Clone, Debug)]
pub struct Dropout {
    rate: f32,
    rng: StdRng,

    // Forward metadata, already scaled.
    mask: Option<Array4<f32>>,
}

impl Dropout {
    /// Creates a new `Dropout`.
    ///
    /// # Arguments
    /// * `rate` - The probability of dropping an activation, in `[0, 1)`.
    /// * `seed` - An optional seed for the layer's own mask generator.
    ///
    /// # Returns
    /// An error if the rate is out of range.
    pub fn new(rate: f32, seed: Option<u64>) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(MlErr::InvalidHyperParam {
                name: "dropout rate",
                value: rate,
            });
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            rate,
            rng,
            mask: None,
        })
    }

    pub fn forward(&mut self, x: ArrayView4<f32>, mode: Mode) -> Result<Array4<f32>> {
        if mode == Mode::Infer || self.rate == 0. {
            self.mask = (mode == Mode::Train).then(|| Array4::ones(x.dim()));
            return Ok(x.to_owned());
        }

        let keep = 1. / (1. - self.rate);
        let rate = self.rate;
        let rng = &mut self.rng;
        let mask = Array4::from_shape_simple_fn(x.dim(), || {
            if rng.random::<f32>() < rate { 0. } else { keep }
        });

        let out = &x * &mask;
        self.mask = Some(mask);
        Ok(out)
    }

    pub fn backward(&mut self, d: Array4<f32>) -> Result<Array4<f32>> {
        let mask = self.mask.take().ok_or(MlErr::MissingForward("Dropout"))?;
        Ok(d * mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_at_inference() {
        let mut dropout = Dropout::new(0.5, Some(1)).unwrap();
        let x = Array4::from_elem((2, 3, 4, 4), 2.);
        assert_eq!(dropout.forward(x.view(), Mode::Infer).unwrap(), x);
    }

    #[test]
    fn training_drops_and_rescales() {
        let mut dropout = Dropout::new(0.25, Some(7)).unwrap();
        let x = Array4::ones((4, 4, 16, 16));

        let out = dropout.forward(x.view(), Mode::Train).unwrap();
        let kept = out.iter().filter(|&&v| v != 0.).count() as f32 / out.len() as f32;

        assert!(out.iter().all(|&v| v == 0. || (v - 4. / 3.).abs() < 1e-6));
        assert!((kept - 0.75).abs() < 0.05, "kept {kept}");

        let d = dropout.backward(Array4::ones(x.dim())).unwrap();
        assert_eq!(d, out);
    }

    #[test]
    fn invalid_rates_fail() {
        assert!(Dropout::new(1., None).is_err());
        assert!(Dropout::new(-0.1, None).is_err());
    }
}
