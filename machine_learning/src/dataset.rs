use ndarray::{Array4, ArrayView4, Axis, s};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result};

/// An in-memory dataset of channels-first image batches `x` and their targets `y`.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array4<f32>,
    y: Array4<f32>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Returns
    /// An error if `x` and `y` don't have the same amount of samples.
    pub fn new(x: Array4<f32>, y: Array4<f32>) -> Result<Self> {
        if x.len_of(Axis(0)) != y.len_of(Axis(0)) {
            return Err(MlErr::SizeMismatch {
                what: "dataset samples",
                got: y.len_of(Axis(0)),
                expected: x.len_of(Axis(0)),
            });
        }

        Ok(Self { x, y })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.x.len_of(Axis(0))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn x(&self) -> ArrayView4<'_, f32> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView4<'_, f32> {
        self.y.view()
    }

    /// Splits off the last `fraction` of the samples, without shuffling, as a validation set.
    ///
    /// # Returns
    /// The training set and, if any sample was split off, the validation set.
    pub fn split_validation(self, fraction: f32) -> Result<(Dataset, Option<Dataset>)> {
        if !(0.0..1.0).contains(&fraction) {
            return Err(MlErr::InvalidHyperParam {
                name: "validation split",
                value: fraction,
            });
        }

        let at = (self.len() as f32 * (1. - fraction)) as usize;
        if at == self.len() {
            return Ok((self, None));
        }

        let train = Dataset {
            x: self.x.slice(s![..at, .., .., ..]).to_owned(),
            y: self.y.slice(s![..at, .., .., ..]).to_owned(),
        };
        let validation = Dataset {
            x: self.x.slice(s![at.., .., .., ..]).to_owned(),
            y: self.y.slice(s![at.., .., .., ..]).to_owned(),
        };

        Ok((train, Some(validation)))
    }

    /// Shuffles the samples, keeping every `x` with its `y`.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        let mut order: Vec<_> = (0..self.len()).collect();
        order.shuffle(rng);

        self.x = self.x.select(Axis(0), &order);
        self.y = self.y.select(Axis(0), &order);
    }

    /// Iterates over the dataset in batches of `batch_size` samples, the last one may be smaller.
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> impl Iterator<Item = (ArrayView4<'_, f32>, ArrayView4<'_, f32>)> {
        let batch_size = batch_size.max(1);

        self.x
            .axis_chunks_iter(Axis(0), batch_size)
            .zip(self.y.axis_chunks_iter(Axis(0), batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn numbered(n: usize) -> Dataset {
        let x = Array4::from_shape_fn((n, 1, 2, 2), |(i, ..)| i as f32);
        let y = Array4::from_shape_fn((n, 2, 2, 2), |(i, ..)| i as f32 + 100.);
        Dataset::new(x, y).unwrap()
    }

    #[test]
    fn mismatched_sample_counts_fail() {
        let x = Array4::zeros((3, 1, 2, 2));
        let y = Array4::zeros((2, 1, 2, 2));
        assert!(Dataset::new(x, y).is_err());
    }

    #[test]
    fn validation_is_the_tail() {
        let (train, validation) = numbered(10).split_validation(0.2).unwrap();
        let validation = validation.unwrap();

        assert_eq!(train.len(), 8);
        assert_eq!(validation.len(), 2);
        assert_eq!(validation.x()[[0, 0, 0, 0]], 8.);
        assert_eq!(validation.y()[[1, 0, 0, 0]], 109.);

        let (train, validation) = numbered(10).split_validation(0.).unwrap();
        assert_eq!(train.len(), 10);
        assert!(validation.is_none());
    }

    #[test]
    fn shuffle_keeps_pairs_together() {
        let mut dataset = numbered(16);
        dataset.shuffle(&mut StdRng::seed_from_u64(3));

        for (x, y) in dataset.batches(5) {
            for i in 0..x.len_of(Axis(0)) {
                assert_eq!(x[[i, 0, 1, 1]] + 100., y[[i, 1, 0, 1]]);
            }
        }

        let sizes: Vec<_> = dataset.batches(5).map(|(x, _)| x.len_of(Axis(0))).collect();
        assert_eq!(sizes, [5, 5, 5, 1]);
    }
}
