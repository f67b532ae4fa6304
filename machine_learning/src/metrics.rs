use std::fmt;

use ndarray::{Array3, ArrayView4, Zip};

use crate::{
    Result,
    arch::{activations::Sigmoid, loss::softmax},
};

/// The metrics reported alongside the loss while training.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    /// Fraction of pixels whose predicted class, the argmax over the channel axis, matches the
    /// target's.
    Accuracy,
    /// Like `Accuracy`, but the target goes through a sigmoid and a softmax over the channel
    /// axis before its argmax is taken.
    ///
    /// NOTE: transforming the target looks like a defect, it was meant for the prediction. It's
    /// kept so reported values stay comparable with earlier runs; on one-hot targets both
    /// transforms preserve the argmax so the result matches `Accuracy`.
    ImageAccuracy,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::ImageAccuracy => "image_accuracy",
        }
    }

    pub fn compute(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> Result<f32> {
        crate::arch::loss::check_shapes(&y_pred, &y)?;

        let truth = match self {
            Self::Accuracy => argmax(y),
            Self::ImageAccuracy => {
                let sigmoid = Sigmoid::new();
                argmax(softmax(y.mapv(|t| sigmoid.f(t)).view()).view())
            }
        };

        let pred = argmax(y_pred);
        let hits = Zip::from(&pred)
            .and(&truth)
            .fold(0usize, |acc, p, t| acc + usize::from(p == t));

        Ok(hits as f32 / pred.len().max(1) as f32)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Index of the largest channel of every pixel, the first one on ties.
fn argmax(x: ArrayView4<f32>) -> Array3<usize> {
    let (b, _, h, w) = x.dim();

    Array3::from_shape_fn((b, h, w), |(n, y, x_)| {
        x.slice(ndarray::s![n, .., y, x_])
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                if v > best.1 { (i, v) } else { best }
            })
            .0
    })
}
