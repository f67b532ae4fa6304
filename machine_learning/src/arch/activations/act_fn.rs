use std::{fmt, str::FromStr};

use super::{Elu, Relu, Sigmoid};
use crate::MlErr;

/// The activation functions a convolution can apply to its output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActFn {
    Linear,
    Relu(Relu),
    Sigmoid(Sigmoid),
    Tanh,
    Elu(Elu),
    Softplus,
}

impl ActFn {
    pub fn relu() -> Self {
        Self::Relu(Relu::new())
    }

    pub fn sigmoid() -> Self {
        Self::Sigmoid(Sigmoid::new())
    }

    pub fn elu(alpha: f32) -> Self {
        Self::Elu(Elu::new(alpha))
    }

    /// The name the activation is parsed from and weight files are keyed with.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Relu(_) => "relu",
            Self::Sigmoid(_) => "sigmoid",
            Self::Tanh => "tanh",
            Self::Elu(_) => "elu",
            Self::Softplus => "softplus",
        }
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            Self::Linear => z,
            Self::Relu(a) => a.f(z),
            Self::Sigmoid(a) => a.f(z),
            Self::Tanh => z.tanh(),
            Self::Elu(a) => a.f(z),
            Self::Softplus => z.max(0.) + (-z.abs()).exp().ln_1p(),
        }
    }

    /// The derivative of the activation, evaluated at the pre-activation value `z`.
    pub fn df(&self, z: f32) -> f32 {
        match self {
            Self::Linear => 1.,
            Self::Relu(a) => a.df(z),
            Self::Sigmoid(a) => a.df(z),
            Self::Tanh => 1. - z.tanh().powi(2),
            Self::Elu(a) => a.df(z),
            Self::Softplus => Sigmoid::new().f(z),
        }
    }
}

impl FromStr for ActFn {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let act_fn = match s.to_ascii_lowercase().as_str() {
            "linear" => Self::Linear,
            "relu" => Self::relu(),
            "sigmoid" => Self::sigmoid(),
            "tanh" => Self::Tanh,
            "elu" => Self::Elu(Elu::default()),
            "softplus" => Self::Softplus,
            _ => return Err(MlErr::UnknownActivation(s.to_string())),
        };

        Ok(act_fn)
    }
}

impl fmt::Display for ActFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
