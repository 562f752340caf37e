//! Node transfer functions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Slope of the steepened sigmoid used by classic NEAT networks.
pub const NEAT_SIGMOID_SLOPE: f32 = 4.924_273;

/// Transfer function applied to a node's summed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Activation {
    /// `1 / (1 + e^(-4.924273 x))`, the NEAT default.
    #[default]
    NeatSigmoid,
    /// `1 / (1 + e^(-x))`
    Sigmoid,
    Tanh,
    ReLU,
    /// `e^(-x^2)`
    Gaussian,
    /// 1 above zero, 0 otherwise.
    Step,
    Identity,
}

impl Activation {
    pub const ALL: [Self; 7] = [
        Self::NeatSigmoid,
        Self::Sigmoid,
        Self::Tanh,
        Self::ReLU,
        Self::Gaussian,
        Self::Step,
        Self::Identity,
    ];

    /// Apply the function. NaN stays NaN; infinities saturate where the
    /// function has a finite limit.
    #[inline]
    #[must_use]
    pub fn apply(self, x: f32) -> f32 {
        if x.is_nan() {
            return f32::NAN;
        }
        match self {
            Self::NeatSigmoid => logistic(NEAT_SIGMOID_SLOPE * x),
            Self::Sigmoid => logistic(x),
            Self::Tanh => x.tanh(),
            Self::ReLU => x.max(0.0),
            Self::Gaussian => {
                if x.abs() > 26.0 {
                    0.0
                } else {
                    (-x * x).exp()
                }
            }
            Self::Step => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Identity => x,
        }
    }
}

impl Activation {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NeatSigmoid => "neat-sigmoid",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::ReLU => "relu",
            Self::Gaussian => "gaussian",
            Self::Step => "step",
            Self::Identity => "identity",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| format!("unknown activation `{}`", s))
    }
}

#[inline]
fn logistic(x: f32) -> f32 {
    // exp overflows past ~88
    let x = x.clamp(-88.0, 88.0);
    1.0 / (1.0 + (-x).exp())
}
