use crate::error::{Error, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The elementwise non-linearity applied after every layer, the output layer included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Sigmoid,
    Relu,
}

impl Activation {
    // Maps every pre-activation z to its activation a, producing a new array of the same shape.
    pub fn apply(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Sigmoid => z.mapv(sigmoid),
            Activation::Relu => z.mapv(relu),
        }
    }

    pub fn derivative(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Sigmoid => z.mapv(sigmoid_derivative),
            Activation::Relu => z.mapv(relu_derivative),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Sigmoid => write!(f, "sigmoid"),
            Activation::Relu => write!(f, "relu"),
        }
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sigmoid" => Ok(Activation::Sigmoid),
            "relu" => Ok(Activation::Relu),
            other => Err(Error::Configuration(format!(
                "unknown activation '{other}', expected one of: sigmoid, relu"
            ))),
        }
    }
}

// For very negative z, exp(-z) overflows to infinity. Rewriting as exp(z) / (1 + exp(z)) keeps
// the exponent non-positive on both branches.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + f64::exp(-z))
    } else {
        let e = f64::exp(z);
        e / (1.0 + e)
    }
}

pub fn sigmoid_derivative(z: f64) -> f64 {
    let s = sigmoid(z);
    s * (1.0 - s)
}

pub fn relu(z: f64) -> f64 {
    z.max(0.0)
}

// The derivative at exactly 0 is taken to be 0.
pub fn relu_derivative(z: f64) -> f64 {
    if z > 0.0 { 1.0 } else { 0.0 }
}
