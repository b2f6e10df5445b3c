use crate::error::{Error, Result};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

// Cross-entropy activations are clamped into [EPSILON, 1 - EPSILON] before taking logarithms.
const EPSILON: f64 = 1e-12;

/// How far the output layer is from the expected output.
///
/// Both methods accept either a single `[k x 1]` column or a `[k x m]` mini-batch matrix with one
/// example per column; losses are summed over every column.
///
/// `CrossEntropy` always produces the output delta `a - y`, whatever activation the network uses.
/// With sigmoid that is the exact gradient (the sigmoid derivative cancels). Paired with relu the
/// derivative term is still left out, and activations above 1 are clamped before the logarithm,
/// so that pairing is numerically risky and callers should treat its loss as approximate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cost {
    #[serde(rename = "quadratic")]
    Quadratic,
    #[serde(rename = "crossentropy", alias = "cross_entropy")]
    CrossEntropy,
}

impl Cost {
    pub fn loss(self, activation: &Array2<f64>, expected: &Array2<f64>) -> Result<f64> {
        check_same_shape(activation, expected)?;
        match self {
            Cost::Quadratic => {
                let diff = activation - expected;
                Ok(0.5 * diff.iter().map(|d| d * d).sum::<f64>())
            }
            Cost::CrossEntropy => {
                check_finite(activation)?;
                Ok(Zip::from(activation).and(expected).fold(0.0, |total, &a, &y| {
                    let a = a.clamp(EPSILON, 1.0 - EPSILON);
                    total - (y * a.ln() + (1.0 - y) * (1.0 - a).ln())
                }))
            }
        }
    }

    /// The error at the output layer's pre-activation, given the activation derivative σ'(z) of
    /// the final layer. `CrossEntropy` ignores `activation_derivative`.
    pub fn delta(
        self,
        activation: &Array2<f64>,
        expected: &Array2<f64>,
        activation_derivative: &Array2<f64>,
    ) -> Result<Array2<f64>> {
        check_same_shape(activation, expected)?;
        match self {
            Cost::Quadratic => {
                check_same_shape(activation, activation_derivative)?;
                Ok((activation - expected) * activation_derivative)
            }
            Cost::CrossEntropy => {
                check_finite(activation)?;
                Ok(activation - expected)
            }
        }
    }

    pub fn loss_and_delta(
        self,
        activation: &Array2<f64>,
        expected: &Array2<f64>,
        activation_derivative: &Array2<f64>,
    ) -> Result<(f64, Array2<f64>)> {
        Ok((
            self.loss(activation, expected)?,
            self.delta(activation, expected, activation_derivative)?,
        ))
    }
}

fn check_same_shape(activation: &Array2<f64>, other: &Array2<f64>) -> Result<()> {
    if activation.dim() != other.dim() {
        return Err(Error::shape(
            "cost",
            format!("{:?}", activation.dim()),
            format!("{:?}", other.dim()),
        ));
    }
    Ok(())
}

fn check_finite(activation: &Array2<f64>) -> Result<()> {
    match activation.iter().find(|a| a.is_nan()) {
        Some(a) => Err(Error::NumericDomain(format!(
            "cross-entropy cannot clamp activation {a}"
        ))),
        None => Ok(()),
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cost::Quadratic => write!(f, "quadratic"),
            Cost::CrossEntropy => write!(f, "crossentropy"),
        }
    }
}

impl FromStr for Cost {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quadratic" => Ok(Cost::Quadratic),
            "crossentropy" | "cross_entropy" | "cross-entropy" => Ok(Cost::CrossEntropy),
            other => Err(Error::Configuration(format!(
                "unknown cost '{other}', expected one of: quadratic, crossentropy"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    #[test]
    fn quadratic_delta_with_identity_derivative() {
        let a = arr2(&[[0.5], [0.5]]);
        let y = arr2(&[[1.0], [0.0]]);
        let delta = Cost::Quadratic.delta(&a, &y, &Array2::ones((2, 1))).unwrap();
        assert_eq!(delta, arr2(&[[-0.5], [0.5]]));
        assert_relative_eq!(Cost::Quadratic.loss(&a, &y).unwrap(), 0.25);
    }

    #[test]
    fn quadratic_delta_scales_by_derivative() {
        let a = arr2(&[[0.5], [0.5]]);
        let y = arr2(&[[1.0], [0.0]]);
        let derivative = arr2(&[[0.25], [0.5]]);
        let delta = Cost::Quadratic.delta(&a, &y, &derivative).unwrap();
        assert_eq!(delta, arr2(&[[-0.125], [0.25]]));
    }

    #[test]
    fn cross_entropy_delta_ignores_derivative() {
        let a = arr2(&[[0.9], [0.1]]);
        let y = arr2(&[[1.0], [0.0]]);
        let derivative = arr2(&[[123.0], [0.0]]);
        let delta = Cost::CrossEntropy.delta(&a, &y, &derivative).unwrap();
        assert_relative_eq!(delta[[0, 0]], -0.1, epsilon = 1e-12);
        assert_relative_eq!(delta[[1, 0]], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn cross_entropy_loss_matches_formula() {
        let a = arr2(&[[0.9], [0.1]]);
        let y = arr2(&[[1.0], [0.0]]);
        let expected = -(0.9_f64.ln()) - (0.9_f64.ln());
        assert_relative_eq!(Cost::CrossEntropy.loss(&a, &y).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn cross_entropy_clamps_saturated_activations() {
        let a = arr2(&[[1.0], [0.0], [7.5]]);
        let y = arr2(&[[0.0], [1.0], [0.0]]);
        let loss = Cost::CrossEntropy.loss(&a, &y).unwrap();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }

    #[test]
    fn cross_entropy_rejects_nan() {
        let a = arr2(&[[f64::NAN], [0.5]]);
        let y = arr2(&[[1.0], [0.0]]);
        assert!(matches!(Cost::CrossEntropy.loss(&a, &y), Err(Error::NumericDomain(_))));
        assert!(matches!(
            Cost::CrossEntropy.delta(&a, &y, &Array2::ones((2, 1))),
            Err(Error::NumericDomain(_))
        ));
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let a = arr2(&[[0.5], [0.5]]);
        let y = arr2(&[[1.0], [0.0], [0.0]]);
        assert!(matches!(Cost::Quadratic.loss(&a, &y), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn batch_loss_sums_columns() {
        let a = arr2(&[[0.5, 1.0], [0.5, 0.0]]);
        let y = arr2(&[[1.0, 0.0], [0.0, 0.0]]);
        assert_relative_eq!(Cost::Quadratic.loss(&a, &y).unwrap(), 0.25 + 0.5);
    }

    #[test]
    fn parses_names() {
        assert_eq!("crossentropy".parse::<Cost>().unwrap(), Cost::CrossEntropy);
        assert_eq!("Quadratic".parse::<Cost>().unwrap(), Cost::Quadratic);
        assert!("hinge".parse::<Cost>().is_err());
        assert_eq!(Cost::CrossEntropy.to_string(), "crossentropy");
    }
}
