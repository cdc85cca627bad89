//! Parameter constraints: bijections between raw (unconstrained) storage and
//! the constrained public value of a learnable parameter.
//!
//! Every constraint maps ℝ onto its domain. Softplus and logistic maps use the
//! same guarded cutoffs (`|x| > 20`) to stay well-conditioned in `f64`.

use bp_types::CalibrationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cutoff above which `softplus(x) == x` to machine precision.
const SOFTPLUS_CUTOFF: f64 = 20.0;

/// Numerically stable softplus: `ln(1 + exp(x))`.
pub fn safe_softplus(x: f64) -> f64 {
    if x > SOFTPLUS_CUTOFF {
        x
    } else {
        x.exp().ln_1p()
    }
}

/// Inverse of softplus on `(0, ∞)`: `ln(exp(x) - 1)`.
pub fn safe_softplus_inv(x: f64) -> f64 {
    if x > SOFTPLUS_CUTOFF {
        x
    } else {
        x.exp_m1().ln()
    }
}

/// Logistic sigmoid `1 / (1 + exp(-x))`, evaluated without overflow in
/// either tail.
pub fn safe_logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Inverse logistic on `(0, 1)`.
pub fn safe_logit(p: f64) -> f64 {
    p.ln() - (-p).ln_1p()
}

/// Domain restriction for a learnable parameter.
///
/// Raw storage is always unconstrained; `transform` produces the public value
/// and `inverse_transform` maps a public value back to raw storage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// `(0, ∞)` via softplus.
    Positive,
    /// `(lower, ∞)` via `lower + softplus`.
    GreaterThan { lower: f64 },
    /// `(-∞, upper)` via `upper - softplus`.
    LessThan { upper: f64 },
    /// `(lower, upper)` via a rescaled sigmoid.
    Interval { lower: f64, upper: f64 },
}

impl Constraint {
    /// Check that the constraint's own bounds are usable.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let ok = match *self {
            Constraint::Positive => true,
            Constraint::GreaterThan { lower } => lower.is_finite(),
            Constraint::LessThan { upper } => upper.is_finite(),
            Constraint::Interval { lower, upper } => {
                lower.is_finite() && upper.is_finite() && lower < upper
            }
        };
        if ok {
            Ok(())
        } else {
            Err(CalibrationError::InvalidConstraint {
                message: format!("{self} has non-finite or inverted bounds"),
            })
        }
    }

    /// Map a raw value into the constrained domain.
    pub fn transform(&self, raw: f64) -> f64 {
        match *self {
            // Clamp keeps the softplus tail strictly positive after underflow.
            Constraint::Positive => safe_softplus(raw).max(f64::MIN_POSITIVE),
            Constraint::GreaterThan { lower } => lower + safe_softplus(raw),
            Constraint::LessThan { upper } => upper - safe_softplus(raw),
            Constraint::Interval { lower, upper } => lower + (upper - lower) * safe_logistic(raw),
        }
    }

    /// Map a constrained value back to raw storage. Returns `None` when the
    /// value lies outside the domain.
    pub fn inverse_transform(&self, value: f64) -> Option<f64> {
        if !self.contains(value) {
            return None;
        }
        let raw = match *self {
            Constraint::Positive => safe_softplus_inv(value),
            Constraint::GreaterThan { lower } => safe_softplus_inv(value - lower),
            Constraint::LessThan { upper } => safe_softplus_inv(upper - value),
            Constraint::Interval { lower, upper } => safe_logit((value - lower) / (upper - lower)),
        };
        raw.is_finite().then_some(raw)
    }

    /// Whether `value` lies strictly inside the constrained domain.
    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match *self {
            Constraint::Positive => value > 0.0,
            Constraint::GreaterThan { lower } => value > lower,
            Constraint::LessThan { upper } => value < upper,
            Constraint::Interval { lower, upper } => value > lower && value < upper,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Positive => write!(f, "Positive()"),
            Constraint::GreaterThan { lower } => write!(f, "GreaterThan({lower})"),
            Constraint::LessThan { upper } => write!(f, "LessThan({upper})"),
            Constraint::Interval { lower, upper } => write!(f, "Interval({lower}, {upper})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn raw_grid() -> Vec<f64> {
        (-60..=60).map(|i| i as f64 * 0.5).collect()
    }

    #[test]
    fn positive_roundtrip_and_positivity() {
        let c = Constraint::Positive;
        for raw in raw_grid() {
            let v = c.transform(raw);
            assert!(v > 0.0, "softplus({raw}) = {v} is not positive");
            let back = c.inverse_transform(v).unwrap();
            assert_relative_eq!(back, raw, epsilon = 1e-9, max_relative = 1e-9);
        }
    }

    #[test]
    fn positive_extreme_tail_stays_positive() {
        assert!(Constraint::Positive.transform(-1.0e4) > 0.0);
        assert_eq!(Constraint::Positive.transform(1.0e4), 1.0e4);
    }

    #[test]
    fn softplus_matches_naive_formula_on_safe_range() {
        for x in [-5.0, -1.0, 0.0, 0.5, 3.0, 10.0] {
            let naive = (1.0 + f64::exp(x)).ln();
            assert_relative_eq!(safe_softplus(x), naive, max_relative = 1e-12);
        }
    }

    #[test]
    fn bounded_constraints_roundtrip() {
        let constraints = [
            Constraint::GreaterThan { lower: 1e-4 },
            Constraint::LessThan { upper: 2.0 },
            Constraint::Interval { lower: -1.0, upper: 3.0 },
        ];
        for c in constraints {
            for raw in [-8.0, -1.0, 0.0, 0.3, 4.0, 8.0] {
                let v = c.transform(raw);
                assert!(c.contains(v), "{c} produced {v}");
                assert_relative_eq!(c.inverse_transform(v).unwrap(), raw, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn inverse_rejects_out_of_domain() {
        assert!(Constraint::Positive.inverse_transform(0.0).is_none());
        assert!(Constraint::Positive.inverse_transform(-2.0).is_none());
        assert!(Constraint::Interval { lower: 0.0, upper: 1.0 }
            .inverse_transform(1.5)
            .is_none());
        assert!(Constraint::Positive.inverse_transform(f64::NAN).is_none());
    }

    #[test]
    fn validate_rejects_inverted_interval() {
        assert!(Constraint::Interval { lower: 1.0, upper: 1.0 }.validate().is_err());
        assert!(Constraint::GreaterThan { lower: f64::NAN }.validate().is_err());
        assert!(Constraint::Positive.validate().is_ok());
    }

    #[test]
    fn serde_tagged_representation() {
        let json = serde_json::to_string(&Constraint::GreaterThan { lower: 0.5 }).unwrap();
        assert_eq!(json, r#"{"type":"greater_than","lower":0.5}"#);
        let back: Constraint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Constraint::GreaterThan { lower: 0.5 });
    }
}
