//! Step-dependent blend weight used by the flatten layer.

use bp_types::CalibrationError;
use serde::{Deserialize, Serialize};

/// Linear ramp of the blend weight `w` over a range of BO steps.
///
/// Below `step_range.0` the weight is `w_lim.0`; from there it moves linearly
/// towards `w_lim.1`, reaching it at `step_range.1`, and saturates beyond.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlattenSchedule {
    step_range: (usize, usize),
    w_lim: (f64, f64),
}

impl FlattenSchedule {
    pub fn new(step_range: (usize, usize), w_lim: (f64, f64)) -> Result<Self, CalibrationError> {
        if step_range.0 == step_range.1 {
            return Err(CalibrationError::DegenerateSchedule {
                start: step_range.0,
                end: step_range.1,
            });
        }
        if !(w_lim.0.is_finite() && w_lim.1.is_finite()) {
            return Err(CalibrationError::NonFinite {
                context: "flatten weight limits".to_string(),
            });
        }
        Ok(Self { step_range, w_lim })
    }

    pub fn step_range(&self) -> (usize, usize) {
        self.step_range
    }

    pub fn w_lim(&self) -> (f64, f64) {
        self.w_lim
    }

    /// Blend weight at `step`.
    pub fn weight(&self, step: usize) -> f64 {
        let (s0, s1) = self.step_range;
        let (w_min, w_max) = self.w_lim;
        let w = if step < s0 {
            w_min
        } else {
            let slope = (w_max - w_min) / (s1 as f64 - s0 as f64);
            w_min + slope * (step - s0) as f64
        };
        w.clamp(w_min.min(w_max), w_min.max(w_max))
    }
}

impl Default for FlattenSchedule {
    fn default() -> Self {
        Self {
            step_range: (0, 10),
            w_lim: (0.01, 0.99),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ramp_matches_reference_points() {
        let s = FlattenSchedule::new((5, 15), (0.01, 0.99)).unwrap();
        assert_relative_eq!(s.weight(0), 0.01, epsilon = 1e-12);
        assert_relative_eq!(s.weight(5), 0.01, epsilon = 1e-12);
        assert_relative_eq!(s.weight(10), 0.50, epsilon = 1e-12);
        assert_relative_eq!(s.weight(15), 0.99, epsilon = 1e-12);
        assert_relative_eq!(s.weight(20), 0.99, epsilon = 1e-12);
    }

    #[test]
    fn ramp_is_monotone() {
        let s = FlattenSchedule::default();
        let weights: Vec<f64> = (0..30).map(|k| s.weight(k)).collect();
        assert!(weights.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn descending_ramp_is_clipped() {
        let s = FlattenSchedule::new((0, 4), (0.9, 0.1)).unwrap();
        assert_relative_eq!(s.weight(0), 0.9, epsilon = 1e-12);
        assert_relative_eq!(s.weight(2), 0.5, epsilon = 1e-12);
        assert_relative_eq!(s.weight(100), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_range_is_rejected() {
        assert_eq!(
            FlattenSchedule::new((7, 7), (0.01, 0.99)),
            Err(CalibrationError::DegenerateSchedule { start: 7, end: 7 })
        );
    }
}
