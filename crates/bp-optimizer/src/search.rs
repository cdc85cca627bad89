//! Search space definitions and random sampling of beamline settings.

use bp_calibration::DataTransform;
use bp_types::{BpResult, ExperimentError};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A single bounded input dimension (e.g. a quadrupole strength).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Human-readable parameter name (e.g. "q1_k").
    pub name: String,
    pub low: f64,
    pub high: f64,
}

/// The full search space: an ordered list of box bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            low,
            high,
        });
        self
    }

    pub fn dim(&self) -> usize {
        self.parameters.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn lower(&self) -> Array1<f64> {
        self.parameters.iter().map(|p| p.low).collect()
    }

    pub fn upper(&self) -> Array1<f64> {
        self.parameters.iter().map(|p| p.high).collect()
    }

    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.parameters.is_empty() {
            return Err(ExperimentError::InvalidConfig {
                message: "search space has no parameters".to_string(),
            });
        }
        for p in &self.parameters {
            if !(p.low.is_finite() && p.high.is_finite() && p.low < p.high) {
                return Err(ExperimentError::InvalidConfig {
                    message: format!("parameter {} has bounds [{}, {}]", p.name, p.low, p.high),
                });
            }
        }
        Ok(())
    }

    pub fn contains(&self, x: ArrayView1<'_, f64>) -> bool {
        x.len() == self.dim()
            && self
                .parameters
                .iter()
                .zip(x.iter())
                .all(|(p, &v)| v >= p.low && v <= p.high)
    }

    /// Input normalization mapping this box onto the unit cube.
    pub fn input_transform(&self) -> BpResult<DataTransform> {
        Ok(DataTransform::normalize(self.lower(), self.upper())?)
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for non-adaptive samplers.
pub trait SearchStrategy: Send {
    /// Draw `count` points as rows of a `(count, dim)` batch.
    fn suggest(&mut self, count: usize) -> Array2<f64>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Independent uniform sampling across the search space, reproducible from
/// a seed.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Array2<f64> {
        let mut out = Array2::zeros((count, self.space.dim()));
        for mut row in out.rows_mut() {
            for (slot, p) in row.iter_mut().zip(&self.space.parameters) {
                *slot = self.rng.random_range(p.low..=p.high);
            }
        }
        out
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// Uniform samples in the unit cube `[0, 1]^dim`.
pub fn unit_cube_samples<R: Rng>(count: usize, dim: usize, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_simple_fn((count, dim), || rng.random::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_float("q1_k", -3.0, 3.0)
            .add_float("q2_k", -3.0, 3.0)
            .add_float("q3_k", 0.0, 1.0)
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = sample_space();
        let mut rs = RandomSearch::new(space.clone(), 7);
        let batch = rs.suggest(50);
        assert_eq!(batch.dim(), (50, 3));
        for row in batch.rows() {
            assert!(space.contains(row));
        }
    }

    #[test]
    fn random_search_is_reproducible() {
        let a = RandomSearch::new(sample_space(), 11).suggest(5);
        let b = RandomSearch::new(sample_space(), 11).suggest(5);
        let c = RandomSearch::new(sample_space(), 12).suggest(5);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        assert!(sample_space().validate().is_ok());
        assert!(SearchSpace::new().validate().is_err());
        assert!(SearchSpace::new().add_float("x", 1.0, 0.0).validate().is_err());
    }

    #[test]
    fn input_transform_maps_box_to_unit_cube() {
        let space = sample_space();
        let t = space.input_transform().unwrap();
        let x = ndarray::array![[-3.0, 3.0, 0.5]];
        let u = t.forward(x.view()).unwrap();
        assert_eq!(u, ndarray::array![[0.0, 1.0, 0.5]]);
    }

    #[test]
    fn unit_cube_samples_stay_inside() {
        let mut rng = StdRng::seed_from_u64(3);
        let s = unit_cube_samples(100, 4, &mut rng);
        assert!(s.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn search_space_builder_chain() {
        let space = sample_space();
        assert_eq!(space.dim(), 3);
        assert_eq!(space.names(), vec!["q1_k", "q2_k", "q3_k"]);
    }
}
