//! Thin-lens quadrupole beamline used as both ground truth and auxiliary
//! model.
//!
//! Three quadrupoles separated by drifts transport a Gaussian beam, described
//! per plane by Twiss parameters and emittance, to a screen. The objective is
//! the negative transverse beam size `-sqrt(σx² + σy²)` in millimetres. The
//! auxiliary model is the same lattice seen through miscalibrated magnets.

use bp_calibration::EvaluatedModel;
use bp_types::{CalibrationError, ExperimentError};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::search::SearchSpace;

const N_QUADS: usize = 3;
/// Integrated quadrupole strength bound, 1/m.
const K_LIMIT: f64 = 4.0;

/// Twiss parameters and geometric emittance for both transverse planes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwissBeam {
    pub beta_x: f64,
    pub alpha_x: f64,
    pub beta_y: f64,
    pub alpha_y: f64,
    /// Geometric emittance, m·rad.
    pub emittance: f64,
}

impl Default for TwissBeam {
    fn default() -> Self {
        Self {
            beta_x: 6.0,
            alpha_x: 1.2,
            beta_y: 4.0,
            alpha_y: -0.8,
            emittance: 1e-8,
        }
    }
}

/// Drift lengths in metres: entrance to Q1, Q1 to Q2, Q2 to Q3, Q3 to screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    pub drifts: [f64; N_QUADS + 1],
}

impl Default for Lattice {
    fn default() -> Self {
        Self {
            drifts: [0.5, 1.0, 1.0, 2.0],
        }
    }
}

/// Magnet and beam miscalibration seen by the auxiliary model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Miscalibration {
    /// Relative gain error per quadrupole.
    pub gain: [f64; N_QUADS],
    /// Additive strength offset per quadrupole, 1/m.
    pub offset: [f64; N_QUADS],
    /// Multiplier on the emittance.
    pub emittance_scale: f64,
}

impl Miscalibration {
    pub fn none() -> Self {
        Self {
            gain: [0.0; N_QUADS],
            offset: [0.0; N_QUADS],
            emittance_scale: 1.0,
        }
    }

    /// Error pattern scaled by a single `level`; zero reproduces the ground truth.
    pub fn from_level(level: f64) -> Result<Self, ExperimentError> {
        if !(level.is_finite() && level >= 0.0) {
            return Err(ExperimentError::InvalidConfig {
                message: format!("mismatch level must be finite and non-negative, got {level}"),
            });
        }
        Ok(Self {
            gain: [0.15 * level, -0.10 * level, 0.12 * level],
            offset: [0.20 * level, -0.15 * level, 0.10 * level],
            emittance_scale: 1.0 + 0.5 * level,
        })
    }
}

impl Default for Miscalibration {
    fn default() -> Self {
        Self::none()
    }
}

/// Second moments of one plane: `[<x²>, <xx'>, <x'²>]`.
#[derive(Debug, Clone, Copy)]
struct SigmaMatrix {
    s11: f64,
    s12: f64,
    s22: f64,
}

impl SigmaMatrix {
    fn from_twiss(beta: f64, alpha: f64, emittance: f64) -> Self {
        let gamma = (1.0 + alpha * alpha) / beta;
        Self {
            s11: emittance * beta,
            s12: -emittance * alpha,
            s22: emittance * gamma,
        }
    }

    /// `M Σ Mᵀ` for `M = [[a, b], [c, d]]`.
    fn transport(self, a: f64, b: f64, c: f64, d: f64) -> Self {
        Self {
            s11: a * a * self.s11 + 2.0 * a * b * self.s12 + b * b * self.s22,
            s12: a * c * self.s11 + (a * d + b * c) * self.s12 + b * d * self.s22,
            s22: c * c * self.s11 + 2.0 * c * d * self.s12 + d * d * self.s22,
        }
    }

    fn drift(self, length: f64) -> Self {
        self.transport(1.0, length, 0.0, 1.0)
    }

    /// Thin lens; positive `k` focuses.
    fn thin_lens(self, k: f64) -> Self {
        self.transport(1.0, 0.0, -k, 1.0)
    }
}

/// Beamline objective evaluated over quadrupole strengths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamlineModel {
    name: String,
    lattice: Lattice,
    beam: TwissBeam,
    errors: Miscalibration,
}

impl BeamlineModel {
    pub fn new(
        name: impl Into<String>,
        lattice: Lattice,
        beam: TwissBeam,
        errors: Miscalibration,
    ) -> Self {
        Self {
            name: name.into(),
            lattice,
            beam,
            errors,
        }
    }

    pub fn ground_truth() -> Self {
        Self::new(
            "ground_truth",
            Lattice::default(),
            TwissBeam::default(),
            Miscalibration::none(),
        )
    }

    /// Auxiliary model with errors scaled by `mismatch`.
    pub fn miscalibrated(mismatch: f64) -> Result<Self, ExperimentError> {
        Ok(Self::new(
            format!("auxiliary(mismatch={mismatch:.2})"),
            Lattice::default(),
            TwissBeam::default(),
            Miscalibration::from_level(mismatch)?,
        ))
    }

    /// Box bounds on the three integrated quadrupole strengths.
    pub fn search_space() -> SearchSpace {
        (1..=N_QUADS).fold(SearchSpace::new(), |space, i| {
            space.add_float(format!("q{i}_k"), -K_LIMIT, K_LIMIT)
        })
    }

    pub fn errors(&self) -> &Miscalibration {
        &self.errors
    }

    /// RMS transverse beam size at the screen, mm.
    pub fn beam_size(&self, strengths: &[f64]) -> f64 {
        let emittance = self.beam.emittance * self.errors.emittance_scale;
        let mut sx = SigmaMatrix::from_twiss(self.beam.beta_x, self.beam.alpha_x, emittance);
        let mut sy = SigmaMatrix::from_twiss(self.beam.beta_y, self.beam.alpha_y, emittance);

        for (i, &k) in strengths.iter().enumerate().take(N_QUADS) {
            let k = (1.0 + self.errors.gain[i]) * k + self.errors.offset[i];
            sx = sx.drift(self.lattice.drifts[i]).thin_lens(k);
            sy = sy.drift(self.lattice.drifts[i]).thin_lens(-k);
        }
        sx = sx.drift(self.lattice.drifts[N_QUADS]);
        sy = sy.drift(self.lattice.drifts[N_QUADS]);

        (sx.s11 + sy.s11).max(0.0).sqrt() * 1e3
    }
}

impl EvaluatedModel for BeamlineModel {
    fn x_dim(&self) -> usize {
        N_QUADS
    }

    fn y_dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, CalibrationError> {
        if x.ncols() != N_QUADS {
            return Err(CalibrationError::ShapeMismatch {
                context: self.name.clone(),
                expected: N_QUADS,
                actual: x.ncols(),
            });
        }
        let mut out = Array2::zeros((x.nrows(), 1));
        for (row, slot) in x.rows().into_iter().zip(out.iter_mut()) {
            let strengths = row.to_vec();
            let size = self.beam_size(&strengths);
            if !size.is_finite() {
                return Err(CalibrationError::ModelFailed {
                    message: format!("{} produced a non-finite beam size", self.name),
                });
            }
            *slot = -size;
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
