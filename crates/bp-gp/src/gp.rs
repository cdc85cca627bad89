//! Exact GP regression conditioned on training data, with a borrowed prior
//! mean.

use bp_calibration::{CalibrationParameter, MeanFunction};
use bp_types::{BpResult, GpError};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use tracing::debug;

use crate::kernel::Matern52Kernel;
use crate::likelihood::GaussianLikelihood;

/// First jitter added to the diagonal when a factorization fails.
const JITTER_START: f64 = 1e-8;
const MAX_JITTER_TRIES: usize = 5;
/// Initial noise variance for a freshly built GP.
const DEFAULT_NOISE: f64 = 1e-2;
const MIN_VARIANCE: f64 = 1e-12;
const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Posterior marginals at a batch of query points.
#[derive(Debug, Clone, PartialEq)]
pub struct Posterior {
    pub mean: Array1<f64>,
    pub variance: Array1<f64>,
}

impl Posterior {
    pub fn std(&self) -> Array1<f64> {
        self.variance.mapv(f64::sqrt)
    }
}

struct Factor {
    chol: Cholesky<f64, Dyn>,
    residual: DVector<f64>,
    alpha: DVector<f64>,
}

/// Single-output exact GP.
///
/// The prior mean is borrowed mutably so that fitting updates its
/// calibration parameters in place; they outlive the GP itself.
pub struct ExactGp<'m> {
    mean: &'m mut dyn MeanFunction,
    kernel: Matern52Kernel,
    likelihood: GaussianLikelihood,
    train_x: Array2<f64>,
    train_y: Array1<f64>,
    step: usize,
}

impl<'m> ExactGp<'m> {
    /// Condition on GP-space inputs `(n, x_dim)` and outputs `(n, 1)`.
    pub fn new(
        mean: &'m mut dyn MeanFunction,
        train_x: Array2<f64>,
        train_y: ArrayView2<'_, f64>,
        step: usize,
    ) -> BpResult<Self> {
        if mean.y_dim() != 1 {
            return Err(GpError::MultiOutputMean {
                y_dim: mean.y_dim(),
            }
            .into());
        }
        if train_y.ncols() != 1 {
            return Err(GpError::TrainingData {
                message: format!("expected a single output column, got {}", train_y.ncols()),
            }
            .into());
        }
        if train_x.nrows() == 0 || train_x.nrows() != train_y.nrows() {
            return Err(GpError::TrainingData {
                message: format!(
                    "{} inputs vs {} outputs",
                    train_x.nrows(),
                    train_y.nrows()
                ),
            }
            .into());
        }
        if train_x.iter().chain(train_y.iter()).any(|v| !v.is_finite()) {
            return Err(GpError::TrainingData {
                message: "non-finite training value".to_string(),
            }
            .into());
        }

        let kernel = Matern52Kernel::new(train_x.ncols())?;
        let likelihood = GaussianLikelihood::new(DEFAULT_NOISE)?;
        Ok(Self {
            mean,
            kernel,
            likelihood,
            train_x,
            train_y: train_y.column(0).to_owned(),
            step,
        })
    }

    pub fn n_train(&self) -> usize {
        self.train_x.nrows()
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn kernel(&self) -> &Matern52Kernel {
        &self.kernel
    }

    pub fn likelihood(&self) -> &GaussianLikelihood {
        &self.likelihood
    }

    pub fn mean(&self) -> &dyn MeanFunction {
        &*self.mean
    }

    fn parameters(&self) -> Vec<&CalibrationParameter> {
        let mut params = self.kernel.parameters();
        params.push(self.likelihood.parameter());
        params.extend(self.mean.parameters());
        params
    }

    /// Raw vector over kernel, noise and mean parameters, in that order.
    pub fn raw_parameters(&self) -> Vec<f64> {
        self.parameters()
            .iter()
            .flat_map(|p| p.raw().to_vec())
            .collect()
    }

    pub fn load_raw_parameters(&mut self, raw: &[f64]) -> BpResult<()> {
        let own: usize = self
            .kernel
            .parameters()
            .iter()
            .map(|p| p.dim())
            .sum::<usize>()
            + 1;
        let expected = own + self.mean.raw_len();
        if raw.len() != expected {
            return Err(GpError::ParameterLength {
                expected,
                actual: raw.len(),
            }
            .into());
        }

        let mut offset = 0;
        for param in self.kernel.parameters_mut() {
            let dim = param.dim();
            param.set_raw(&raw[offset..offset + dim])?;
            offset += dim;
        }
        self.likelihood.parameter_mut().set_raw(&raw[offset..offset + 1])?;
        offset += 1;
        self.mean.load_raw_parameters(&raw[offset..])?;
        Ok(())
    }

    /// Summed log prior over every hyperparameter and mean parameter.
    pub fn log_prior(&self) -> f64 {
        self.parameters().iter().map(|p| p.log_prior()).sum()
    }

    fn mean_column(&self, x: ArrayView2<'_, f64>) -> BpResult<Array1<f64>> {
        let m = self.mean.forward(x, self.step)?;
        if m.ncols() != 1 || m.nrows() != x.nrows() {
            return Err(GpError::MultiOutputMean { y_dim: m.ncols() }.into());
        }
        Ok(m.column(0).to_owned())
    }

    fn factorize(&self) -> BpResult<Factor> {
        let n = self.n_train();
        let k = self.kernel.matrix(self.train_x.view(), self.train_x.view());
        let noise = self.likelihood.noise();
        let k = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                k[[i, j]] + noise
            } else {
                k[[i, j]]
            }
        });
        let chol = cholesky_with_jitter(k)?;
        let residual = &self.train_y - &self.mean_column(self.train_x.view())?;
        let residual = to_dvector(residual.view());
        let alpha = chol.solve(&residual);
        Ok(Factor {
            chol,
            residual,
            alpha,
        })
    }

    /// Exact marginal log likelihood of the training outputs.
    pub fn marginal_log_likelihood(&self) -> BpResult<f64> {
        let factor = self.factorize()?;
        let fit = factor.residual.dot(&factor.alpha);
        let half_log_det: f64 = factor.chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum();
        let n = self.n_train() as f64;
        Ok(-0.5 * fit - half_log_det - 0.5 * n * LN_2PI)
    }

    /// `(MLL + log prior) / n`, the quantity maximized by [`ExactGp::fit`].
    pub fn objective(&self) -> BpResult<f64> {
        let mll = self.marginal_log_likelihood()?;
        Ok((mll + self.log_prior()) / self.n_train() as f64)
    }

    /// Posterior mean and latent variance at GP-space points.
    pub fn posterior(&self, x: ArrayView2<'_, f64>) -> BpResult<Posterior> {
        if x.ncols() != self.train_x.ncols() {
            return Err(GpError::TrainingData {
                message: format!(
                    "query has {} columns, training inputs have {}",
                    x.ncols(),
                    self.train_x.ncols()
                ),
            }
            .into());
        }
        let factor = self.factorize()?;
        let n = self.n_train();
        let m = x.nrows();
        let cross = self.kernel.matrix(self.train_x.view(), x);
        let cross = DMatrix::from_fn(n, m, |i, j| cross[[i, j]]);

        let prior_mean = self.mean_column(x)?;
        let shift = cross.tr_mul(&factor.alpha);
        let mean = Array1::from_iter(prior_mean.iter().zip(shift.iter()).map(|(a, b)| a + b));

        let v = factor
            .chol
            .l_dirty()
            .solve_lower_triangular(&cross)
            .ok_or(GpError::NotPositiveDefinite { jitter: 0.0 })?;
        let prior_var = self.kernel.diag_value();
        let variance = Array1::from_iter(
            v.column_iter()
                .map(|col| (prior_var - col.norm_squared()).max(MIN_VARIANCE)),
        );
        Ok(Posterior { mean, variance })
    }
}

impl std::fmt::Debug for ExactGp<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExactGp")
            .field("mean", &self.mean.name())
            .field("kernel", &self.kernel)
            .field("likelihood", &self.likelihood)
            .field("n_train", &self.n_train())
            .field("step", &self.step)
            .finish()
    }
}

/// Cholesky factorization, retrying with a growing diagonal jitter.
pub fn cholesky_with_jitter(k: DMatrix<f64>) -> Result<Cholesky<f64, Dyn>, GpError> {
    if let Some(chol) = k.clone().cholesky() {
        return Ok(chol);
    }
    let mut jitter = JITTER_START;
    for _ in 0..MAX_JITTER_TRIES {
        let mut jittered = k.clone();
        for i in 0..jittered.nrows() {
            jittered[(i, i)] += jitter;
        }
        if let Some(chol) = jittered.cholesky() {
            debug!(jitter, "kernel matrix factorized with jitter");
            return Ok(chol);
        }
        jitter *= 10.0;
    }
    Err(GpError::NotPositiveDefinite { jitter: jitter / 10.0 })
}

fn to_dvector(v: ArrayView1<'_, f64>) -> DVector<f64> {
    DVector::from_iterator(v.len(), v.iter().copied())
}
