//! Nonlinear least-squares solvers.
//!
//! A [`LeastSquaresProblem`] evaluates a residual vector and its Jacobian at a parameter
//! vector; a [`LeastSquaresSolver`] iterates on it and always hands back its best iterate.
//!
//! Design notes:
//! - Non-convergence is not an error. The outcome carries a [`StopReason`] instead.
//! - Errors returned by the problem callback abort the solve unchanged.
//! - Solver scratch (normal matrix, trial buffers) lives for one `solve` call only.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::{Error, Result};

/// Residuals `r(beta)` and Jacobian `J[(i, p)] = d r_i / d beta_p`.
pub trait LeastSquaresProblem {
    fn nresiduals(&self) -> usize;

    fn nparams(&self) -> usize;

    /// Overwrite `residuals` (and `jacobian` when given) at `params`.
    fn evaluate(
        &mut self,
        params: &[f64],
        residuals: &mut DVector<f64>,
        jacobian: Option<&mut DMatrix<f64>>,
    ) -> Result<()>;
}

pub trait LeastSquaresSolver {
    /// Iterate from `initial` for at most `max_steps` accepted steps.
    fn solve<P: LeastSquaresProblem + ?Sized>(
        &self,
        problem: &mut P,
        initial: &[f64],
        max_steps: usize,
    ) -> Result<SolverOutcome>;

    /// Residuals, Jacobian and covariance at `params` without iterating.
    fn evaluate_at<P: LeastSquaresProblem + ?Sized>(
        &self,
        problem: &mut P,
        params: &[f64],
    ) -> Result<SolverOutcome> {
        self.solve(problem, params, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The step budget was used up.
    MaxSteps,
    /// The residual vector is exactly zero.
    ZeroResidual,
    /// Step norm fell below `xtol`.
    SmallStep,
    /// Gradient `J^T r` fell below `gtol` (max norm).
    SmallGradient,
    /// Relative decrease of the squared residual norm fell below `ftol`.
    SmallResidualChange,
    /// Too many consecutive trial steps failed to decrease the residual.
    NoProgress,
}

/// Final state of a solve.
#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub params: Vec<f64>,
    pub residuals: DVector<f64>,
    pub jacobian: DMatrix<f64>,
    /// `(J^T J)^-1` at `params`, pseudo-inverse when singular.
    pub covariance: DMatrix<f64>,
    pub iterations: usize,
    pub stop: StopReason,
}

impl SolverOutcome {
    /// Squared residual norm.
    #[inline]
    pub fn chisq(&self) -> f64 {
        self.residuals.norm_squared()
    }

    #[inline]
    pub fn residual_norm(&self) -> f64 {
        self.residuals.norm()
    }
}

/// Trust-region Levenberg-Marquardt with Marquardt scaling and Nielsen's damping update.
///
/// Step: `(J^T J + mu D) delta = -J^T r` with `D` the running maximum of `diag(J^T J)`.
/// The tolerances default to `0.0`, i.e. iterate until no trial step improves.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevenbergMarquardt {
    /// Initial damping relative to `max diag(J^T J)`.
    pub initial_damping: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub ftol: f64,
    /// Consecutive rejected trials before giving up.
    pub max_rejects: usize,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            initial_damping: 1e-3,
            xtol: 0.0,
            gtol: 0.0,
            ftol: 0.0,
            max_rejects: 15,
        }
    }
}

impl LevenbergMarquardt {
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_damping.is_finite() && self.initial_damping > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "initial_damping must be finite and > 0, got {}",
                self.initial_damping
            )));
        }
        for (name, tol) in [("xtol", self.xtol), ("gtol", self.gtol), ("ftol", self.ftol)] {
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be finite and >= 0, got {tol}"
                )));
            }
        }
        if self.max_rejects == 0 {
            return Err(Error::InvalidConfig("max_rejects must be > 0".to_owned()));
        }
        Ok(())
    }
}

impl LeastSquaresSolver for LevenbergMarquardt {
    fn solve<P: LeastSquaresProblem + ?Sized>(
        &self,
        problem: &mut P,
        initial: &[f64],
        max_steps: usize,
    ) -> Result<SolverOutcome> {
        self.validate()?;
        let n = problem.nparams();
        let m = problem.nresiduals();
        if initial.len() != n {
            return Err(Error::InvalidShape(format!(
                "initial parameters len {} does not match nparams {n}",
                initial.len()
            )));
        }

        let mut x = DVector::from_column_slice(initial);
        let mut r = DVector::zeros(m);
        let mut jac = DMatrix::zeros(m, n);
        problem.evaluate(x.as_slice(), &mut r, Some(&mut jac))?;
        let mut chisq = r.norm_squared();

        let mut x_trial = x.clone();
        let mut r_trial = r.clone();

        let mut jtj = jac.tr_mul(&jac);
        let mut scale = jtj.diagonal().map(|d| if d > 0.0 { d } else { 1.0 });
        let mut mu = self.initial_damping * scale.max();
        let mut nu = 2.0;

        let mut iterations = 0;
        let mut stop = StopReason::MaxSteps;

        'outer: while iterations < max_steps {
            if chisq == 0.0 {
                stop = StopReason::ZeroResidual;
                break;
            }
            let g = jac.tr_mul(&r);
            if g.amax() <= self.gtol {
                stop = StopReason::SmallGradient;
                break;
            }

            let mut rejects = 0;
            loop {
                let mut a = jtj.clone();
                for i in 0..n {
                    a[(i, i)] += mu * scale[i];
                }

                let accepted = match a.cholesky() {
                    None => None,
                    Some(chol) => {
                        let delta = chol.solve(&-&g);
                        if delta.norm() <= self.xtol * (x.norm() + self.xtol) {
                            stop = StopReason::SmallStep;
                            break 'outer;
                        }
                        x_trial.copy_from(&x);
                        x_trial += &delta;
                        problem.evaluate(x_trial.as_slice(), &mut r_trial, None)?;
                        let chisq_trial = r_trial.norm_squared();
                        let predicted = delta.dot(&(delta.component_mul(&scale) * mu - &g));
                        let actual = chisq - chisq_trial;
                        (chisq_trial.is_finite() && actual > 0.0 && predicted > 0.0)
                            .then(|| (chisq_trial, actual / predicted))
                    }
                };

                if let Some((chisq_trial, rho)) = accepted {
                    std::mem::swap(&mut x, &mut x_trial);
                    std::mem::swap(&mut r, &mut r_trial);
                    // Jacobian only at accepted points.
                    problem.evaluate(x.as_slice(), &mut r, Some(&mut jac))?;
                    let actual = chisq - chisq_trial;
                    chisq = chisq_trial;
                    jtj = jac.tr_mul(&jac);
                    for i in 0..n {
                        scale[i] = scale[i].max(jtj[(i, i)]);
                    }
                    mu *= (1.0_f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
                    nu = 2.0;
                    iterations += 1;
                    debug!(iteration = iterations, chisq, mu, "levenberg-marquardt step");
                    if actual <= self.ftol * (chisq + actual) {
                        stop = StopReason::SmallResidualChange;
                        break 'outer;
                    }
                    break;
                }

                mu *= nu;
                nu *= 2.0;
                rejects += 1;
                if rejects >= self.max_rejects {
                    stop = StopReason::NoProgress;
                    break 'outer;
                }
            }
        }

        debug!(iterations, chisq, ?stop, "levenberg-marquardt finished");

        let covariance = covariance(&jtj);
        Ok(SolverOutcome {
            params: x.as_slice().to_vec(),
            residuals: r,
            jacobian: jac,
            covariance,
            iterations,
            stop,
        })
    }
}

fn covariance(jtj: &DMatrix<f64>) -> DMatrix<f64> {
    let n = jtj.nrows();
    if let Some(chol) = jtj.clone().cholesky() {
        return chol.inverse();
    }
    let eps = f64::EPSILON * n as f64 * jtj.amax();
    jtj.clone()
        .pseudo_inverse(eps)
        .unwrap_or_else(|_| DMatrix::zeros(n, n))
}
