use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::data::TrainingData;
use crate::deriv::DerivFlags;
use crate::residual::{ResidualKind, ResidualProblem, ResidualTerms, check_compatible};
use crate::solver::{LeastSquaresSolver, LevenbergMarquardt, StopReason};
use crate::{Error, Network, Result};

/// Which residual terms are active and the fitting budgets.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainingConfig {
    /// L2 regularization `lambda_r / nparams * beta^2`.
    pub regularization: bool,
    pub lambda_r: f64,
    /// First-derivative matching (needs the cross-first substrate).
    pub first_derivative: bool,
    pub lambda_d1: f64,
    /// Second-derivative matching (needs the cross-second substrate).
    pub second_derivative: bool,
    pub lambda_d2: f64,
    /// Accepted solver steps per restart.
    pub max_steps: usize,
    pub max_restarts: usize,
    /// `best_fit` stops once the best noReg cost is at or below this.
    pub target_residual: f64,
    /// Restarts draw parameters from `[-init_half_width, init_half_width)`.
    pub init_half_width: f64,
    /// Run restarts in rayon waves. Results are identical to the sequential run.
    pub parallel_restarts: bool,
    pub solver: LevenbergMarquardt,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            regularization: false,
            lambda_r: 0.0,
            first_derivative: false,
            lambda_d1: 0.0,
            second_derivative: false,
            lambda_d2: 0.0,
            max_steps: 100,
            max_restarts: 10,
            target_residual: 1e-4,
            init_half_width: 3.0,
            parallel_restarts: false,
            solver: LevenbergMarquardt::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, lambda) in [
            ("lambda_r", self.lambda_r),
            ("lambda_d1", self.lambda_d1),
            ("lambda_d2", self.lambda_d2),
        ] {
            if !(lambda.is_finite() && lambda >= 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be finite and >= 0, got {lambda}"
                )));
            }
        }
        if self.max_steps == 0 {
            return Err(Error::InvalidConfig("max_steps must be > 0".to_owned()));
        }
        if self.max_restarts == 0 {
            return Err(Error::InvalidConfig("max_restarts must be > 0".to_owned()));
        }
        if !(self.target_residual.is_finite() && self.target_residual >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "target_residual must be finite and >= 0, got {}",
                self.target_residual
            )));
        }
        if !(self.init_half_width.is_finite() && self.init_half_width > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "init_half_width must be finite and > 0, got {}",
                self.init_half_width
            )));
        }
        self.solver.validate()
    }

    /// Enabled residual terms with their coefficients.
    pub fn terms(&self) -> ResidualTerms {
        ResidualTerms {
            regularization: self.regularization.then_some(self.lambda_r),
            first_derivative: self.first_derivative.then_some(self.lambda_d1),
            second_derivative: self.second_derivative.then_some(self.lambda_d2),
        }
    }
}

/// Residual norms of the three nested variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualNorms {
    pub full: f64,
    pub no_reg: f64,
    pub pure: f64,
}

#[derive(Debug, Clone)]
pub struct FitReport {
    pub params: Vec<f64>,
    /// `c * sqrt(diag(cov))` with `c = max(1, sqrt(chisq / dof))`; `None` when `dof <= 0`.
    pub errors: Option<Vec<f64>>,
    /// `|r|` on the training block at the fitted parameters.
    pub train: ResidualNorms,
    /// `|r|` on the validation block at the fitted parameters.
    pub validation: ResidualNorms,
    pub iterations: usize,
    pub stop: StopReason,
}

#[derive(Debug, Clone)]
pub struct BestFitReport {
    /// The selected restart.
    pub best: FitReport,
    /// [`Trainer::cost`] of the selected restart on the validation + test samples.
    pub cost: ResidualNorms,
    /// Index of the selected restart.
    pub best_restart: usize,
    pub restarts: usize,
    pub target_met: bool,
}

/// Fits a network to one dataset under one configuration.
///
/// Holds no state across calls; solver scratch lives for one `fit`.
#[derive(Debug, Clone)]
pub struct Trainer<'a> {
    data: &'a TrainingData,
    config: TrainingConfig,
}

impl<'a> Trainer<'a> {
    pub fn new(data: &'a TrainingData, config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { data, config })
    }

    #[inline]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    #[inline]
    pub fn data(&self) -> &TrainingData {
        self.data
    }

    /// `sqrt(0.5 * S)` over the validation + test samples.
    ///
    /// `S` sums the weighted value errors, plus the enabled derivative terms when
    /// `include_deriv`, plus `lambda_r / nparams * beta^2` when `include_reg`.
    pub fn cost(&self, net: &mut Network, include_reg: bool, include_deriv: bool) -> Result<f64> {
        let mut terms = self.config.terms();
        if !include_reg {
            terms.regularization = None;
        }
        if !include_deriv {
            terms.first_derivative = None;
            terms.second_derivative = None;
        }
        check_compatible(net, self.data, &terms)?;

        let mut request = DerivFlags::NONE;
        if terms.first_derivative.is_some() {
            request |= DerivFlags::D1;
        }
        if terms.second_derivative.is_some() {
            request |= DerivFlags::D2;
        }

        let data = self.data;
        let xndim = data.xndim();
        let mut sum = 0.0;

        if let Some(lambda_r) = terms.regularization {
            let params = net.parameters()?;
            let reduced = lambda_r / params.len() as f64;
            sum += params.iter().map(|b| reduced * b * b).sum::<f64>();
        }

        for s in data.ntrain()..data.ndata() {
            net.set_input(data.input(s))?;
            net.propagate_with(request)?;
            let target = data.target(s);
            let weights = data.weights(s);
            let yd1 = terms.first_derivative.zip(data.first_derivative_target(s));
            let yd2 = terms.second_derivative.zip(data.second_derivative_target(s));

            for (j, unit) in net.output_units().iter().enumerate() {
                let w = weights[j];
                sum += (w * (unit.value() - target[j])).powi(2);
                for k in 0..xndim {
                    if let Some((lambda, yd1)) = yd1 {
                        sum += lambda * (w * (unit.first_derivatives()[k] - yd1[j * xndim + k])).powi(2);
                    }
                    if let Some((lambda, yd2)) = yd2 {
                        sum += lambda * (w * (unit.second_derivatives()[k] - yd2[j * xndim + k])).powi(2);
                    }
                }
            }
        }
        Ok((0.5 * sum).sqrt())
    }

    /// Fit from the network's current parameters and leave the result in the network.
    ///
    /// The solver minimizes the full residual; the noReg and pure variants are then
    /// re-evaluated at the fitted parameters without re-solving.
    pub fn fit(&self, net: &mut Network, max_steps: usize) -> Result<FitReport> {
        let terms = self.config.terms();
        let solver = self.config.solver;
        let initial = net.parameters()?.to_vec();

        let (outcome, valid_full) = {
            let mut full = ResidualProblem::new(net, self.data, terms, ResidualKind::Full)?;
            let outcome = solver.solve(&mut full, &initial, max_steps)?;
            let valid = full.validation_residuals(&outcome.params)?;
            (outcome, valid)
        };
        let (no_reg, valid_no_reg) = {
            let mut problem = ResidualProblem::new(net, self.data, terms, ResidualKind::NoReg)?;
            let at = solver.evaluate_at(&mut problem, &outcome.params)?;
            (at.residual_norm(), problem.validation_residuals(&outcome.params)?.norm())
        };
        let (pure, valid_pure) = {
            let mut problem = ResidualProblem::new(net, self.data, terms, ResidualKind::Pure)?;
            let at = solver.evaluate_at(&mut problem, &outcome.params)?;
            (at.residual_norm(), problem.validation_residuals(&outcome.params)?.norm())
        };
        net.set_parameters(&outcome.params)?;

        let nparams = outcome.params.len();
        let dof = self.data.ntrain() as i64 - nparams as i64;
        let errors = if dof > 0 {
            let c = (outcome.chisq() / dof as f64).sqrt().max(1.0);
            Some(
                outcome
                    .covariance
                    .diagonal()
                    .iter()
                    .map(|v| c * v.max(0.0).sqrt())
                    .collect(),
            )
        } else {
            warn!(
                dof,
                ntrain = self.data.ntrain(),
                nparams,
                "degrees of freedom <= 0, parameter errors undefined"
            );
            None
        };

        debug!(
            iterations = outcome.iterations,
            stop = ?outcome.stop,
            full = outcome.residual_norm(),
            no_reg,
            pure,
            "fit finished"
        );

        Ok(FitReport {
            train: ResidualNorms {
                full: outcome.residual_norm(),
                no_reg,
                pure,
            },
            validation: ResidualNorms {
                full: valid_full.norm(),
                no_reg: valid_no_reg,
                pure: valid_pure,
            },
            errors,
            iterations: outcome.iterations,
            stop: outcome.stop,
            params: outcome.params,
        })
    }

    /// One restart: fresh random parameters from `(seed, index)`, fit, then the three costs.
    fn restart(
        &self,
        net: &mut Network,
        max_steps: usize,
        seed: u64,
        index: usize,
    ) -> Result<(FitReport, ResidualNorms)> {
        let mut rng = StdRng::seed_from_u64(restart_seed(seed, index));
        net.randomize_parameters(&mut rng, self.config.init_half_width)?;
        let report = self.fit(net, max_steps)?;
        let cost = ResidualNorms {
            full: self.cost(net, true, true)?,
            no_reg: self.cost(net, false, true)?,
            pure: self.cost(net, false, false)?,
        };
        info!(
            restart = index,
            full = cost.full,
            no_reg = cost.no_reg,
            pure = cost.pure,
            "restart finished"
        );
        Ok((report, cost))
    }

    /// Multi-restart fit.
    ///
    /// Keeps the restart with the lowest noReg cost (first found wins ties), stops as soon
    /// as that cost is `<= target_residual` or `max_restarts` restarts ran, and leaves the
    /// network holding the selected parameters.
    pub fn best_fit(
        &self,
        net: &mut Network,
        max_steps: usize,
        max_restarts: usize,
        target_residual: f64,
        seed: u64,
    ) -> Result<BestFitReport> {
        if max_restarts == 0 {
            return Err(Error::InvalidConfig("max_restarts must be > 0".to_owned()));
        }
        let mut best: Option<BestFitReport> = None;
        let mut consider = |index: usize, report: FitReport, cost: ResidualNorms| -> bool {
            let better = best
                .as_ref()
                .is_none_or(|b| cost.no_reg < b.cost.no_reg);
            if better {
                best = Some(BestFitReport {
                    best: report,
                    cost,
                    best_restart: index,
                    restarts: 0,
                    target_met: false,
                });
            }
            best.as_ref()
                .is_some_and(|b| b.cost.no_reg <= target_residual)
        };

        let mut restarts = 0;
        if self.config.parallel_restarts {
            let wave = rayon::current_num_threads().max(1);
            'waves: while restarts < max_restarts {
                let end = (restarts + wave).min(max_restarts);
                let results: Vec<Result<(FitReport, ResidualNorms)>> = (restarts..end)
                    .into_par_iter()
                    .map(|i| {
                        let mut local = net.clone();
                        self.restart(&mut local, max_steps, seed, i)
                    })
                    .collect();
                for (i, result) in (restarts..end).zip(results) {
                    let (report, cost) = result?;
                    restarts = i + 1;
                    if consider(i, report, cost) {
                        break 'waves;
                    }
                }
            }
        } else {
            while restarts < max_restarts {
                let (report, cost) = self.restart(net, max_steps, seed, restarts)?;
                let index = restarts;
                restarts += 1;
                if consider(index, report, cost) {
                    break;
                }
            }
        }

        let mut best = best.ok_or_else(|| {
            Error::InvalidConfig("best_fit ran no restarts".to_owned())
        })?;
        best.restarts = restarts;
        best.target_met = best.cost.no_reg <= target_residual;
        net.set_parameters(&best.best.params)?;

        info!(
            restarts,
            best_restart = best.best_restart,
            full = best.cost.full,
            no_reg = best.cost.no_reg,
            pure = best.cost.pure,
            target_met = best.target_met,
            "best fit selected"
        );
        Ok(best)
    }

    /// [`Trainer::best_fit`] with the configured budgets.
    pub fn train(&self, net: &mut Network, seed: u64) -> Result<BestFitReport> {
        self.best_fit(
            net,
            self.config.max_steps,
            self.config.max_restarts,
            self.config.target_residual,
            seed,
        )
    }
}

/// Independent stream per restart.
#[inline]
fn restart_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
