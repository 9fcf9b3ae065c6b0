//! Residual vector and Jacobian assembly.
//!
//! Row layout for a block of `n` samples (training or validation):
//!
//! ```text
//! value rows        i*yndim + j                                   n*yndim rows
//! d1 rows           off_d1 + k*(n*yndim) + i*yndim + j            n*xndim*yndim rows
//! d2 rows           off_d2 + k*(n*yndim) + i*yndim + j            n*xndim*yndim rows
//! regularization    off_reg + p                                   nparams rows
//! ```
//!
//! Both derivative blocks are present as soon as either derivative term is active (rows of
//! an inactive kind stay zero). The three problem variants are nested prefixes of each
//! other: pure (values) < noReg (values + derivatives) < full (noReg + regularization).

use std::ops::Range;

use nalgebra::{DMatrix, DVector};

use crate::data::TrainingData;
use crate::deriv::DerivFlags;
use crate::solver::LeastSquaresProblem;
use crate::{Error, Network, Result};

/// Which nested residual definition a problem evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualKind {
    /// Value residuals only.
    Pure,
    /// Values plus the enabled derivative-matching terms.
    NoReg,
    /// `NoReg` plus the enabled regularization rows.
    Full,
}

/// Enabled residual terms and their scale coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResidualTerms {
    /// `lambda_r`; rows are `sqrt(lambda_r / nparams) * beta_p`.
    pub regularization: Option<f64>,
    /// `lambda_d1`; rows are scaled by `sqrt(lambda_d1)`.
    pub first_derivative: Option<f64>,
    /// `lambda_d2`; rows are scaled by `sqrt(lambda_d2)`.
    pub second_derivative: Option<f64>,
}

impl ResidualTerms {
    /// The subset of terms a residual kind includes.
    pub fn restrict(self, kind: ResidualKind) -> Self {
        match kind {
            ResidualKind::Pure => Self::default(),
            ResidualKind::NoReg => Self {
                regularization: None,
                ..self
            },
            ResidualKind::Full => self,
        }
    }

    #[inline]
    pub fn has_derivatives(&self) -> bool {
        self.first_derivative.is_some() || self.second_derivative.is_some()
    }
}

/// Row offsets of one residual block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidualLayout {
    nsamples: usize,
    xndim: usize,
    yndim: usize,
    nparams: usize,
    derivs: bool,
    reg: bool,
}

impl ResidualLayout {
    pub fn new(
        nsamples: usize,
        xndim: usize,
        yndim: usize,
        nparams: usize,
        terms: &ResidualTerms,
    ) -> Self {
        Self {
            nsamples,
            xndim,
            yndim,
            nparams,
            derivs: terms.has_derivatives(),
            reg: terms.regularization.is_some(),
        }
    }

    #[inline]
    fn derivative_block_len(&self) -> usize {
        self.nsamples * self.xndim * self.yndim
    }

    #[inline]
    pub fn value_row(&self, i: usize, j: usize) -> usize {
        i * self.yndim + j
    }

    #[inline]
    pub fn d1_offset(&self) -> usize {
        self.nsamples * self.yndim
    }

    #[inline]
    pub fn d2_offset(&self) -> usize {
        self.d1_offset() + self.derivative_block_len()
    }

    #[inline]
    pub fn reg_offset(&self) -> usize {
        if self.derivs {
            self.d2_offset() + self.derivative_block_len()
        } else {
            self.d1_offset()
        }
    }

    #[inline]
    pub fn d1_row(&self, i: usize, j: usize, k: usize) -> usize {
        self.d1_offset() + k * self.nsamples * self.yndim + i * self.yndim + j
    }

    #[inline]
    pub fn d2_row(&self, i: usize, j: usize, k: usize) -> usize {
        self.d2_offset() + k * self.nsamples * self.yndim + i * self.yndim + j
    }

    #[inline]
    pub fn reg_row(&self, p: usize) -> usize {
        self.reg_offset() + p
    }

    /// Total number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.reg_offset() + if self.reg { self.nparams } else { 0 }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One residual definition over a network and dataset.
///
/// The solver drives the training block through [`LeastSquaresProblem`]; the validation
/// block is evaluated on demand with [`ResidualProblem::validation_residuals`].
pub struct ResidualProblem<'a> {
    net: &'a mut Network,
    data: &'a TrainingData,
    terms: ResidualTerms,
    train: ResidualLayout,
    valid: ResidualLayout,
}

impl<'a> ResidualProblem<'a> {
    /// Checks that `net` carries the substrates the Jacobian of `kind` needs.
    pub fn new(
        net: &'a mut Network,
        data: &'a TrainingData,
        terms: ResidualTerms,
        kind: ResidualKind,
    ) -> Result<Self> {
        let terms = terms.restrict(kind);
        check_compatible(net, data, &terms)?;

        let substrates = net.substrates();
        if !substrates.contains(DerivFlags::VD1) {
            return Err(Error::MissingSubstrate(DerivFlags::VD1));
        }
        if net.tracked_params() != (0..net.nparams()) {
            return Err(Error::InvalidConfig(
                "fitting needs the variational substrate to track all parameters".to_owned(),
            ));
        }
        if terms.first_derivative.is_some() && !substrates.contains(DerivFlags::CROSS1) {
            return Err(Error::MissingSubstrate(DerivFlags::CROSS1));
        }
        if terms.second_derivative.is_some() && !substrates.contains(DerivFlags::CROSS2) {
            return Err(Error::MissingSubstrate(DerivFlags::CROSS2));
        }

        let (xndim, yndim, nparams) = (data.xndim(), data.yndim(), net.nparams());
        Ok(Self {
            net,
            data,
            terms,
            train: ResidualLayout::new(data.ntrain(), xndim, yndim, nparams, &terms),
            valid: ResidualLayout::new(data.nvalid(), xndim, yndim, nparams, &terms),
        })
    }

    #[inline]
    pub fn terms(&self) -> &ResidualTerms {
        &self.terms
    }

    #[inline]
    pub fn layout(&self) -> &ResidualLayout {
        &self.train
    }

    #[inline]
    pub fn validation_layout(&self) -> &ResidualLayout {
        &self.valid
    }

    /// Validation-block residuals at `params`. Never fed to the solver.
    pub fn validation_residuals(&mut self, params: &[f64]) -> Result<DVector<f64>> {
        self.net.set_parameters(params)?;
        let mut out = DVector::zeros(self.valid.len());
        fill_block(
            self.net,
            self.data,
            self.data.validation_range(),
            &self.valid,
            &self.terms,
            &mut out,
            None,
        )?;
        Ok(out)
    }
}

impl LeastSquaresProblem for ResidualProblem<'_> {
    fn nresiduals(&self) -> usize {
        self.train.len()
    }

    fn nparams(&self) -> usize {
        self.train.nparams
    }

    fn evaluate(
        &mut self,
        params: &[f64],
        residuals: &mut DVector<f64>,
        jacobian: Option<&mut DMatrix<f64>>,
    ) -> Result<()> {
        self.net.set_parameters(params)?;
        fill_block(
            self.net,
            self.data,
            self.data.train_range(),
            &self.train,
            &self.terms,
            residuals,
            jacobian,
        )
    }
}

/// Dataset and network must agree on dimensions and the data must carry every enabled
/// derivative target.
pub(crate) fn check_compatible(
    net: &Network,
    data: &TrainingData,
    terms: &ResidualTerms,
) -> Result<()> {
    if !net.is_connected() {
        return Err(Error::NotConnected);
    }
    if data.xndim() != net.xndim() || data.yndim() != net.yndim() {
        return Err(Error::InvalidData(format!(
            "data dims ({}, {}) do not match network dims ({}, {})",
            data.xndim(),
            data.yndim(),
            net.xndim(),
            net.yndim()
        )));
    }
    if terms.first_derivative.is_some() && !data.has_first_derivatives() {
        return Err(Error::InvalidData(
            "first-derivative matching needs first-derivative targets".to_owned(),
        ));
    }
    if terms.second_derivative.is_some() && !data.has_second_derivatives() {
        return Err(Error::InvalidData(
            "second-derivative matching needs second-derivative targets".to_owned(),
        ));
    }
    Ok(())
}

/// One propagation per sample fills its value rows, derivative rows and, when requested,
/// the matching Jacobian rows.
fn fill_block(
    net: &mut Network,
    data: &TrainingData,
    samples: Range<usize>,
    layout: &ResidualLayout,
    terms: &ResidualTerms,
    out: &mut DVector<f64>,
    mut jacobian: Option<&mut DMatrix<f64>>,
) -> Result<()> {
    debug_assert_eq!(out.len(), layout.len());
    out.fill(0.0);
    if let Some(jac) = jacobian.as_deref_mut() {
        debug_assert_eq!(jac.shape(), (layout.len(), layout.nparams));
        jac.fill(0.0);
    }

    let with_jac = jacobian.is_some();
    let mut request = DerivFlags::NONE;
    if with_jac {
        request |= DerivFlags::VD1;
    }
    if terms.first_derivative.is_some() {
        request |= DerivFlags::D1;
        if with_jac {
            request |= DerivFlags::CROSS1;
        }
    }
    if terms.second_derivative.is_some() {
        request |= DerivFlags::D2;
        if with_jac {
            request |= DerivFlags::CROSS2;
        }
    }

    let xndim = layout.xndim;
    let nt = net.tracked_params().len();
    let s1 = terms.first_derivative.map(f64::sqrt);
    let s2 = terms.second_derivative.map(f64::sqrt);

    for (i, s) in samples.enumerate() {
        net.set_input(data.input(s))?;
        net.propagate_with(request)?;

        let target = data.target(s);
        let weights = data.weights(s);
        let yd1 = s1.zip(data.first_derivative_target(s));
        let yd2 = s2.zip(data.second_derivative_target(s));

        for (j, unit) in net.output_units().iter().enumerate() {
            let w = weights[j];
            let row = layout.value_row(i, j);
            out[row] = w * (unit.value() - target[j]);
            if let Some(jac) = jacobian.as_deref_mut() {
                for (p, &v) in unit.variational_derivatives().iter().enumerate() {
                    jac[(row, p)] = w * v;
                }
            }

            if let Some((scale, yd1)) = yd1 {
                let sw = scale * w;
                for k in 0..xndim {
                    let row = layout.d1_row(i, j, k);
                    out[row] = sw * (unit.first_derivatives()[k] - yd1[j * xndim + k]);
                    if let Some(jac) = jacobian.as_deref_mut() {
                        let cross = &unit.cross_first_derivatives()[k * nt..(k + 1) * nt];
                        for (p, &c) in cross.iter().enumerate() {
                            jac[(row, p)] = sw * c;
                        }
                    }
                }
            }

            if let Some((scale, yd2)) = yd2 {
                let sw = scale * w;
                for k in 0..xndim {
                    let row = layout.d2_row(i, j, k);
                    out[row] = sw * (unit.second_derivatives()[k] - yd2[j * xndim + k]);
                    if let Some(jac) = jacobian.as_deref_mut() {
                        let cross = &unit.cross_second_derivatives()[k * nt..(k + 1) * nt];
                        for (p, &c) in cross.iter().enumerate() {
                            jac[(row, p)] = sw * c;
                        }
                    }
                }
            }
        }
    }

    if let Some(lambda_r) = terms.regularization {
        let params = net.parameters()?;
        let sr = (lambda_r / params.len() as f64).sqrt();
        for (p, &beta) in params.iter().enumerate() {
            let row = layout.reg_row(p);
            out[row] = sr * beta;
            if let Some(jac) = jacobian.as_deref_mut() {
                jac[(row, p)] = sr;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Activation;
    use crate::deriv::ParamTracking;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const TERMS: ResidualTerms = ResidualTerms {
        regularization: Some(0.3),
        first_derivative: Some(0.05),
        second_derivative: Some(0.02),
    };

    fn network() -> Network {
        let mut net = Network::new(2, 3, 2).unwrap();
        net.set_layer_activation(1, Activation::Gaussian).unwrap();
        net.set_layer_activation(2, Activation::Identity).unwrap();
        net.connect().unwrap();
        net.add_substrates(DerivFlags::ALL);
        net
    }

    /// Targets from a second network with other parameters, so residuals are nonzero.
    fn dataset(rng: &mut StdRng) -> TrainingData {
        let mut reference = network();
        reference.randomize_parameters(rng, 1.0).unwrap();
        let (mut xs, mut ys, mut d1, mut d2, mut w) = (vec![], vec![], vec![], vec![], vec![]);
        for _ in 0..7 {
            let x = [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)];
            reference.set_input(&x).unwrap();
            reference.propagate().unwrap();
            xs.extend_from_slice(&x);
            for u in reference.output_units() {
                ys.push(u.value());
                d1.extend_from_slice(u.first_derivatives());
                d2.extend_from_slice(u.second_derivatives());
                w.push(rng.gen_range(0.5..1.5));
            }
        }
        TrainingData::from_flat(xs, ys, 2, 2, 4, 2)
            .unwrap()
            .with_first_derivatives(d1)
            .unwrap()
            .with_second_derivatives(d2)
            .unwrap()
            .with_weights(w)
            .unwrap()
    }

    #[test]
    fn layout_offsets() {
        let layout = ResidualLayout::new(3, 2, 2, 5, &TERMS);
        assert_eq!(layout.d1_offset(), 6);
        assert_eq!(layout.d2_offset(), 18);
        assert_eq!(layout.reg_offset(), 30);
        assert_eq!(layout.len(), 35);
        assert_eq!(layout.d1_row(1, 1, 1), 6 + 6 + 2 + 1);
        assert_eq!(layout.d2_row(2, 0, 0), 18 + 4);

        let pure = ResidualLayout::new(3, 2, 2, 5, &TERMS.restrict(ResidualKind::Pure));
        assert_eq!(pure.len(), 6);
        let only_d2 = ResidualTerms {
            second_derivative: Some(1.0),
            ..ResidualTerms::default()
        };
        // Both derivative blocks exist as soon as one is enabled.
        assert_eq!(ResidualLayout::new(3, 2, 2, 5, &only_d2).len(), 30);
    }

    #[test]
    fn variants_are_nested_prefixes() {
        let mut rng = StdRng::seed_from_u64(0);
        let data = dataset(&mut rng);
        let mut net = network();
        net.randomize_parameters(&mut rng, 1.0).unwrap();
        let params = net.parameters().unwrap().to_vec();

        let eval = |net: &mut Network, kind| {
            let mut problem = ResidualProblem::new(net, &data, TERMS, kind).unwrap();
            let mut r = DVector::zeros(problem.nresiduals());
            problem.evaluate(&params, &mut r, None).unwrap();
            let v = problem.validation_residuals(&params).unwrap();
            (r, v)
        };
        let (pure, pure_v) = eval(&mut net, ResidualKind::Pure);
        let (noreg, noreg_v) = eval(&mut net, ResidualKind::NoReg);
        let (full, full_v) = eval(&mut net, ResidualKind::Full);

        assert_eq!(pure.len(), 4 * 2);
        assert_eq!(noreg.len(), 4 * 2 * 5);
        assert_eq!(full.len(), noreg.len() + net.nparams());
        assert_eq!(pure.as_slice(), &noreg.as_slice()[..pure.len()]);
        assert_eq!(noreg.as_slice(), &full.as_slice()[..noreg.len()]);
        assert_eq!(pure_v.len(), 2 * 2);
        assert_eq!(pure_v.as_slice(), &noreg_v.as_slice()[..pure_v.len()]);
        assert_eq!(noreg_v.as_slice(), &full_v.as_slice()[..noreg_v.len()]);

        let sr = (0.3 / net.nparams() as f64).sqrt();
        for (p, beta) in params.iter().enumerate() {
            assert_eq!(full[noreg.len() + p], sr * beta);
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(1);
        let data = dataset(&mut rng);
        let mut net = network();
        net.randomize_parameters(&mut rng, 1.0).unwrap();
        let params = net.parameters().unwrap().to_vec();

        let mut problem = ResidualProblem::new(&mut net, &data, TERMS, ResidualKind::Full).unwrap();
        let (m, n) = (problem.nresiduals(), problem.nparams());
        let mut r = DVector::zeros(m);
        let mut jac = DMatrix::zeros(m, n);
        problem.evaluate(&params, &mut r, Some(&mut jac)).unwrap();

        let h = 1e-6;
        let mut rp = DVector::zeros(m);
        let mut rm = DVector::zeros(m);
        for p in 0..n {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[p] += h;
            minus[p] -= h;
            problem.evaluate(&plus, &mut rp, None).unwrap();
            problem.evaluate(&minus, &mut rm, None).unwrap();
            for row in 0..m {
                let numeric = (rp[row] - rm[row]) / (2.0 * h);
                let diff = (jac[(row, p)] - numeric).abs();
                assert!(
                    diff <= 1e-6 * (1.0 + numeric.abs()),
                    "row {row} param {p}: analytic={} numeric={numeric}",
                    jac[(row, p)]
                );
            }
        }
    }

    #[test]
    fn construction_checks_substrates_and_targets() {
        let mut rng = StdRng::seed_from_u64(2);
        let data = dataset(&mut rng);

        let mut net = Network::new(2, 3, 2).unwrap();
        net.connect().unwrap();
        assert_eq!(
            ResidualProblem::new(&mut net, &data, TERMS, ResidualKind::Pure).err(),
            Some(Error::MissingSubstrate(DerivFlags::VD1))
        );
        net.add_substrates(DerivFlags::VD1);
        assert_eq!(
            ResidualProblem::new(&mut net, &data, TERMS, ResidualKind::NoReg).err(),
            Some(Error::MissingSubstrate(DerivFlags::CROSS1))
        );
        assert!(ResidualProblem::new(&mut net, &data, TERMS, ResidualKind::Pure).is_ok());

        let mut deep = Network::new(2, 3, 2).unwrap();
        deep.push_hidden_layer(3).unwrap();
        deep.connect().unwrap();
        deep.add_variational_substrate(ParamTracking::LastTwoLayers);
        assert!(matches!(
            ResidualProblem::new(&mut deep, &data, TERMS, ResidualKind::Pure),
            Err(Error::InvalidConfig(_))
        ));

        let plain = TrainingData::from_flat(vec![0.0; 4], vec![0.0; 4], 2, 2, 1, 1).unwrap();
        assert!(matches!(
            ResidualProblem::new(&mut net, &plain, TERMS, ResidualKind::NoReg),
            Err(Error::InvalidData(_))
        ));
        let narrow = TrainingData::from_flat(vec![0.0; 2], vec![0.0; 2], 1, 1, 1, 1).unwrap();
        assert!(matches!(
            ResidualProblem::new(&mut net, &narrow, TERMS, ResidualKind::Pure),
            Err(Error::InvalidData(_))
        ));
    }
}
