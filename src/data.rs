//! Contiguous training data.
//!
//! The residual assembly operates on slices to avoid per-sample allocations. `TrainingData`
//! provides validated, row-major storage for inputs, targets, optional derivative targets
//! and per-output weights, partitioned into contiguous train / validation / test ranges.

use std::ops::Range;

use crate::{Error, Result};

/// A supervised dataset with derivative targets.
///
/// Stored as contiguous buffers with row-major layout:
/// - `inputs.len() == ndata * xndim`
/// - `targets.len() == ndata * yndim`
/// - `d1/d2 targets.len() == ndata * yndim * xndim`, entry `(i, j, k)` at
///   `(i * yndim + j) * xndim + k`
/// - `weights.len() == ndata * yndim`
///
/// Samples `0..ntrain` are the training block, the next `nvalid` the validation block and
/// the rest the test block.
#[derive(Debug, Clone)]
pub struct TrainingData {
    xndim: usize,
    yndim: usize,
    ndata: usize,
    ntrain: usize,
    nvalid: usize,
    inputs: Vec<f64>,
    targets: Vec<f64>,
    d1_targets: Option<Vec<f64>>,
    d2_targets: Option<Vec<f64>>,
    weights: Vec<f64>,
}

fn check_finite(name: &str, values: &[f64]) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(Error::InvalidData(format!(
            "{name} must contain only finite values"
        )))
    }
}

impl TrainingData {
    /// Build from flat buffers with shapes `(ndata, xndim)` and `(ndata, yndim)`.
    ///
    /// The first `ntrain` samples train, the next `nvalid` validate, the rest test.
    pub fn from_flat(
        inputs: Vec<f64>,
        targets: Vec<f64>,
        xndim: usize,
        yndim: usize,
        ntrain: usize,
        nvalid: usize,
    ) -> Result<Self> {
        if xndim == 0 || yndim == 0 {
            return Err(Error::InvalidData(format!(
                "xndim and yndim must be > 0 (got {xndim}, {yndim})"
            )));
        }
        if !inputs.len().is_multiple_of(xndim) {
            return Err(Error::InvalidData(format!(
                "inputs length {} is not divisible by xndim {xndim}",
                inputs.len()
            )));
        }
        let ndata = inputs.len() / xndim;
        if targets.len() != ndata * yndim {
            return Err(Error::InvalidData(format!(
                "targets length {} does not match ndata * yndim ({ndata} * {yndim})",
                targets.len()
            )));
        }
        if ntrain == 0 {
            return Err(Error::InvalidData("ntrain must be > 0".to_owned()));
        }
        if ntrain + nvalid > ndata {
            return Err(Error::InvalidData(format!(
                "ntrain + nvalid ({ntrain} + {nvalid}) exceeds ndata {ndata}"
            )));
        }
        check_finite("inputs", &inputs)?;
        check_finite("targets", &targets)?;

        Ok(Self {
            xndim,
            yndim,
            ndata,
            ntrain,
            nvalid,
            inputs,
            targets,
            d1_targets: None,
            d2_targets: None,
            weights: vec![1.0; ndata * yndim],
        })
    }

    /// Build from per-sample rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(
        inputs: &[Vec<f64>],
        targets: &[Vec<f64>],
        ntrain: usize,
        nvalid: usize,
    ) -> Result<Self> {
        if inputs.len() != targets.len() {
            return Err(Error::InvalidData(format!(
                "inputs/targets length mismatch: {} vs {}",
                inputs.len(),
                targets.len()
            )));
        }
        let xndim = inputs.first().map(|r| r.len()).unwrap_or(0);
        let yndim = targets.first().map(|r| r.len()).unwrap_or(0);
        let inputs = flatten("input", inputs, xndim)?;
        let targets = flatten("target", targets, yndim)?;
        Self::from_flat(inputs, targets, xndim, yndim, ntrain, nvalid)
    }

    /// Attach per-sample, per-output weights, shape `(ndata, yndim)`.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.ndata * self.yndim {
            return Err(Error::InvalidData(format!(
                "weights length {} does not match ndata * yndim ({} * {})",
                weights.len(),
                self.ndata,
                self.yndim
            )));
        }
        check_finite("weights", &weights)?;
        self.weights = weights;
        Ok(self)
    }

    /// Attach first-derivative targets, shape `(ndata, yndim, xndim)`.
    pub fn with_first_derivatives(mut self, d1: Vec<f64>) -> Result<Self> {
        self.check_derivative_len("first-derivative targets", &d1)?;
        self.d1_targets = Some(d1);
        Ok(self)
    }

    /// Attach second-derivative targets, shape `(ndata, yndim, xndim)`.
    pub fn with_second_derivatives(mut self, d2: Vec<f64>) -> Result<Self> {
        self.check_derivative_len("second-derivative targets", &d2)?;
        self.d2_targets = Some(d2);
        Ok(self)
    }

    fn check_derivative_len(&self, name: &str, values: &[f64]) -> Result<()> {
        let expected = self.ndata * self.yndim * self.xndim;
        if values.len() != expected {
            return Err(Error::InvalidData(format!(
                "{name} length {} does not match ndata * yndim * xndim ({expected})",
                values.len()
            )));
        }
        check_finite(name, values)
    }

    #[inline]
    pub fn xndim(&self) -> usize {
        self.xndim
    }

    #[inline]
    pub fn yndim(&self) -> usize {
        self.yndim
    }

    /// Total number of samples.
    #[inline]
    pub fn ndata(&self) -> usize {
        self.ndata
    }

    #[inline]
    pub fn ntrain(&self) -> usize {
        self.ntrain
    }

    #[inline]
    pub fn nvalid(&self) -> usize {
        self.nvalid
    }

    #[inline]
    pub fn ntest(&self) -> usize {
        self.ndata - self.ntrain - self.nvalid
    }

    #[inline]
    pub fn train_range(&self) -> Range<usize> {
        0..self.ntrain
    }

    #[inline]
    pub fn validation_range(&self) -> Range<usize> {
        self.ntrain..self.ntrain + self.nvalid
    }

    #[inline]
    pub fn test_range(&self) -> Range<usize> {
        self.ntrain + self.nvalid..self.ndata
    }

    #[inline]
    pub fn has_first_derivatives(&self) -> bool {
        self.d1_targets.is_some()
    }

    #[inline]
    pub fn has_second_derivatives(&self) -> bool {
        self.d2_targets.is_some()
    }

    /// Returns the `i`-th input row (shape: `(xndim,)`).
    ///
    /// Panics if `i >= ndata`.
    #[inline]
    pub fn input(&self, i: usize) -> &[f64] {
        let start = i * self.xndim;
        &self.inputs[start..start + self.xndim]
    }

    /// Returns the `i`-th target row (shape: `(yndim,)`).
    #[inline]
    pub fn target(&self, i: usize) -> &[f64] {
        let start = i * self.yndim;
        &self.targets[start..start + self.yndim]
    }

    /// Returns the `i`-th weight row (shape: `(yndim,)`).
    #[inline]
    pub fn weights(&self, i: usize) -> &[f64] {
        let start = i * self.yndim;
        &self.weights[start..start + self.yndim]
    }

    /// First-derivative targets of sample `i`, shape `(yndim, xndim)`.
    #[inline]
    pub fn first_derivative_target(&self, i: usize) -> Option<&[f64]> {
        let n = self.yndim * self.xndim;
        self.d1_targets.as_deref().map(|d| &d[i * n..(i + 1) * n])
    }

    /// Second-derivative targets of sample `i`, shape `(yndim, xndim)`.
    #[inline]
    pub fn second_derivative_target(&self, i: usize) -> Option<&[f64]> {
        let n = self.yndim * self.xndim;
        self.d2_targets.as_deref().map(|d| &d[i * n..(i + 1) * n])
    }
}

fn flatten(name: &str, rows: &[Vec<f64>], dim: usize) -> Result<Vec<f64>> {
    let mut flat = Vec::with_capacity(rows.len() * dim);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(Error::InvalidData(format!(
                "{name} row {i} has len {}, expected {dim}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Ok(flat)
}
