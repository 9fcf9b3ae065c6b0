use std::ops::Range;

/// The affine stage of one unit: `z = bias + sum_j w_j * y_j`.
///
/// A feeder does not store its parameters. They live in the network's contiguous
/// parameter arena as `[bias, w_0, .., w_{n-1}]` starting at `offset`, so global
/// parameter indexing is a plain slice index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feeder {
    offset: usize,
    ninputs: usize,
}

impl Feeder {
    #[inline]
    pub(crate) fn new(offset: usize, ninputs: usize) -> Self {
        Self { offset, ninputs }
    }

    #[inline]
    pub fn ninputs(self) -> usize {
        self.ninputs
    }

    #[inline]
    pub fn nparams(self) -> usize {
        self.ninputs + 1
    }

    /// Global indices of this feeder's parameters (bias first).
    #[inline]
    pub fn param_range(self) -> Range<usize> {
        self.offset..self.offset + self.nparams()
    }

    #[inline]
    pub fn bias_index(self) -> usize {
        self.offset
    }

    #[inline]
    pub fn weight_index(self, input: usize) -> usize {
        debug_assert!(input < self.ninputs);
        self.offset + 1 + input
    }

    #[inline]
    pub fn betas(self, params: &[f64]) -> &[f64] {
        &params[self.param_range()]
    }

    /// Pre-activation value from the upstream unit values.
    #[inline]
    pub fn feed(self, params: &[f64], inputs: impl Iterator<Item = f64>) -> f64 {
        let betas = self.betas(params);
        let mut sum = betas[0];
        let mut n = 0;
        for (&w, x) in betas[1..].iter().zip(inputs) {
            sum = w.mul_add(x, sum);
            n += 1;
        }
        debug_assert_eq!(n, self.ninputs);
        sum
    }
}
