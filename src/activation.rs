//! Activation functions.
//!
//! A unit computes a pre-activation ("proto") value `z = bias + sum_j w_j * y_j` and then
//! applies its activation function. Forward-mode differentiation needs more than the value:
//!
//! - `f'(z)` for first input derivatives and parameter derivatives,
//! - `f''(z)` for second input derivatives and cross first derivatives,
//! - `f'''(z)` for cross second derivatives.
//!
//! Each flavour is a separate entry point so callers never pay for derivatives they do not
//! use. Every flavour exists in a scalar form and in a batch form over contiguous slices.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Element-wise activation function.
pub enum Activation {
    Identity,
    /// `1 / (1 + e^-x)`
    Logistic,
    /// `e^(-x^2)`
    Gaussian,
    Tanh,
    Sine,
    ReLU,
    /// `ln(1 + e^x)`
    SoftPlus,
    Exponential,
}

/// Value and derivatives of an activation at one point.
///
/// Entries beyond the requested order are left at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActivationDerivs {
    pub value: f64,
    pub d1: f64,
    pub d2: f64,
    pub d3: f64,
}

impl Activation {
    pub const ALL: [Activation; 8] = [
        Activation::Identity,
        Activation::Logistic,
        Activation::Gaussian,
        Activation::Tanh,
        Activation::Sine,
        Activation::ReLU,
        Activation::SoftPlus,
        Activation::Exponential,
    ];

    /// Short identifier used by the text serialization format.
    pub fn code(self) -> &'static str {
        match self {
            Activation::Identity => "ID",
            Activation::Logistic => "LGS",
            Activation::Gaussian => "GSS",
            Activation::Tanh => "TANS",
            Activation::Sine => "SIN",
            Activation::ReLU => "RELU",
            Activation::SoftPlus => "SRLU",
            Activation::Exponential => "EXP",
        }
    }

    /// Parse an identifier produced by [`Activation::code`].
    pub fn from_code(code: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|act| act.code() == code)
            .ok_or_else(|| Error::UnknownActivation(code.to_owned()))
    }

    #[inline]
    pub fn f(self, x: f64) -> f64 {
        self.eval(x, 0).value
    }

    #[inline]
    pub fn fd1(self, x: f64) -> ActivationDerivs {
        self.eval(x, 1)
    }

    #[inline]
    pub fn fd12(self, x: f64) -> ActivationDerivs {
        self.eval(x, 2)
    }

    #[inline]
    pub fn fd123(self, x: f64) -> ActivationDerivs {
        self.eval(x, 3)
    }

    /// Value plus derivatives up to `order` (0..=3).
    #[inline]
    pub fn eval(self, x: f64, order: u8) -> ActivationDerivs {
        let mut out = ActivationDerivs::default();
        match self {
            Activation::Identity => {
                out.value = x;
                if order >= 1 {
                    out.d1 = 1.0;
                }
            }
            Activation::Logistic => {
                let s = sigmoid(x);
                out.value = s;
                if order >= 1 {
                    let ds = s * (1.0 - s);
                    out.d1 = ds;
                    if order >= 2 {
                        out.d2 = ds * (1.0 - 2.0 * s);
                    }
                    if order >= 3 {
                        out.d3 = ds * (1.0 - 6.0 * s + 6.0 * s * s);
                    }
                }
            }
            Activation::Gaussian => {
                let e = (-x * x).exp();
                out.value = e;
                if order >= 1 {
                    out.d1 = -2.0 * x * e;
                }
                if order >= 2 {
                    out.d2 = (4.0 * x * x - 2.0) * e;
                }
                if order >= 3 {
                    out.d3 = (12.0 * x - 8.0 * x * x * x) * e;
                }
            }
            Activation::Tanh => {
                let t = x.tanh();
                out.value = t;
                if order >= 1 {
                    let dt = 1.0 - t * t;
                    out.d1 = dt;
                    if order >= 2 {
                        out.d2 = -2.0 * t * dt;
                    }
                    if order >= 3 {
                        out.d3 = (6.0 * t * t - 2.0) * dt;
                    }
                }
            }
            Activation::Sine => {
                let (s, c) = x.sin_cos();
                out.value = s;
                if order >= 1 {
                    out.d1 = c;
                }
                if order >= 2 {
                    out.d2 = -s;
                }
                if order >= 3 {
                    out.d3 = -c;
                }
            }
            Activation::ReLU => {
                out.value = x.max(0.0);
                if order >= 1 {
                    out.d1 = if x > 0.0 { 1.0 } else { 0.0 };
                }
            }
            Activation::SoftPlus => {
                // ln(1 + e^x) without overflow for large |x|.
                out.value = x.max(0.0) + (-x.abs()).exp().ln_1p();
                if order >= 1 {
                    let s = sigmoid(x);
                    out.d1 = s;
                    let ds = s * (1.0 - s);
                    if order >= 2 {
                        out.d2 = ds;
                    }
                    if order >= 3 {
                        out.d3 = ds * (1.0 - 2.0 * s);
                    }
                }
            }
            Activation::Exponential => {
                let e = x.exp();
                out.value = e;
                if order >= 1 {
                    out.d1 = e;
                }
                if order >= 2 {
                    out.d2 = e;
                }
                if order >= 3 {
                    out.d3 = e;
                }
            }
        }
        out
    }

    /// `values[i] = f(z[i])`.
    pub fn apply(self, z: &[f64], values: &mut [f64]) {
        debug_assert_eq!(z.len(), values.len());
        for (v, &x) in values.iter_mut().zip(z) {
            *v = self.f(x);
        }
    }

    /// In-place `values[i] = f(values[i])`.
    pub fn apply_in_place(self, values: &mut [f64]) {
        for v in values.iter_mut() {
            *v = self.f(*v);
        }
    }

    /// Values and first derivatives for a batch of pre-activations.
    pub fn apply_d1(self, z: &[f64], values: &mut [f64], d1: &mut [f64]) {
        debug_assert_eq!(z.len(), values.len());
        debug_assert_eq!(z.len(), d1.len());
        for i in 0..z.len() {
            let r = self.fd1(z[i]);
            values[i] = r.value;
            d1[i] = r.d1;
        }
    }

    /// Values, first and second derivatives for a batch of pre-activations.
    pub fn apply_d12(self, z: &[f64], values: &mut [f64], d1: &mut [f64], d2: &mut [f64]) {
        debug_assert_eq!(z.len(), values.len());
        debug_assert_eq!(z.len(), d1.len());
        debug_assert_eq!(z.len(), d2.len());
        for i in 0..z.len() {
            let r = self.fd12(z[i]);
            values[i] = r.value;
            d1[i] = r.d1;
            d2[i] = r.d2;
        }
    }

    /// Values and the first three derivatives for a batch of pre-activations.
    pub fn apply_d123(
        self,
        z: &[f64],
        values: &mut [f64],
        d1: &mut [f64],
        d2: &mut [f64],
        d3: &mut [f64],
    ) {
        debug_assert_eq!(z.len(), values.len());
        debug_assert_eq!(z.len(), d1.len());
        debug_assert_eq!(z.len(), d2.len());
        debug_assert_eq!(z.len(), d3.len());
        for i in 0..z.len() {
            let r = self.fd123(z[i]);
            values[i] = r.value;
            d1[i] = r.d1;
            d2[i] = r.d2;
            d3[i] = r.d3;
        }
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}
