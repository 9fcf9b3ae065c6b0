//! A single network unit: one optional [`Feeder`] composed with one [`Activation`].
//!
//! Forward-mode recurrences for a fed unit with upstream units `j` (values `y_j`,
//! input derivatives `y1_j[k]`, `y2_j[k]`, parameter derivatives `v_j[p]`, cross derivatives
//! `c1_j[k][p]`, `c2_j[k][p]`), pre-activation `z` and activation derivatives `a1, a2, a3`:
//!
//! ```text
//! g[k]  = sum_j w_j y1_j[k]                       (dz/dx_k)
//! h[k]  = sum_j w_j y2_j[k]                       (d2z/dx_k2)
//! vz[p] = sum_j w_j v_j[p] + [p = bias] + [p = w_j] y_j
//! dg    = sum_j w_j c1_j[k][p] + [p = w_j] y1_j[k]
//! dh    = sum_j w_j c2_j[k][p] + [p = w_j] y2_j[k]
//!
//! d1[k]    = a1 g
//! d2[k]    = a1 h + a2 g^2
//! vd1[p]   = a1 vz
//! c1[k][p] = a2 vz g + a1 dg
//! c2[k][p] = a3 vz g^2 + a2 (vz h + 2 g dg) + a1 dh
//! ```
//!
//! Upstream parameter derivatives are nonzero only for parameters of earlier layers, so the
//! upstream sums run over that prefix of the tracked range only.

use crate::activation::Activation;
use crate::deriv::{DerivFlags, Sweep};
use crate::feeder::Feeder;

#[derive(Debug, Clone)]
pub struct Unit {
    activation: Activation,
    feeder: Option<Feeder>,
    proto: f64,
    value: f64,

    d1: Vec<f64>,
    d2: Vec<f64>,
    vd1: Vec<f64>,
    /// Row-major `(xndim, ntracked)`.
    c1: Vec<f64>,
    /// Row-major `(xndim, ntracked)`.
    c2: Vec<f64>,

    // Intermediates kept for the cross recurrences, sized with the substrates.
    g: Vec<f64>,
    h: Vec<f64>,
    vz: Vec<f64>,
}

impl Unit {
    pub(crate) fn new(activation: Activation) -> Self {
        Self {
            activation,
            feeder: None,
            proto: 0.0,
            value: activation.f(0.0),
            d1: Vec::new(),
            d2: Vec::new(),
            vd1: Vec::new(),
            c1: Vec::new(),
            c2: Vec::new(),
            g: Vec::new(),
            h: Vec::new(),
            vz: Vec::new(),
        }
    }

    /// The constant offset unit every layer carries. Its value is always 1 and it has no
    /// derivatives; its outgoing weight is the bias of each downstream feeder.
    pub(crate) fn bias() -> Self {
        let mut unit = Self::new(Activation::Identity);
        unit.proto = 1.0;
        unit.value = 1.0;
        unit
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub(crate) fn set_activation(&mut self, activation: Activation) {
        self.activation = activation;
    }

    #[inline]
    pub fn feeder(&self) -> Option<Feeder> {
        self.feeder
    }

    #[inline]
    pub(crate) fn set_feeder(&mut self, feeder: Option<Feeder>) {
        self.feeder = feeder;
    }

    #[inline]
    pub fn proto_value(&self) -> f64 {
        self.proto
    }

    #[inline]
    pub(crate) fn set_proto_value(&mut self, proto: f64) {
        self.proto = proto;
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// `d value / d x_k` for each network input `k`. Empty without the `D1` substrate.
    #[inline]
    pub fn first_derivatives(&self) -> &[f64] {
        &self.d1
    }

    /// `d2 value / d x_k2` for each network input `k`. Empty without the `D2` substrate.
    #[inline]
    pub fn second_derivatives(&self) -> &[f64] {
        &self.d2
    }

    /// `d value / d beta_p` for each tracked parameter. Empty without the `VD1` substrate.
    #[inline]
    pub fn variational_derivatives(&self) -> &[f64] {
        &self.vd1
    }

    /// `d2 value / d x_k d beta_p`, row-major `(xndim, ntracked)`.
    #[inline]
    pub fn cross_first_derivatives(&self) -> &[f64] {
        &self.c1
    }

    /// `d3 value / d x_k2 d beta_p`, row-major `(xndim, ntracked)`.
    #[inline]
    pub fn cross_second_derivatives(&self) -> &[f64] {
        &self.c2
    }

    /// (Re)allocate derivative arrays. `flags` must already be closed.
    pub(crate) fn allocate(&mut self, flags: DerivFlags, xndim: usize, ntracked: usize) {
        fn sized(on: bool, len: usize) -> Vec<f64> {
            if on { vec![0.0; len] } else { Vec::new() }
        }

        let d1 = flags.contains(DerivFlags::D1);
        let d2 = flags.contains(DerivFlags::D2);
        let vd1 = flags.contains(DerivFlags::VD1);
        self.d1 = sized(d1, xndim);
        self.g = sized(d1, xndim);
        self.d2 = sized(d2, xndim);
        self.h = sized(d2, xndim);
        self.vd1 = sized(vd1, ntracked);
        self.vz = sized(vd1, ntracked);
        self.c1 = sized(flags.contains(DerivFlags::CROSS1), xndim * ntracked);
        self.c2 = sized(flags.contains(DerivFlags::CROSS2), xndim * ntracked);
    }

    /// Propagation for a unit of the input layer, which carries network input `index`.
    ///
    /// Parameter and cross derivatives of input units are identically zero and stay at
    /// their allocated zeros.
    pub(crate) fn propagate_input(&mut self, index: usize, sweep: &Sweep) {
        let a = self.activation.eval(self.proto, sweep.order);
        self.value = a.value;

        if sweep.flags.contains(DerivFlags::D1) {
            self.d1.fill(0.0);
            self.d1[index] = a.d1;
        }
        if sweep.flags.contains(DerivFlags::D2) {
            self.d2.fill(0.0);
            self.d2[index] = a.d2;
        }
    }

    /// Propagation for a fed unit.
    ///
    /// `layer_start` is the global index of the first parameter of this unit's layer.
    pub(crate) fn propagate_fed(
        &mut self,
        prev: &[Unit],
        params: &[f64],
        layer_start: usize,
        sweep: &Sweep,
    ) {
        let Some(feeder) = self.feeder else {
            debug_assert!(false, "fed propagation on a unit without feeder");
            return;
        };
        debug_assert_eq!(feeder.ninputs(), prev.len());

        let w = &feeder.betas(params)[1..];
        self.proto = feeder.feed(params, prev.iter().map(|u| u.value));
        let a = self.activation.eval(self.proto, sweep.order);
        self.value = a.value;

        let flags = sweep.flags;

        if flags.contains(DerivFlags::D1) {
            for k in 0..self.d1.len() {
                let mut g = 0.0;
                for (wj, u) in w.iter().zip(prev) {
                    g = wj.mul_add(u.d1[k], g);
                }
                self.g[k] = g;
                self.d1[k] = a.d1 * g;
            }
        }

        if flags.contains(DerivFlags::D2) {
            for k in 0..self.d2.len() {
                let mut h = 0.0;
                for (wj, u) in w.iter().zip(prev) {
                    h = wj.mul_add(u.d2[k], h);
                }
                let g = self.g[k];
                self.h[k] = h;
                self.d2[k] = a.d1 * h + a.d2 * g * g;
            }
        }

        if !flags.contains(DerivFlags::VD1) {
            return;
        }

        let nt = sweep.ntracked();
        let up = sweep.upstream_len(layer_start);

        for p in 0..up {
            let mut vz = 0.0;
            for (wj, u) in w.iter().zip(prev) {
                vz = wj.mul_add(u.vd1[p], vz);
            }
            self.vz[p] = vz;
        }
        self.vz[up..].fill(0.0);
        if let Some(lb) = sweep.local(feeder.bias_index()) {
            self.vz[lb] = 1.0;
        }
        for (j, u) in prev.iter().enumerate() {
            if let Some(lw) = sweep.local(feeder.weight_index(j)) {
                self.vz[lw] = u.value;
            }
        }
        for p in 0..nt {
            self.vd1[p] = a.d1 * self.vz[p];
        }

        if !flags.contains(DerivFlags::CROSS1) {
            return;
        }
        let cross2 = flags.contains(DerivFlags::CROSS2);

        for k in 0..self.d1.len() {
            let row = k * nt;

            // First pass: dg (and dh) into the output rows.
            for p in 0..up {
                let mut dg = 0.0;
                for (wj, u) in w.iter().zip(prev) {
                    dg = wj.mul_add(u.c1[row + p], dg);
                }
                self.c1[row + p] = dg;
                if cross2 {
                    let mut dh = 0.0;
                    for (wj, u) in w.iter().zip(prev) {
                        dh = wj.mul_add(u.c2[row + p], dh);
                    }
                    self.c2[row + p] = dh;
                }
            }
            self.c1[row + up..row + nt].fill(0.0);
            if cross2 {
                self.c2[row + up..row + nt].fill(0.0);
            }
            for (j, u) in prev.iter().enumerate() {
                if let Some(lw) = sweep.local(feeder.weight_index(j)) {
                    self.c1[row + lw] += u.d1[k];
                    if cross2 {
                        self.c2[row + lw] += u.d2[k];
                    }
                }
            }

            // Second pass: product rule.
            let g = self.g[k];
            for p in 0..nt {
                let vz = self.vz[p];
                let dg = self.c1[row + p];
                self.c1[row + p] = a.d2 * vz * g + a.d1 * dg;
                if cross2 {
                    let h = self.h[k];
                    let dh = self.c2[row + p];
                    self.c2[row + p] =
                        a.d3 * vz * g * g + a.d2 * (vz * h + 2.0 * g * dg) + a.d1 * dh;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn input_units(xs: &[f64], flags: DerivFlags, ntracked: usize) -> Vec<Unit> {
        let sweep = Sweep::new(flags, 0..ntracked);
        xs.iter()
            .enumerate()
            .map(|(i, &x)| {
                let mut u = Unit::new(Activation::Identity);
                u.allocate(flags, xs.len(), ntracked);
                u.set_proto_value(x);
                u.propagate_input(i, &sweep);
                u
            })
            .collect()
    }

    #[test]
    fn input_unit_derivatives_are_one_hot() {
        let units = input_units(&[0.3, -0.4], DerivFlags::ALL, 3);
        assert_eq!(units[1].value(), -0.4);
        assert_eq!(units[1].first_derivatives(), &[0.0, 1.0]);
        assert_eq!(units[1].second_derivatives(), &[0.0, 0.0]);
        assert!(units[1].variational_derivatives().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn single_fed_unit_matches_closed_form() {
        // y = tanh(b + w0 x0 + w1 x1), parameters [b, w0, w1].
        let flags = DerivFlags::ALL;
        let xs = [0.3, -0.4];
        let params = [0.1, 0.7, -1.2];
        let prev = input_units(&xs, flags, 3);

        let mut unit = Unit::new(Activation::Tanh);
        unit.set_feeder(Some(Feeder::new(0, 2)));
        unit.allocate(flags, 2, 3);
        unit.propagate_fed(&prev, &params, 0, &Sweep::new(flags, 0..3));

        let z = 0.1 + 0.7 * 0.3 - 1.2 * -0.4;
        let a = Activation::Tanh.fd123(z);
        assert_abs_diff_eq!(unit.value(), a.value, epsilon = 1e-15);
        assert_abs_diff_eq!(unit.first_derivatives()[0], a.d1 * 0.7, epsilon = 1e-15);
        assert_abs_diff_eq!(unit.second_derivatives()[1], a.d2 * 1.44, epsilon = 1e-15);

        let vd1 = unit.variational_derivatives();
        assert_abs_diff_eq!(vd1[0], a.d1, epsilon = 1e-15);
        assert_abs_diff_eq!(vd1[1], a.d1 * 0.3, epsilon = 1e-15);
        assert_abs_diff_eq!(vd1[2], a.d1 * -0.4, epsilon = 1e-15);

        // d/dw0 of a1(z) w0 = a2 x0 w0 + a1.
        let c1 = unit.cross_first_derivatives();
        assert_abs_diff_eq!(c1[1], a.d2 * 0.3 * 0.7 + a.d1, epsilon = 1e-14);
        // d/db of a1(z) w1 = a2 w1.
        assert_abs_diff_eq!(c1[3], a.d2 * -1.2, epsilon = 1e-14);

        // d/dw1 of a2(z) w1^2 = a3 x1 w1^2 + 2 a2 w1.
        let c2 = unit.cross_second_derivatives();
        assert_abs_diff_eq!(c2[5], a.d3 * -0.4 * 1.44 + 2.0 * a.d2 * -1.2, epsilon = 1e-14);
    }
}
