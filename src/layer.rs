use crate::activation::Activation;
use crate::deriv::{DerivFlags, Sweep};
use crate::feeder::Feeder;
use crate::unit::Unit;

/// An ordered collection of units plus the layer's constant bias unit.
///
/// A non-input layer owns a contiguous slice of the network's parameter arena starting at
/// [`Layer::param_start`]; each unit's [`Feeder`] covers `(upstream size + 1)` of it.
#[derive(Debug, Clone)]
pub struct Layer {
    bias: Unit,
    units: Vec<Unit>,
    param_start: usize,
}

impl Layer {
    /// A disconnected layer with `size` units (bias unit excluded).
    pub(crate) fn new(size: usize, activation: Activation) -> Self {
        Self::from_activations(Activation::Identity, std::iter::repeat_n(activation, size))
    }

    pub(crate) fn from_activations(
        bias: Activation,
        activations: impl IntoIterator<Item = Activation>,
    ) -> Self {
        let mut bias_unit = Unit::bias();
        bias_unit.set_activation(bias);
        Self {
            bias: bias_unit,
            units: activations.into_iter().map(Unit::new).collect(),
            param_start: 0,
        }
    }

    /// Number of units, bias unit excluded.
    #[inline]
    pub fn size(&self) -> usize {
        self.units.len()
    }

    #[inline]
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    #[inline]
    pub fn unit(&self, i: usize) -> Option<&Unit> {
        self.units.get(i)
    }

    /// The constant offset unit; value 1.
    #[inline]
    pub fn bias_unit(&self) -> &Unit {
        &self.bias
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.units.first().is_some_and(|u| u.feeder().is_some())
    }

    /// Global index of this layer's first parameter.
    #[inline]
    pub fn param_start(&self) -> usize {
        self.param_start
    }

    /// Parameters of this layer when fed by `upstream` units.
    #[inline]
    pub fn nparams_fed_by(&self, upstream: usize) -> usize {
        (upstream + 1) * self.units.len()
    }

    pub(crate) fn set_activation(&mut self, activation: Activation) {
        for u in &mut self.units {
            u.set_activation(activation);
        }
    }

    pub(crate) fn set_unit_activation(&mut self, i: usize, activation: Activation) {
        self.units[i].set_activation(activation);
    }

    pub(crate) fn resize(&mut self, size: usize, activation: Activation) {
        self.units.resize_with(size, || Unit::new(activation));
    }

    /// Assign feeders over `[param_start, param_start + nparams_fed_by(upstream))`.
    pub(crate) fn connect(&mut self, upstream: usize, param_start: usize) {
        self.param_start = param_start;
        let mut offset = param_start;
        for u in &mut self.units {
            let feeder = Feeder::new(offset, upstream);
            offset += feeder.nparams();
            u.set_feeder(Some(feeder));
        }
    }

    pub(crate) fn disconnect(&mut self) {
        self.param_start = 0;
        for u in &mut self.units {
            u.set_feeder(None);
        }
    }

    pub(crate) fn allocate(&mut self, flags: DerivFlags, xndim: usize, ntracked: usize) {
        for u in &mut self.units {
            u.allocate(flags, xndim, ntracked);
        }
    }

    pub(crate) fn set_inputs(&mut self, x: &[f64]) {
        debug_assert_eq!(x.len(), self.units.len());
        for (u, &xi) in self.units.iter_mut().zip(x) {
            u.set_proto_value(xi);
        }
    }

    pub(crate) fn propagate_input(&mut self, sweep: &Sweep) {
        for (i, u) in self.units.iter_mut().enumerate() {
            u.propagate_input(i, sweep);
        }
    }

    pub(crate) fn propagate(&mut self, prev: &Layer, params: &[f64], sweep: &Sweep) {
        for u in &mut self.units {
            u.propagate_fed(&prev.units, params, self.param_start, sweep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_lays_out_feeders_contiguously() {
        let mut layer = Layer::new(3, Activation::Logistic);
        assert!(!layer.is_connected());
        layer.connect(2, 5);
        assert!(layer.is_connected());
        assert_eq!(layer.nparams_fed_by(2), 9);

        let starts: Vec<usize> = layer
            .units()
            .iter()
            .map(|u| u.feeder().map(|f| f.bias_index()).unwrap())
            .collect();
        assert_eq!(starts, vec![5, 8, 11]);

        layer.disconnect();
        assert!(!layer.is_connected());
    }

    #[test]
    fn bias_unit_is_constant_one() {
        let layer = Layer::new(2, Activation::Gaussian);
        assert_eq!(layer.bias_unit().value(), 1.0);
        assert_eq!(layer.size(), 2);
    }
}
