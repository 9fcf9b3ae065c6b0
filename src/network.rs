use std::ops::Range;

use rand::Rng;
use tracing::debug;

use crate::deriv::{DerivFlags, ParamTracking, Sweep};
use crate::layer::Layer;
use crate::unit::Unit;
use crate::{Activation, Error, Result};

/// A linear stack of layers with a contiguous parameter arena.
///
/// Parameters are ordered by layer (input layer excluded), then unit, then bias first and
/// weights after within a unit. The arena is empty while the network is disconnected.
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Layer>,
    params: Vec<f64>,
    connected: bool,
    substrates: DerivFlags,
    tracking: ParamTracking,
    tracked: Range<usize>,
}

impl Network {
    /// A disconnected network with one hidden layer. Sizes exclude bias units.
    ///
    /// Activations default to identity on the input layer and logistic elsewhere.
    pub fn new(ninput: usize, nhidden: usize, noutput: usize) -> Result<Self> {
        if ninput == 0 || nhidden == 0 || noutput == 0 {
            return Err(Error::InvalidConfig(format!(
                "layer sizes must be > 0 (got {ninput}, {nhidden}, {noutput})"
            )));
        }
        Ok(Self::from_layers(vec![
            Layer::new(ninput, Activation::Identity),
            Layer::new(nhidden, Activation::Logistic),
            Layer::new(noutput, Activation::Logistic),
        ]))
    }

    /// A disconnected network from per-layer activation codes.
    ///
    /// Each layer lists the bias unit's code first, then one code per unit.
    pub fn from_description<S: AsRef<str>>(description: &[Vec<S>]) -> Result<Self> {
        if description.len() < 3 {
            return Err(Error::InvalidConfig(format!(
                "a network needs at least 3 layers (got {})",
                description.len()
            )));
        }
        let mut layers = Vec::with_capacity(description.len());
        for (l, codes) in description.iter().enumerate() {
            if codes.len() < 2 {
                return Err(Error::InvalidConfig(format!(
                    "layer {l} needs a bias unit and at least one unit (got {} entries)",
                    codes.len()
                )));
            }
            let bias = Activation::from_code(codes[0].as_ref())?;
            let acts = codes[1..]
                .iter()
                .map(|c| Activation::from_code(c.as_ref()))
                .collect::<Result<Vec<_>>>()?;
            layers.push(Layer::from_activations(bias, acts));
        }
        Ok(Self::from_layers(layers))
    }

    pub(crate) fn from_layers(layers: Vec<Layer>) -> Self {
        debug_assert!(layers.len() >= 3);
        Self {
            layers,
            params: Vec::new(),
            connected: false,
            substrates: DerivFlags::NONE,
            tracking: ParamTracking::All,
            tracked: 0..0,
        }
    }

    /// Per-layer activation codes, bias unit first.
    pub fn description(&self) -> Vec<Vec<&'static str>> {
        self.layers
            .iter()
            .map(|layer| {
                std::iter::once(layer.bias_unit().activation().code())
                    .chain(layer.units().iter().map(|u| u.activation().code()))
                    .collect()
            })
            .collect()
    }

    #[inline]
    pub fn nlayers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn layer(&self, l: usize) -> Option<&Layer> {
        self.layers.get(l)
    }

    /// Number of network inputs.
    #[inline]
    pub fn xndim(&self) -> usize {
        self.layers[0].size()
    }

    /// Number of network outputs.
    #[inline]
    pub fn yndim(&self) -> usize {
        self.output_layer().size()
    }

    #[inline]
    pub fn output_layer(&self) -> &Layer {
        &self.layers[self.layers.len() - 1]
    }

    /// Output units, for hot loops reading values and derivative slices directly.
    #[inline]
    pub fn output_units(&self) -> &[Unit] {
        self.output_layer().units()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Allocated derivative substrates (always closed under their dependencies).
    #[inline]
    pub fn substrates(&self) -> DerivFlags {
        self.substrates
    }

    #[inline]
    pub fn tracking(&self) -> ParamTracking {
        self.tracking
    }

    /// Global parameter indices covered by the variational substrate.
    #[inline]
    pub fn tracked_params(&self) -> Range<usize> {
        self.tracked.clone()
    }

    /// `sum over non-input layers of (upstream size + 1) * size`, connected or not.
    #[inline]
    pub fn nparams(&self) -> usize {
        self.param_start_of(self.layers.len())
    }

    fn param_start_of(&self, l: usize) -> usize {
        (1..l)
            .map(|j| self.layers[j].nparams_fed_by(self.layers[j - 1].size()))
            .sum()
    }

    fn tracked_range(&self) -> Range<usize> {
        let end = self.nparams();
        match self.tracking {
            ParamTracking::All => 0..end,
            ParamTracking::LastTwoLayers => self.param_start_of(self.layers.len() - 2)..end,
        }
    }

    /// Wire every feeder to its upstream layer. New parameters are zero.
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Err(Error::InvalidConfig("network is already connected".to_owned()));
        }
        self.params = vec![0.0; self.nparams()];
        self.connected = true;
        self.rewire();
        debug!(nparams = self.params.len(), "network connected");
        Ok(())
    }

    /// Drop all feeders and parameters.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Err(Error::InvalidConfig("network is not connected".to_owned()));
        }
        for layer in &mut self.layers[1..] {
            layer.disconnect();
        }
        self.params.clear();
        self.connected = false;
        debug!("network disconnected");
        Ok(())
    }

    /// Recompute feeder offsets after a structural change.
    fn rewire(&mut self) {
        if !self.connected {
            return;
        }
        let mut start = 0;
        for l in 1..self.layers.len() {
            let upstream = self.layers[l - 1].size();
            self.layers[l].connect(upstream, start);
            start += self.layers[l].nparams_fed_by(upstream);
        }
        debug_assert_eq!(start, self.params.len());
    }

    /// Resize every unit's derivative arrays to the current topology and substrates.
    fn reallocate(&mut self) {
        self.tracked = if self.substrates.contains(DerivFlags::VD1) {
            self.tracked_range()
        } else {
            0..0
        };
        let xndim = self.xndim();
        let ntracked = self.tracked.len();
        for layer in &mut self.layers {
            layer.allocate(self.substrates, xndim, ntracked);
        }
        debug!(
            substrates = %self.substrates,
            xndim,
            ntracked,
            "derivative substrates allocated"
        );
    }

    /// Allocate derivative substrates (plus their dependencies) in every unit.
    ///
    /// Substrates accumulate; the variational substrate uses the current tracking mode.
    pub fn add_substrates(&mut self, flags: DerivFlags) {
        self.substrates = (self.substrates | flags).closure();
        self.reallocate();
    }

    /// Allocate the variational substrate, tracking the chosen parameter subset.
    pub fn add_variational_substrate(&mut self, tracking: ParamTracking) {
        self.tracking = tracking;
        self.add_substrates(DerivFlags::VD1);
    }

    /// Free all derivative arrays.
    pub fn clear_substrates(&mut self) {
        self.substrates = DerivFlags::NONE;
        self.reallocate();
    }

    pub fn set_input(&mut self, x: &[f64]) -> Result<()> {
        if x.len() != self.xndim() {
            return Err(Error::InvalidShape(format!(
                "input len {} does not match xndim {}",
                x.len(),
                self.xndim()
            )));
        }
        self.layers[0].set_inputs(x);
        Ok(())
    }

    /// Propagate computing every allocated substrate.
    pub fn propagate(&mut self) -> Result<()> {
        self.propagate_with(self.substrates)
    }

    /// Propagate computing only `request` (closed under dependencies).
    ///
    /// Arrays of allocated but unrequested substrates keep stale contents.
    pub fn propagate_with(&mut self, request: DerivFlags) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let request = request.closure();
        if !self.substrates.contains(request) {
            return Err(Error::MissingSubstrate(request.difference(self.substrates)));
        }

        let sweep = Sweep::new(request, self.tracked.clone());
        self.layers[0].propagate_input(&sweep);
        for l in 1..self.layers.len() {
            // Borrow the previous layer immutably and the current layer mutably.
            let (left, right) = self.layers.split_at_mut(l);
            right[0].propagate(&left[l - 1], &self.params, &sweep);
        }
        Ok(())
    }

    fn output_unit(&self, i: usize) -> Result<&Unit> {
        self.output_layer().unit(i).ok_or_else(|| {
            Error::InvalidShape(format!(
                "output index {i} out of range (yndim = {})",
                self.yndim()
            ))
        })
    }

    fn require(&self, flag: DerivFlags) -> Result<()> {
        if self.substrates.contains(flag) {
            Ok(())
        } else {
            Err(Error::MissingSubstrate(flag))
        }
    }

    fn check_input_dim(&self, k: usize) -> Result<()> {
        if k < self.xndim() {
            Ok(())
        } else {
            Err(Error::InvalidShape(format!(
                "input direction {k} out of range (xndim = {})",
                self.xndim()
            )))
        }
    }

    fn tracked_local(&self, p: usize) -> Result<usize> {
        let nparams = self.nparams();
        if p >= nparams {
            return Err(Error::ParameterIndex { index: p, nparams });
        }
        if self.tracked.contains(&p) {
            Ok(p - self.tracked.start)
        } else {
            Err(Error::UntrackedParameter { index: p })
        }
    }

    pub fn output(&self, i: usize) -> Result<f64> {
        Ok(self.output_unit(i)?.value())
    }

    /// Copy all output values into `out`.
    pub fn outputs_into(&self, out: &mut [f64]) -> Result<()> {
        if out.len() != self.yndim() {
            return Err(Error::InvalidShape(format!(
                "output buffer len {} does not match yndim {}",
                out.len(),
                self.yndim()
            )));
        }
        for (o, u) in out.iter_mut().zip(self.output_units()) {
            *o = u.value();
        }
        Ok(())
    }

    /// `d y_i / d x_k`.
    pub fn first_derivative(&self, i: usize, k: usize) -> Result<f64> {
        self.require(DerivFlags::D1)?;
        self.check_input_dim(k)?;
        Ok(self.output_unit(i)?.first_derivatives()[k])
    }

    /// `d2 y_i / d x_k2`.
    pub fn second_derivative(&self, i: usize, k: usize) -> Result<f64> {
        self.require(DerivFlags::D2)?;
        self.check_input_dim(k)?;
        Ok(self.output_unit(i)?.second_derivatives()[k])
    }

    /// `d y_i / d beta_p` for global parameter index `p`.
    pub fn variational_derivative(&self, i: usize, p: usize) -> Result<f64> {
        self.require(DerivFlags::VD1)?;
        let local = self.tracked_local(p)?;
        Ok(self.output_unit(i)?.variational_derivatives()[local])
    }

    /// `d2 y_i / d x_k d beta_p`.
    pub fn cross_first_derivative(&self, i: usize, k: usize, p: usize) -> Result<f64> {
        self.require(DerivFlags::CROSS1)?;
        self.check_input_dim(k)?;
        let local = self.tracked_local(p)?;
        let row = k * self.tracked.len();
        Ok(self.output_unit(i)?.cross_first_derivatives()[row + local])
    }

    /// `d3 y_i / d x_k2 d beta_p`.
    pub fn cross_second_derivative(&self, i: usize, k: usize, p: usize) -> Result<f64> {
        self.require(DerivFlags::CROSS2)?;
        self.check_input_dim(k)?;
        let local = self.tracked_local(p)?;
        let row = k * self.tracked.len();
        Ok(self.output_unit(i)?.cross_second_derivatives()[row + local])
    }

    fn check_param_index(&self, i: usize) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if i >= self.params.len() {
            return Err(Error::ParameterIndex {
                index: i,
                nparams: self.params.len(),
            });
        }
        Ok(())
    }

    pub fn parameter(&self, i: usize) -> Result<f64> {
        self.check_param_index(i)?;
        Ok(self.params[i])
    }

    pub fn set_parameter(&mut self, i: usize, value: f64) -> Result<()> {
        self.check_param_index(i)?;
        self.params[i] = value;
        Ok(())
    }

    pub fn parameters(&self) -> Result<&[f64]> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        Ok(&self.params)
    }

    pub fn set_parameters(&mut self, values: &[f64]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if values.len() != self.params.len() {
            return Err(Error::InvalidShape(format!(
                "parameters len {} does not match nparams {}",
                values.len(),
                self.params.len()
            )));
        }
        self.params.copy_from_slice(values);
        Ok(())
    }

    /// Draw every parameter uniformly from `[-half_width, half_width)`.
    pub fn randomize_parameters<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        half_width: f64,
    ) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if !(half_width.is_finite() && half_width > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "half_width must be finite and > 0 (got {half_width})"
            )));
        }
        for p in &mut self.params {
            *p = rng.gen_range(-half_width..half_width);
        }
        Ok(())
    }

    /// Insert a hidden layer of `nunits` units right below the output layer.
    ///
    /// On a connected network the realized function is unchanged: the first `yndim` new units
    /// take over the old output feeders with identity activation, and each output unit
    /// forwards its counterpart with weight 1. Remaining new parameters are zero.
    pub fn push_hidden_layer(&mut self, nunits: usize) -> Result<()> {
        if nunits == 0 {
            return Err(Error::InvalidConfig("layer size must be > 0".to_owned()));
        }
        let yndim = self.yndim();
        if self.connected && nunits < yndim {
            return Err(Error::InvalidConfig(format!(
                "a pushed hidden layer needs at least yndim = {yndim} units (got {nunits})"
            )));
        }

        let out = self.layers.len() - 1;
        let mut hidden = Layer::new(nunits, Activation::Logistic);

        if self.connected {
            let out_start = self.param_start_of(out);
            let old_out = self.params.split_off(out_start);
            let upstream = self.layers[out - 1].size();

            for o in 0..yndim {
                hidden.set_unit_activation(o, Activation::Identity);
            }
            self.params.extend_from_slice(&old_out);
            self.params
                .resize(out_start + hidden.nparams_fed_by(upstream), 0.0);

            // Output unit o: bias 0, weight 1 on new unit o.
            let block = nunits + 1;
            let new_out_start = self.params.len();
            self.params.resize(new_out_start + yndim * block, 0.0);
            for o in 0..yndim {
                self.params[new_out_start + o * block + 1 + o] = 1.0;
            }
        }

        self.layers.insert(out, hidden);
        self.rewire();
        self.reallocate();
        debug!(nunits, nlayers = self.layers.len(), "hidden layer pushed");
        Ok(())
    }

    /// Remove the hidden layer right below the output layer.
    ///
    /// Inverse of [`Network::push_hidden_layer`]: on a connected network the removed layer's
    /// first `yndim` feeders become the output feeders.
    pub fn pop_hidden_layer(&mut self) -> Result<()> {
        if self.layers.len() <= 3 {
            return Err(Error::InvalidConfig(
                "cannot remove the only hidden layer".to_owned(),
            ));
        }
        let out = self.layers.len() - 1;
        let hid = out - 1;
        let yndim = self.yndim();

        if self.connected {
            if self.layers[hid].size() < yndim {
                return Err(Error::InvalidConfig(format!(
                    "the last hidden layer has {} units, fewer than yndim = {yndim}",
                    self.layers[hid].size()
                )));
            }
            let hid_start = self.param_start_of(hid);
            let block = self.layers[hid - 1].size() + 1;
            self.params.truncate(hid_start + yndim * block);
        }

        self.layers.remove(hid);
        self.rewire();
        self.reallocate();
        debug!(nlayers = self.layers.len(), "hidden layer popped");
        Ok(())
    }

    /// Change the number of units of a layer. Only allowed while disconnected.
    pub fn set_layer_size(&mut self, l: usize, nunits: usize) -> Result<()> {
        if self.connected {
            return Err(Error::InvalidConfig(
                "layers can only be resized while disconnected".to_owned(),
            ));
        }
        self.check_layer(l)?;
        if nunits == 0 {
            return Err(Error::InvalidConfig("layer size must be > 0".to_owned()));
        }
        let activation = if l == 0 {
            Activation::Identity
        } else {
            Activation::Logistic
        };
        self.layers[l].resize(nunits, activation);
        self.reallocate();
        Ok(())
    }

    pub fn set_layer_activation(&mut self, l: usize, activation: Activation) -> Result<()> {
        self.check_layer(l)?;
        self.layers[l].set_activation(activation);
        Ok(())
    }

    pub fn set_unit_activation(&mut self, l: usize, u: usize, activation: Activation) -> Result<()> {
        self.check_layer(l)?;
        if u >= self.layers[l].size() {
            return Err(Error::InvalidConfig(format!(
                "unit index {u} out of range for layer {l} of size {}",
                self.layers[l].size()
            )));
        }
        self.layers[l].set_unit_activation(u, activation);
        Ok(())
    }

    /// Set the activation of every hidden and output unit.
    pub fn set_global_activation(&mut self, activation: Activation) {
        for layer in &mut self.layers[1..] {
            layer.set_activation(activation);
        }
    }

    fn check_layer(&self, l: usize) -> Result<()> {
        if l < self.layers.len() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(format!(
                "layer index {l} out of range (nlayers = {})",
                self.layers.len()
            )))
        }
    }
}
