//! Network builder.
//!
//! `NetworkBuilder` is the recommended way to define a connected network in code.
//!
//! It makes the structure explicit (layer sizes + activations), connects the feeders and
//! allocates the requested derivative substrates in one go. Use
//! [`Network::from_description`] instead when the topology comes from a list of
//! activation codes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::deriv::{DerivFlags, ParamTracking};
use crate::layer::Layer;
use crate::{Activation, Error, Network, Result};

#[derive(Debug, Clone, Copy)]
struct LayerSpec {
    size: usize,
    activation: Activation,
}

#[derive(Debug, Clone)]
/// Builder for a connected [`Network`].
///
/// Example:
///
/// ```rust
/// use ffnn_fit::{Activation, DerivFlags, NetworkBuilder};
///
/// # fn main() -> ffnn_fit::Result<()> {
/// let net = NetworkBuilder::new(2)?
///     .add_layer(4, Activation::Tanh)?
///     .add_layer(1, Activation::Identity)?
///     .with_substrates(DerivFlags::D1 | DerivFlags::VD1)
///     .build_with_seed(0)?;
/// assert_eq!(net.nparams(), 3 * 4 + 5);
/// # Ok(())
/// # }
/// ```
pub struct NetworkBuilder {
    input_dim: usize,
    layers: Vec<LayerSpec>,
    substrates: DerivFlags,
    tracking: ParamTracking,
    init_half_width: f64,
}

impl NetworkBuilder {
    /// Start building a network with `input_dim` inputs (identity input units).
    pub fn new(input_dim: usize) -> Result<Self> {
        if input_dim == 0 {
            return Err(Error::InvalidConfig("input_dim must be > 0".to_owned()));
        }
        Ok(Self {
            input_dim,
            layers: Vec::new(),
            substrates: DerivFlags::NONE,
            tracking: ParamTracking::All,
            init_half_width: 3.0,
        })
    }

    /// Convenience constructor from a sizes list + activations.
    ///
    /// `sizes` includes the input and output dimensions; `activations` has one entry per
    /// non-input layer.
    pub fn from_sizes(sizes: &[usize], activations: &[Activation]) -> Result<Self> {
        if sizes.len() < 3 {
            return Err(Error::InvalidConfig(
                "sizes must include input, at least one hidden and output dims".to_owned(),
            ));
        }
        if activations.len() != sizes.len() - 1 {
            return Err(Error::InvalidConfig(format!(
                "activations length {} does not match sizes.len() - 1 ({})",
                activations.len(),
                sizes.len() - 1
            )));
        }

        let mut b = Self::new(sizes[0])?;
        for (&size, &act) in sizes[1..].iter().zip(activations) {
            b = b.add_layer(size, act)?;
        }
        Ok(b)
    }

    /// Add a layer of `size` units (bias unit excluded).
    pub fn add_layer(mut self, size: usize, activation: Activation) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("layer size must be > 0".to_owned()));
        }
        self.layers.push(LayerSpec { size, activation });
        Ok(self)
    }

    /// Derivative substrates to allocate on the built network.
    pub fn with_substrates(mut self, flags: DerivFlags) -> Self {
        self.substrates = self.substrates | flags;
        self
    }

    /// Parameter subset tracked by the variational substrate.
    pub fn with_tracking(mut self, tracking: ParamTracking) -> Self {
        self.tracking = tracking;
        self
    }

    /// Half-width of the uniform range used by the seeded builds (default `3.0`).
    pub fn with_init_half_width(mut self, half_width: f64) -> Self {
        self.init_half_width = half_width;
        self
    }

    /// Build with all parameters zero.
    pub fn build(self) -> Result<Network> {
        if self.layers.len() < 2 {
            return Err(Error::InvalidConfig(
                "a network needs at least one hidden and one output layer".to_owned(),
            ));
        }

        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        layers.push(Layer::new(self.input_dim, Activation::Identity));
        layers.extend(self.layers.iter().map(|s| Layer::new(s.size, s.activation)));

        let mut net = Network::from_layers(layers);
        net.connect()?;
        if self.substrates.closure().contains(DerivFlags::VD1) {
            net.add_variational_substrate(self.tracking);
        }
        net.add_substrates(self.substrates);
        Ok(net)
    }

    /// Build and draw parameters from a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Network> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build and draw parameters from the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Network> {
        let half_width = self.init_half_width;
        let mut net = self.build()?;
        net.randomize_parameters(rng, half_width)?;
        Ok(net)
    }
}
