//! Feed-forward function approximators with exact forward-mode derivatives.
//!
//! `ffnn-fit` builds a layered network of units, propagates an input through it and, in the
//! same sweep, computes exact derivatives of every output with respect to the inputs (first and
//! second, diagonal only) and with respect to the parameters. Those parameter derivatives feed a
//! Levenberg-Marquardt solver, which fits the network to function values and, optionally, to
//! first and second derivative targets.
//!
//! # Design goals
//!
//! - Allocate once: derivative substrates are sized when requested, propagation reuses them.
//! - Clear contracts: shapes, indices and substrate requests are validated at the API boundary.
//! - Reproducible fits: every random draw comes from an explicit seed.
//!
//! # Panics vs `Result`
//!
//! - Low-level accessors ([`Unit`], [`Layer`], [`TrainingData::input`]) index slices directly
//!   and panic on out-of-range indices.
//! - [`Network`] and [`Trainer`] validate their inputs and return [`Result`].
//!
//! # Derivative substrates
//!
//! A substrate is the storage for one class of derivative, selected by [`DerivFlags`]:
//!
//! - `D1`, `D2`: `d y / d x_k` and `d^2 y / d x_k^2`
//! - `VD1`: `d y / d beta_p` for the tracked parameters ([`ParamTracking`])
//! - `CROSS1`, `CROSS2`: `d^2 y / d x_k d beta_p` and `d^3 y / d x_k^2 d beta_p`
//!
//! Requests are closed under their dependencies (`CROSS2` pulls in everything else).
//!
//! # Parameter ordering
//!
//! Parameters are laid out layer by layer, unit by unit; each fed unit owns a contiguous block
//! of `1 + n_upstream` values: the bias weight first, then one weight per upstream non-bias
//! unit.
//!
//! # Quick start
//!
//! ```rust
//! use ffnn_fit::{Activation, DerivFlags, NetworkBuilder, Trainer, TrainingConfig, TrainingData};
//!
//! # fn main() -> ffnn_fit::Result<()> {
//! let xs: Vec<f64> = (0..40).map(|i| -2.0 + 0.1 * i as f64).collect();
//! let ys: Vec<f64> = xs.iter().map(|x| (-x * x).exp()).collect();
//! let data = TrainingData::from_flat(xs, ys, 1, 1, 20, 10)?;
//!
//! let mut net = NetworkBuilder::new(1)?
//!     .add_layer(3, Activation::Gaussian)?
//!     .add_layer(1, Activation::Identity)?
//!     .with_substrates(DerivFlags::VD1)
//!     .build_with_seed(0)?;
//!
//! let config = TrainingConfig {
//!     max_steps: 50,
//!     max_restarts: 3,
//!     ..TrainingConfig::default()
//! };
//! let report = Trainer::new(&data, config)?.train(&mut net, 7)?;
//! assert!(report.cost.pure.is_finite());
//!
//! net.set_input(&[0.5])?;
//! net.propagate()?;
//! let _y = net.output(0)?;
//! # Ok(())
//! # }
//! ```
//!
//! # MSRV
//!
//! This crate's minimum supported Rust version (MSRV) is specified in `Cargo.toml`.

pub mod activation;
pub mod builder;
pub mod data;
pub mod deriv;
pub mod error;
pub mod feeder;
pub mod layer;
pub mod network;
pub mod persist;
pub mod residual;
pub mod solver;
pub mod train;
pub mod unit;

pub use activation::{Activation, ActivationDerivs};
pub use builder::NetworkBuilder;
pub use data::TrainingData;
pub use deriv::{DerivFlags, ParamTracking};
pub use error::{Error, Result};
pub use feeder::Feeder;
pub use layer::Layer;
pub use network::Network;
pub use persist::{
    NETWORK_FORMAT_VERSION, SerializedLayer, SerializedNetwork, SerializedSubstrates,
};
pub use residual::{ResidualKind, ResidualLayout, ResidualProblem, ResidualTerms};
pub use solver::{
    LeastSquaresProblem, LeastSquaresSolver, LevenbergMarquardt, SolverOutcome, StopReason,
};
pub use train::{BestFitReport, FitReport, ResidualNorms, Trainer, TrainingConfig};
pub use unit::Unit;
