//! Fit `y = exp(-x^2)` together with its first derivative.
//!
//! Run with `RUST_LOG=ffnn_fit=info cargo run --example fit_gaussian` to see each restart.

use ffnn_fit::{Activation, DerivFlags, NetworkBuilder, Trainer, TrainingConfig, TrainingData};
use tracing_subscriber::EnvFilter;

fn main() -> ffnn_fit::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let n = 90;
    let xs: Vec<f64> = (0..n).map(|i| -3.0 + 6.0 * i as f64 / (n - 1) as f64).collect();
    // Interleave the samples so each block covers the whole interval.
    let order: Vec<usize> = (0..3).flat_map(|r| (r..n).step_by(3)).collect();
    let inputs: Vec<f64> = order.iter().map(|&i| xs[i]).collect();
    let targets: Vec<f64> = inputs.iter().map(|x| (-x * x).exp()).collect();
    let d1: Vec<f64> = inputs.iter().map(|x| -2.0 * x * (-x * x).exp()).collect();
    let data = TrainingData::from_flat(inputs, targets, 1, 1, 30, 30)?.with_first_derivatives(d1)?;

    let mut net = NetworkBuilder::new(1)?
        .add_layer(4, Activation::Tanh)?
        .add_layer(1, Activation::Identity)?
        .with_substrates(DerivFlags::CROSS1)
        .build_with_seed(0)?;

    let config = TrainingConfig {
        first_derivative: true,
        lambda_d1: 0.1,
        max_steps: 200,
        max_restarts: 10,
        target_residual: 1e-3,
        ..TrainingConfig::default()
    };
    let report = Trainer::new(&data, config)?.train(&mut net, 42)?;

    println!(
        "best restart {} of {}: cost full={:.3e} no_reg={:.3e} pure={:.3e}",
        report.best_restart,
        report.restarts,
        report.cost.full,
        report.cost.no_reg,
        report.cost.pure
    );
    if let Some(errors) = &report.best.errors {
        for (p, (b, e)) in report.best.params.iter().zip(errors).enumerate() {
            println!("beta[{p:2}] = {b:+.6} +/- {e:.2e}");
        }
    }

    for x in [-1.0, 0.0, 0.5] {
        net.set_input(&[x])?;
        net.propagate()?;
        println!(
            "x={x:+.2} y={:+.5} (exact {:+.5}) dy/dx={:+.5} (exact {:+.5})",
            net.output(0)?,
            (-x * x).exp(),
            net.first_derivative(0, 0)?,
            -2.0 * x * (-x * x).exp()
        );
    }
    Ok(())
}
