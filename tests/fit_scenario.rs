//! Recover a known 2-1-2 Gaussian network from its own outputs and derivatives.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ffnn_fit::{DerivFlags, Network, Trainer, TrainingConfig, TrainingData};

const BETA: [f64; 7] = [0.2, -1.1, 0.9, 1.0, -1.0, 0.0, 0.5];
const TINY: f64 = 1e-6;
const NRESTARTS: usize = 50;
const NSTEPS: usize = 200;

fn description() -> Vec<Vec<&'static str>> {
    vec![
        vec!["ID", "ID", "ID"],
        vec!["ID", "GSS"],
        vec!["ID", "ID", "ID"],
    ]
}

fn fresh_network(substrates: DerivFlags) -> Network {
    let mut net = Network::from_description(&description()).unwrap();
    net.connect().unwrap();
    net.add_substrates(substrates);
    net
}

/// 60 samples split 20 / 20 / 20 with exact value and derivative targets.
fn reference_data() -> TrainingData {
    let mut reference = fresh_network(DerivFlags::D1 | DerivFlags::D2);
    reference.set_parameters(&BETA).unwrap();

    let mut rng = StdRng::seed_from_u64(1337);
    let (ndata, xndim, yndim) = (60, 2, 2);
    let mut inputs = Vec::with_capacity(ndata * xndim);
    let mut targets = Vec::with_capacity(ndata * yndim);
    let mut d1 = Vec::with_capacity(ndata * yndim * xndim);
    let mut d2 = Vec::with_capacity(ndata * yndim * xndim);
    for _ in 0..ndata {
        let x = [rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0)];
        reference.set_input(&x).unwrap();
        reference.propagate().unwrap();
        inputs.extend_from_slice(&x);
        for j in 0..yndim {
            targets.push(reference.output(j).unwrap());
            for k in 0..xndim {
                d1.push(reference.first_derivative(j, k).unwrap());
                d2.push(reference.second_derivative(j, k).unwrap());
            }
        }
    }
    TrainingData::from_flat(inputs, targets, xndim, yndim, 20, 20)
        .unwrap()
        .with_first_derivatives(d1)
        .unwrap()
        .with_second_derivatives(d2)
        .unwrap()
}

/// The Gaussian is even, so the hidden feeder is only determined up to sign.
fn assert_recovers_reference(params: &[f64], tol: f64) {
    assert_eq!(params.len(), BETA.len());
    let sign = (params[1] / BETA[1]).signum();
    for (i, (&fit, &truth)) in params.iter().zip(&BETA).enumerate() {
        let expected = if i < 3 { sign * truth } else { truth };
        assert!(
            (fit - expected).abs() < tol,
            "parameter {i}: fitted {fit}, expected {expected} (all: {params:?})"
        );
    }
}

fn run(config: TrainingConfig, substrates: DerivFlags) -> Vec<f64> {
    let data = reference_data();
    let trainer = Trainer::new(&data, config).unwrap();
    let mut net = fresh_network(substrates);

    let report = trainer
        .best_fit(&mut net, NSTEPS, NRESTARTS, TINY, 2024)
        .unwrap();
    assert!(report.target_met, "{report:?}");
    assert!(report.cost.no_reg <= TINY);
    assert!(report.cost.pure <= report.cost.no_reg + 1e-15);
    assert!(report.cost.no_reg <= report.cost.full + 1e-15);
    assert_eq!(net.parameters().unwrap(), report.best.params.as_slice());
    report.best.params
}

#[test]
fn plain_fit_recovers_reference_network() {
    let params = run(TrainingConfig::default(), DerivFlags::VD1);
    assert_recovers_reference(&params, TINY);
}

#[test]
fn regularized_fit_recovers_reference_network() {
    let config = TrainingConfig {
        regularization: true,
        lambda_r: 1e-9,
        ..TrainingConfig::default()
    };
    let params = run(config, DerivFlags::VD1);
    assert_recovers_reference(&params, TINY);
}

#[test]
fn derivative_fit_recovers_reference_network() {
    let config = TrainingConfig {
        first_derivative: true,
        lambda_d1: 0.01,
        second_derivative: true,
        lambda_d2: 0.01,
        ..TrainingConfig::default()
    };
    let params = run(config, DerivFlags::CROSS2);
    assert_recovers_reference(&params, TINY);
}

#[test]
fn regularized_derivative_fit_recovers_reference_network() {
    let config = TrainingConfig {
        regularization: true,
        lambda_r: 1e-9,
        first_derivative: true,
        lambda_d1: 0.01,
        second_derivative: true,
        lambda_d2: 0.01,
        ..TrainingConfig::default()
    };
    let params = run(config, DerivFlags::CROSS2);
    assert_recovers_reference(&params, TINY);
}

#[test]
fn derivative_fit_needs_cross_substrates() {
    let data = reference_data();
    let config = TrainingConfig {
        second_derivative: true,
        lambda_d2: 0.01,
        ..TrainingConfig::default()
    };
    let trainer = Trainer::new(&data, config).unwrap();
    let mut net = fresh_network(DerivFlags::VD1);
    assert!(trainer.best_fit(&mut net, NSTEPS, 2, TINY, 0).is_err());
}
