use criterion::{Criterion, black_box, criterion_group, criterion_main};

use ffnn_fit::{Activation, DerivFlags, Network, NetworkBuilder, Trainer, TrainingConfig, TrainingData};

fn network(substrates: DerivFlags) -> Network {
    NetworkBuilder::new(4)
        .unwrap()
        .add_layer(16, Activation::Tanh)
        .unwrap()
        .add_layer(16, Activation::Gaussian)
        .unwrap()
        .add_layer(2, Activation::Identity)
        .unwrap()
        .with_substrates(substrates)
        .build_with_seed(0)
        .unwrap()
}

fn propagate_bench(c: &mut Criterion) {
    let input = [0.1, -0.2, 0.3, 0.4];
    for (name, flags) in [
        ("propagate_values_4_16_16_2", DerivFlags::NONE),
        ("propagate_d2_4_16_16_2", DerivFlags::D2),
        ("propagate_vd1_4_16_16_2", DerivFlags::VD1),
        ("propagate_cross2_4_16_16_2", DerivFlags::CROSS2),
    ] {
        let mut net = network(flags);
        net.set_input(&input).unwrap();
        c.bench_function(name, |b| {
            b.iter(|| {
                net.propagate().unwrap();
                black_box(net.output(0).unwrap());
            })
        });
    }
}

fn fit_bench(c: &mut Criterion) {
    let xs: Vec<f64> = (0..200).map(|i| -2.0 + 0.005 * i as f64).collect();
    let mut inputs = Vec::with_capacity(xs.len() * 4);
    let mut targets = Vec::with_capacity(xs.len() * 2);
    for &x in &xs {
        inputs.extend_from_slice(&[x, 0.5 * x, -x, x * x]);
        targets.extend_from_slice(&[(-x * x).exp(), x.sin()]);
    }
    let data = TrainingData::from_flat(inputs, targets, 4, 2, 100, 50).unwrap();
    let trainer = Trainer::new(&data, TrainingConfig::default()).unwrap();
    let base = network(DerivFlags::VD1);

    c.bench_function("fit_10_steps_4_16_16_2", |b| {
        b.iter(|| {
            let mut net = base.clone();
            black_box(trainer.fit(&mut net, 10).unwrap());
        })
    });
}

criterion_group!(benches, propagate_bench, fit_bench);
criterion_main!(benches);
