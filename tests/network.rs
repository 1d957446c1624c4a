//! End-to-end checks: analytic gradients against finite differences,
//! training convergence, and serialization round trips.

use gradix::{CostKind, GraphBuilder, Mode, Network, Op, Optimizer, Sgd, layers};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn rng() -> StdRng {
    StdRng::seed_from_u64(17)
}

/// Compares every variable gradient against a central finite difference
/// of the cost. `forward` must be deterministic for this to be valid,
/// so graphs under test avoid dropout.
fn assert_gradients_match(net: &mut Network, tol: f32) {
    net.forward(Mode::Train);
    net.backward();
    let analytic = net.variable_gradients().to_vec();
    let eps = 1e-3_f32;
    for i in 0..analytic.len() {
        let orig = net.variables()[i];
        net.parameters_mut().0[i] = orig + eps;
        net.forward(Mode::Train);
        let above = net.cost();
        net.parameters_mut().0[i] = orig - eps;
        net.forward(Mode::Train);
        let below = net.cost();
        net.parameters_mut().0[i] = orig;
        let numeric = (above - below) / (2.0 * eps);
        let scale = analytic[i].abs().max(numeric.abs()).max(1.0);
        assert!(
            (analytic[i] - numeric).abs() / scale < tol,
            "gradient {} mismatch: analytic {} vs numeric {}",
            i,
            analytic[i],
            numeric
        );
    }
}

#[test]
fn dense_sigmoid_gradients_match_finite_differences() {
    let mut g = GraphBuilder::new();
    let x = layers::input(&mut g, 3, 4).unwrap();
    let h = layers::dense(&mut g, x, 2, &mut rng()).unwrap();
    let s = g.apply(Op::Sigmoid, &[h]).unwrap();
    let loss = layers::cost(&mut g, s, CostKind::L2).unwrap();
    let mut net = Network::new(g, loss).unwrap();
    net.feed_input(&[0.3, -0.7, 1.2, 0.1, 0.9, 0.4, -1.1, 0.6, -0.2, 0.8, 0.5, -0.4])
        .unwrap();
    net.feed_truth(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
    assert_gradients_match(&mut net, 1e-2);
}

#[test]
fn cmatmul_gradients_match_finite_differences() {
    let mut g = GraphBuilder::new();
    let x = g.input(vec![2, 3]).unwrap();
    let w = g
        .variable(vec![4, 3], vec![
            0.2, -0.5, 0.7, 0.1, 0.9, -0.3, -0.8, 0.4, 0.6, -0.2, 0.3, -0.1,
        ])
        .unwrap();
    let h = g.apply(Op::CMatMul, &[x, w]).unwrap();
    let loss = layers::cost(&mut g, h, CostKind::L2).unwrap();
    let mut net = Network::new(g, loss).unwrap();
    net.feed_input(&[0.3, -0.7, 1.2, 0.1, 0.9, 0.4]).unwrap();
    net.feed_truth(&[1.0, 0.0, 0.5, -0.5, 0.0, 1.0, -1.0, 0.5])
        .unwrap();
    assert_gradients_match(&mut net, 1e-2);
}

#[test]
fn reduce_and_slice_gradients_match_finite_differences() {
    let mut g = GraphBuilder::new();
    let x = g.input(vec![2, 4]).unwrap();
    let w = g
        .variable(vec![2, 4], vec![0.4, -0.3, 0.8, 0.2, -0.6, 0.1, 0.5, -0.9])
        .unwrap();
    let prod = g.apply(Op::Mul, &[x, w]).unwrap();
    let window = g
        .apply(
            Op::Slice {
                axis: 1,
                start: 1,
                size: 2,
            },
            &[prod],
        )
        .unwrap();
    let pooled = g.apply(Op::ReduceMean { axis: 1 }, &[window]).unwrap();
    let truth = g.ground_truth(vec![2]).unwrap();
    let loss = g.apply(Op::Mse, &[pooled, truth]).unwrap();
    let mut net = Network::new(g, loss).unwrap();
    net.feed_input(&[1.0, 2.0, -1.0, 0.5, 0.25, -2.0, 1.5, 3.0])
        .unwrap();
    net.feed_truth(&[0.5, -0.5]).unwrap();
    assert_gradients_match(&mut net, 1e-2);
}

#[test]
fn fan_out_gradients_accumulate_across_consumers() {
    // w feeds three consumers; d(sum)/dw_i = 2*w_i + c_i + 1
    let mut g = GraphBuilder::new();
    let w = g.variable(vec![3], vec![0.5, -1.0, 2.0]).unwrap();
    let c = g.constant(vec![3], vec![3.0, 4.0, 5.0]).unwrap();
    let squared = g.apply(Op::Square, &[w]).unwrap();
    let scaled = g.apply(Op::Mul, &[w, c]).unwrap();
    let partial = g.apply(Op::Add, &[squared, scaled]).unwrap();
    let total = g.apply(Op::Add, &[partial, w]).unwrap();
    let loss = g.apply(Op::ReduceSum { axis: 0 }, &[total]).unwrap();
    let mut net = Network::new(g, loss).unwrap();
    net.forward(Mode::Train);
    net.backward();
    assert_eq!(net.variable_gradients(), &[5.0, 3.0, 10.0]);
}

#[test]
fn non_scalar_cost_is_rejected() {
    let mut g = GraphBuilder::new();
    let a = g.variable(vec![2], vec![1.0, 2.0]).unwrap();
    let doubled = g.apply(Op::Square, &[a]).unwrap();
    assert!(matches!(
        Network::new(g, doubled),
        Err(gradix::GradixError::NonScalarCost { .. })
    ));
}

#[test]
fn softmax_cross_entropy_gradients_match_finite_differences() {
    let mut g = GraphBuilder::new();
    let x = layers::input(&mut g, 2, 3).unwrap();
    let h = layers::dense(&mut g, x, 3, &mut rng()).unwrap();
    let loss = layers::cost(&mut g, h, CostKind::CrossEntropy).unwrap();
    let mut net = Network::new(g, loss).unwrap();
    net.feed_input(&[0.2, -0.5, 1.0, 0.7, 0.1, -0.3]).unwrap();
    net.feed_truth(&[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
    assert_gradients_match(&mut net, 1e-2);
}

#[test]
fn layer_norm_gradients_match_finite_differences() {
    let mut g = GraphBuilder::new();
    let x = g.input(vec![2, 3]).unwrap();
    let w = g
        .variable(vec![2, 3], vec![1.3, -0.2, 0.7, 0.4, -1.1, 0.9])
        .unwrap();
    let scaled = g.apply(Op::Mul, &[x, w]).unwrap();
    let normed = layers::layer_norm(&mut g, scaled).unwrap();
    let truth = g.ground_truth(vec![2, 3]).unwrap();
    let loss = g.apply(Op::Mse, &[normed, truth]).unwrap();
    let mut net = Network::new(g, loss).unwrap();
    net.feed_input(&[0.5, 1.5, -0.8, 2.0, -0.4, 0.6]).unwrap();
    net.feed_truth(&[0.0, 1.0, -1.0, 1.0, 0.0, 0.5]).unwrap();
    assert_gradients_match(&mut net, 2e-2);
}

#[test]
fn sgd_drives_the_loss_down() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut g = GraphBuilder::new();
    let x = layers::input(&mut g, 4, 2).unwrap();
    let h = layers::dense(&mut g, x, 4, &mut rng()).unwrap();
    let a = g.apply(Op::Tanh, &[h]).unwrap();
    let out = layers::dense(&mut g, a, 1, &mut rng()).unwrap();
    let loss = layers::cost(&mut g, out, CostKind::BinaryCrossEntropy).unwrap();
    let mut net = Network::new(g, loss).unwrap();
    // XOR
    net.feed_input(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0])
        .unwrap();
    net.feed_truth(&[0.0, 1.0, 1.0, 0.0]).unwrap();

    net.forward(Mode::Train);
    let initial = net.cost();

    let mut opt = Optimizer::Sgd(Sgd::with_momentum(0.5, 0.9));
    for _ in 0..200 {
        net.forward(Mode::Train);
        net.backward();
        opt.step_network(&mut net);
    }
    net.forward(Mode::Train);
    let trained = net.cost();
    assert!(
        trained < initial * 0.5,
        "loss did not drop: {} -> {}",
        initial,
        trained
    );
}

#[test]
fn forward_is_idempotent_in_eval_mode() {
    let mut g = GraphBuilder::new();
    let x = layers::input(&mut g, 2, 3).unwrap();
    let h = layers::dense(&mut g, x, 2, &mut rng()).unwrap();
    let d = layers::dropout(&mut g, h, 0.5).unwrap();
    let loss = layers::cost(&mut g, d, CostKind::L2).unwrap();
    let mut net = Network::new(g, loss).unwrap();
    net.feed_input(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap();
    net.feed_truth(&[0.0; 4]).unwrap();
    net.forward(Mode::Eval);
    let first = net.cost();
    net.forward(Mode::Eval);
    assert_eq!(net.cost(), first);
}

#[test]
fn save_load_round_trip_is_bit_exact() {
    let mut g = GraphBuilder::new();
    let x = g.input(vec![2, 4]).unwrap();
    let c = g.constant(vec![2, 4], vec![0.5; 8]).unwrap();
    let shifted = g.apply(Op::Add, &[x, c]).unwrap();
    let w = g
        .variable(vec![2, 4], vec![0.9, -0.1, 0.3, 0.7, -0.5, 0.2, 0.8, -0.6])
        .unwrap();
    let prod = g.apply(Op::Mul, &[shifted, w]).unwrap();
    let window = g
        .apply(
            Op::Slice {
                axis: 1,
                start: 0,
                size: 3,
            },
            &[prod],
        )
        .unwrap();
    g.mark_output(window).unwrap();
    let pooled = g.apply(Op::ReduceMean { axis: 1 }, &[window]).unwrap();
    let truth = g.ground_truth(vec![2]).unwrap();
    let loss = g.apply(Op::Mse, &[pooled, truth]).unwrap();
    let mut net = Network::new(g, loss).unwrap();

    let path = std::env::temp_dir().join("gradix_roundtrip_test.bin");
    net.save(&path).unwrap();
    let mut restored = Network::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(restored.num_nodes(), net.num_nodes());
    assert_eq!(restored.variables(), net.variables());
    assert_eq!(restored.constants(), net.constants());

    let data = [1.0, -2.0, 0.5, 3.0, -0.25, 1.5, 2.0, -1.0];
    let expected = net.predict(&data).unwrap().to_vec();
    assert_eq!(restored.predict(&data).unwrap(), expected.as_slice());
}

#[test]
fn adam_trains_a_regression_head() {
    let mut g = GraphBuilder::new();
    let x = layers::input(&mut g, 8, 1).unwrap();
    let out = layers::dense(&mut g, x, 1, &mut rng()).unwrap();
    let loss = layers::cost(&mut g, out, CostKind::L2).unwrap();
    let mut net = Network::new(g, loss).unwrap();

    // y = 2x + 1
    let xs: Vec<f32> = (0..8).map(|i| i as f32 / 8.0).collect();
    let ys: Vec<f32> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
    net.feed_input(&xs).unwrap();
    net.feed_truth(&ys).unwrap();

    let mut opt = Optimizer::Adam(gradix::Adam::new(0.05));
    for _ in 0..300 {
        net.forward(Mode::Train);
        net.backward();
        opt.step_network(&mut net);
    }
    net.forward(Mode::Train);
    assert!(net.cost() < 1e-2, "final loss {}", net.cost());
}
