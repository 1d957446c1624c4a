//! Layer constructors: convenience functions that assemble common
//! subgraphs (dense, dropout, layer norm, cost heads) on top of the
//! raw builder API.

use rand::rngs::StdRng;

use crate::error::{GradixError, Result};
use crate::graph::{GraphBuilder, NodeId};
use crate::initializers;
use crate::ops::Op;

/// Cost heads selectable when closing a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostKind {
    /// Mean absolute deviation over the prediction.
    L1,
    /// Mean squared error.
    L2,
    /// Sigmoid output with binary cross-entropy, fused on raw logits.
    BinaryCrossEntropy,
    /// Softmax output with categorical cross-entropy, fused on raw logits.
    CrossEntropy,
}

/// Batch input placeholder of shape `[batch, features]`.
pub fn input(g: &mut GraphBuilder, batch: usize, features: usize) -> Result<NodeId> {
    let id = g.input(vec![batch, features])?;
    log::debug!("input layer: {} x {}", batch, features);
    Ok(id)
}

/// Fully connected layer: `x * W + b` with Xavier-uniform weights and
/// zero bias. Expects `x` of shape `[batch, in_features]`.
pub fn dense(g: &mut GraphBuilder, x: NodeId, units: usize, rng: &mut StdRng) -> Result<NodeId> {
    let in_shape = g.shape_of(x);
    if in_shape.len() != 2 {
        return Err(GradixError::InvalidOperand {
            op: "dense",
            message: format!("expected a (batch, features) input, got shape {:?}", in_shape),
        });
    }
    let in_features = in_shape[1];
    let weights = initializers::xavier_uniform(in_features, units, in_features * units, rng);
    let w = g.variable(vec![in_features, units], weights)?;
    let b = g.variable(vec![units], vec![0.0; units])?;
    let prod = g.apply(Op::MatMul, &[x, w])?;
    let out = g.apply(Op::Add, &[prod, b])?;
    log::debug!("dense layer: {} -> {}", in_features, units);
    Ok(out)
}

/// Inverted dropout, active only in training mode. Evaluation passes
/// the input through untouched.
pub fn dropout(g: &mut GraphBuilder, x: NodeId, rate: f32) -> Result<NodeId> {
    let dropped = g.apply(Op::Dropout { rate }, &[x])?;
    let out = g.apply(Op::Select, &[dropped, x])?;
    log::debug!("dropout layer: rate {}", rate);
    Ok(out)
}

/// Layer normalization with learned gain and bias over the last axis.
pub fn layer_norm(g: &mut GraphBuilder, x: NodeId) -> Result<NodeId> {
    let normed = g.apply(Op::Normalize, &[x])?;
    // Normalize requires rank >= 1, so the last dim exists here
    let features = *g.shape_of(normed).last().unwrap();
    let gain = g.variable(vec![features], vec![1.0; features])?;
    let bias = g.variable(vec![features], vec![0.0; features])?;
    let scaled = g.apply(Op::Mul, &[normed, gain])?;
    let out = g.apply(Op::Add, &[scaled, bias])?;
    log::debug!("layer norm: {} features", features);
    Ok(out)
}

/// Closes the network with a ground-truth placeholder, an output head
/// and a scalar cost node. Returns the cost node; the head is marked
/// as the network output for `predict`.
pub fn cost(g: &mut GraphBuilder, pred: NodeId, kind: CostKind) -> Result<NodeId> {
    let truth = g.ground_truth(g.shape_of(pred).to_vec())?;
    let (head, loss) = match kind {
        CostKind::L1 => {
            let diff = g.apply(Op::Sub, &[pred, truth])?;
            let norm = g.apply(Op::L1Norm, &[diff])?;
            let n = crate::shape::num_elements(g.shape_of(pred)) as f32;
            let scale = g.constant(vec![], vec![1.0 / n])?;
            (pred, g.apply(Op::Mul, &[norm, scale])?)
        }
        CostKind::L2 => (pred, g.apply(Op::Mse, &[pred, truth])?),
        CostKind::BinaryCrossEntropy => {
            let head = g.apply(Op::Sigmoid, &[pred])?;
            (head, g.apply(Op::LogisticXent, &[pred, truth])?)
        }
        CostKind::CrossEntropy => {
            let head = g.apply(Op::Softmax, &[pred])?;
            (head, g.apply(Op::CategoricalXent, &[pred, truth])?)
        }
    };
    g.mark_output(head)?;
    log::debug!("cost layer: {:?}", kind);
    Ok(loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0)
    }

    #[test]
    fn dense_rejects_non_matrix_input() {
        let mut g = GraphBuilder::new();
        let x = g.input(vec![4]).unwrap();
        assert!(matches!(
            dense(&mut g, x, 2, &mut rng()),
            Err(GradixError::InvalidOperand { op: "dense", .. })
        ));
    }

    #[test]
    fn dense_produces_batch_by_units() {
        let mut g = GraphBuilder::new();
        let x = input(&mut g, 4, 3).unwrap();
        let h = dense(&mut g, x, 5, &mut rng()).unwrap();
        assert_eq!(g.shape_of(h), &[4, 5]);
    }

    #[test]
    fn l2_cost_is_scalar_and_marks_output() {
        let mut g = GraphBuilder::new();
        let x = input(&mut g, 2, 3).unwrap();
        let h = dense(&mut g, x, 1, &mut rng()).unwrap();
        let loss = cost(&mut g, h, CostKind::L2).unwrap();
        assert!(g.shape_of(loss).is_empty());
        let mut net = Network::new(g, loss).unwrap();
        net.feed_input(&[0.0; 6]).unwrap();
        net.feed_truth(&[0.0; 2]).unwrap();
        let out = net.predict(&[0.0; 6]).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn dropout_is_identity_in_eval_mode() {
        let mut g = GraphBuilder::new();
        let x = input(&mut g, 1, 8).unwrap();
        let d = dropout(&mut g, x, 0.5).unwrap();
        let truth = g.ground_truth(vec![1, 8]).unwrap();
        let loss = g.apply(Op::Mse, &[d, truth]).unwrap();
        g.mark_output(d).unwrap();
        let mut net = Network::new(g, loss).unwrap();
        let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
        net.feed_truth(&[0.0; 8]).unwrap();
        let out = net.predict(&data).unwrap();
        assert_eq!(out, data.as_slice());
    }

    #[test]
    fn sigmoid_head_survives_to_predict() {
        // the head is not an ancestor of the logits loss; it must still be
        // reachable after compaction
        let mut g = GraphBuilder::new();
        let x = input(&mut g, 3, 2).unwrap();
        let h = dense(&mut g, x, 1, &mut rng()).unwrap();
        let loss = cost(&mut g, h, CostKind::BinaryCrossEntropy).unwrap();
        let mut net = Network::new(g, loss).unwrap();
        net.feed_truth(&[0.0; 3]).unwrap();
        let out = net.predict(&[0.5; 6]).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn cross_entropy_head_sums_to_one_per_row() {
        let mut g = GraphBuilder::new();
        let x = input(&mut g, 2, 4).unwrap();
        let h = dense(&mut g, x, 4, &mut rng()).unwrap();
        let loss = cost(&mut g, h, CostKind::CrossEntropy).unwrap();
        let mut net = Network::new(g, loss).unwrap();
        net.feed_truth(&[0.25; 8]).unwrap();
        let out = net.predict(&[0.5; 8]).unwrap();
        let row: f32 = out[..4].iter().sum();
        assert!((row - 1.0).abs() < 1e-5);
    }
}
