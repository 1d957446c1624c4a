//! Scalar loss kernels: mean squared error and the two cross-entropy
//! variants. All three reduce to a rank-0 output and push `1/n`-scaled
//! gradients back to the prediction child.

use crate::error::{GradixError, Result};
use crate::ops::{OperandRef, unary};
use crate::shape;

pub fn infer_loss(op: &'static str, pred: &[usize], truth: &[usize]) -> Result<Vec<usize>> {
    shape::check_extents(pred)?;
    if pred != truth {
        return Err(GradixError::ShapeMismatch {
            op,
            lhs: pred.to_vec(),
            rhs: truth.to_vec(),
        });
    }
    Ok(vec![])
}

pub fn infer_categorical(pred: &[usize], truth: &[usize]) -> Result<Vec<usize>> {
    if pred.is_empty() {
        return Err(GradixError::InvalidOperand {
            op: "categorical_x_entropy",
            message: "logits must have rank >= 1".to_string(),
        });
    }
    infer_loss("categorical_x_entropy", pred, truth)
}

pub fn mse_forward(inputs: &[OperandRef<'_>], out: &mut [f32]) {
    let (p, t) = (inputs[0].values, inputs[1].values);
    let n = p.len() as f32;
    out[0] = p
        .iter()
        .zip(t)
        .map(|(pi, ti)| (pi - ti) * (pi - ti))
        .sum::<f32>()
        / n;
}

pub fn mse_backward(
    grad: &[f32],
    inputs: &[OperandRef<'_>],
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    let (p, t) = (inputs[0].values, inputs[1].values);
    let s = 2.0 * grad[0] / p.len() as f32;
    let dp = wants[0].then(|| p.iter().zip(t).map(|(pi, ti)| s * (pi - ti)).collect());
    let dt = wants[1].then(|| p.iter().zip(t).map(|(pi, ti)| -s * (pi - ti)).collect());
    vec![dp, dt]
}

/// Numerically stable binary cross-entropy on logits:
/// mean of max(x, 0) - x*t + ln(1 + e^-|x|).
pub fn logistic_xent_forward(inputs: &[OperandRef<'_>], out: &mut [f32]) {
    let (x, t) = (inputs[0].values, inputs[1].values);
    let n = x.len() as f32;
    out[0] = x
        .iter()
        .zip(t)
        .map(|(xi, ti)| xi.max(0.0) - xi * ti + (1.0 + (-xi.abs()).exp()).ln())
        .sum::<f32>()
        / n;
}

pub fn logistic_xent_backward(
    grad: &[f32],
    inputs: &[OperandRef<'_>],
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    let (x, t) = (inputs[0].values, inputs[1].values);
    let s = grad[0] / x.len() as f32;
    let dx = wants[0].then(|| {
        x.iter()
            .zip(t)
            .map(|(xi, ti)| s * (unary::sigmoid(*xi) - ti))
            .collect()
    });
    // the target is normally a non-gradient placeholder; the analytic term
    // is produced anyway when it is trainable
    let dt = wants[1].then(|| x.iter().map(|xi| -s * xi).collect());
    vec![dx, dt]
}

fn rows_and_width(shape_dims: &[usize]) -> (usize, usize) {
    let width = *shape_dims.last().unwrap();
    (shape::num_elements(shape_dims) / width, width)
}

/// Softmax cross-entropy on logits, averaged over rows:
/// -1/rows * sum t * log softmax(x).
pub fn categorical_xent_forward(inputs: &[OperandRef<'_>], out: &mut [f32]) {
    let (x, t) = (inputs[0].values, inputs[1].values);
    let (rows, width) = rows_and_width(inputs[0].shape);
    let mut total = 0.0;
    for (row_x, row_t) in x.chunks_exact(width).zip(t.chunks_exact(width)) {
        let max = row_x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let log_sum = row_x.iter().map(|v| (v - max).exp()).sum::<f32>().ln();
        for (xi, ti) in row_x.iter().zip(row_t) {
            total -= ti * (xi - max - log_sum);
        }
    }
    out[0] = total / rows as f32;
}

pub fn categorical_xent_backward(
    grad: &[f32],
    inputs: &[OperandRef<'_>],
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    let (x, t) = (inputs[0].values, inputs[1].values);
    let (rows, width) = rows_and_width(inputs[0].shape);
    let s = grad[0] / rows as f32;
    let dx = wants[0].then(|| {
        let mut d = vec![0.0; x.len()];
        for ((row_d, row_x), row_t) in d
            .chunks_exact_mut(width)
            .zip(x.chunks_exact(width))
            .zip(t.chunks_exact(width))
        {
            let max = row_x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let sum: f32 = row_x.iter().map(|v| (v - max).exp()).sum();
            for ((di, xi), ti) in row_d.iter_mut().zip(row_x).zip(row_t) {
                let softmax = (xi - max).exp() / sum;
                *di = s * (softmax - ti);
            }
        }
        d
    });
    let dt = wants[1].then(|| {
        let mut d = vec![0.0; t.len()];
        for (row_d, row_x) in d.chunks_exact_mut(width).zip(x.chunks_exact(width)) {
            let max = row_x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let log_sum = row_x.iter().map(|v| (v - max).exp()).sum::<f32>().ln();
            for (di, xi) in row_d.iter_mut().zip(row_x) {
                *di = -s * (xi - max - log_sum);
            }
        }
        d
    });
    vec![dx, dt]
}
