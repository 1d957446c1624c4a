//! Axis reductions, softmax, layer normalization and the L1 penalty.
//!
//! Reductions walk their operand through the row-major (outer, axis, inner)
//! decomposition from [`crate::shape`]. Softmax and normalize treat the last
//! axis as the feature row.

use crate::error::{GradixError, Result};
use crate::ops::OperandRef;
use crate::shape;

const NORM_EPS: f32 = 1e-5;

pub fn infer_reduce(input: &[usize], axis: usize) -> Result<Vec<usize>> {
    shape::check_extents(input)?;
    shape::check_axis(input, axis)?;
    Ok(shape::drop_axis(input, axis))
}

pub fn infer_rowwise(op: &'static str, input: &[usize]) -> Result<Vec<usize>> {
    shape::check_extents(input)?;
    if input.is_empty() {
        return Err(GradixError::InvalidOperand {
            op,
            message: "operand must have rank >= 1".to_string(),
        });
    }
    Ok(input.to_vec())
}

/// out[o, i] = scale * sum_a x[o, a, i]; scale is 1 for sum, 1/axis_extent
/// for mean.
pub fn reduce_forward(input: OperandRef<'_>, axis: usize, scale: f32, out: &mut [f32]) {
    let (outer, extent, inner) = shape::axis_extents(input.shape, axis);
    crate::blas::fill(0.0, out);
    for o in 0..outer {
        let out_base = o * inner;
        for a in 0..extent {
            let in_base = (o * extent + a) * inner;
            for i in 0..inner {
                out[out_base + i] += scale * input.values[in_base + i];
            }
        }
    }
}

/// Broadcasts `scale * grad` back across the reduced axis.
pub fn reduce_backward(
    grad: &[f32],
    input: OperandRef<'_>,
    axis: usize,
    scale: f32,
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    vec![wants[0].then(|| {
        let (outer, extent, inner) = shape::axis_extents(input.shape, axis);
        let mut d = vec![0.0; input.values.len()];
        for o in 0..outer {
            let grad_base = o * inner;
            for a in 0..extent {
                let in_base = (o * extent + a) * inner;
                for i in 0..inner {
                    d[in_base + i] = scale * grad[grad_base + i];
                }
            }
        }
        d
    })]
}

fn last_axis_rows(shape_dims: &[usize]) -> (usize, usize) {
    let width = *shape_dims.last().unwrap();
    (shape::num_elements(shape_dims) / width, width)
}

/// Shifted softmax over the last axis, one row at a time.
pub fn softmax_forward(input: OperandRef<'_>, out: &mut [f32]) {
    let (_, width) = last_axis_rows(input.shape);
    for (row_out, row_x) in out
        .chunks_exact_mut(width)
        .zip(input.values.chunks_exact(width))
    {
        let max = row_x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for (o, x) in row_out.iter_mut().zip(row_x) {
            *o = (x - max).exp();
            sum += *o;
        }
        for o in row_out.iter_mut() {
            *o /= sum;
        }
    }
}

/// dx = y * (g - sum(g * y)) per row.
pub fn softmax_backward(
    grad: &[f32],
    input_shape: &[usize],
    output: &[f32],
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    vec![wants[0].then(|| {
        let (_, width) = last_axis_rows(input_shape);
        let mut d = vec![0.0; grad.len()];
        for ((row_d, row_g), row_y) in d
            .chunks_exact_mut(width)
            .zip(grad.chunks_exact(width))
            .zip(output.chunks_exact(width))
        {
            let dot: f32 = row_g.iter().zip(row_y).map(|(g, y)| g * y).sum();
            for ((di, g), y) in row_d.iter_mut().zip(row_g).zip(row_y) {
                *di = y * (g - dot);
            }
        }
        d
    })]
}

/// Per-row standardization: y = (x - mean) / sqrt(var + eps).
pub fn normalize_forward(input: OperandRef<'_>, out: &mut [f32]) {
    let (_, width) = last_axis_rows(input.shape);
    let n = width as f32;
    for (row_out, row_x) in out
        .chunks_exact_mut(width)
        .zip(input.values.chunks_exact(width))
    {
        let mean: f32 = row_x.iter().sum::<f32>() / n;
        let var: f32 = row_x.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
        let inv_std = 1.0 / (var + NORM_EPS).sqrt();
        for (o, x) in row_out.iter_mut().zip(row_x) {
            *o = (x - mean) * inv_std;
        }
    }
}

/// Standard layer-norm gradient, recomputing the per-row statistics:
/// dx = (g - mean(g) - y * mean(g * y)) / sqrt(var + eps).
pub fn normalize_backward(
    grad: &[f32],
    input: OperandRef<'_>,
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    vec![wants[0].then(|| {
        let (_, width) = last_axis_rows(input.shape);
        let n = width as f32;
        let mut d = vec![0.0; grad.len()];
        for ((row_d, row_g), row_x) in d
            .chunks_exact_mut(width)
            .zip(grad.chunks_exact(width))
            .zip(input.values.chunks_exact(width))
        {
            let mean: f32 = row_x.iter().sum::<f32>() / n;
            let var: f32 = row_x.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
            let inv_std = 1.0 / (var + NORM_EPS).sqrt();
            let g_mean: f32 = row_g.iter().sum::<f32>() / n;
            let gy_mean: f32 = row_g
                .iter()
                .zip(row_x)
                .map(|(g, x)| g * (x - mean) * inv_std)
                .sum::<f32>()
                / n;
            for ((di, g), x) in row_d.iter_mut().zip(row_g).zip(row_x) {
                let y = (x - mean) * inv_std;
                *di = (g - g_mean - y * gy_mean) * inv_std;
            }
        }
        d
    })]
}

pub fn l1_norm_forward(x: &[f32], out: &mut [f32]) {
    out[0] = x.iter().map(|v| v.abs()).sum();
}

pub fn l1_norm_backward(grad: &[f32], x: &[f32], wants: &[bool]) -> Vec<Option<Vec<f32>>> {
    // subgradient convention: zero at zero. f32::signum would give 1.0
    // for +0.0 and -1.0 for -0.0.
    let sign = |v: f32| ((v > 0.0) as i8 - (v < 0.0) as i8) as f32;
    vec![wants[0].then(|| x.iter().map(|&v| grad[0] * sign(v)).collect())]
}
