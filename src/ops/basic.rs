//! Elementwise arithmetic, branch selection and dropout kernels.

use rand::Rng;

use crate::blas;
use crate::error::{GradixError, Result};
use crate::ops::{Mode, OpContext, OperandRef};
use crate::shape;

/// Both operands must have exactly the same shape.
pub fn infer_same(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    shape::check_extents(lhs)?;
    if lhs != rhs {
        return Err(GradixError::ShapeMismatch {
            op,
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        });
    }
    Ok(lhs.to_vec())
}

/// True when `rhs` is a rank-1 operand applied across the rows of `lhs`,
/// the one broadcast form the engine supports (bias add in a dense layer).
pub fn is_row_broadcast(lhs: &[usize], rhs: &[usize]) -> bool {
    lhs != rhs && rhs.len() == 1 && lhs.len() > 1 && *lhs.last().unwrap() == rhs[0]
}

/// Same shapes, or a rank-1 rhs matching the last dimension of lhs.
pub fn infer_broadcast(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    shape::check_extents(lhs)?;
    shape::check_extents(rhs)?;
    if lhs == rhs || is_row_broadcast(lhs, rhs) {
        Ok(lhs.to_vec())
    } else {
        Err(GradixError::ShapeMismatch {
            op,
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        })
    }
}

pub fn infer_dropout(rate: f32, input: &[usize]) -> Result<Vec<usize>> {
    shape::check_extents(input)?;
    if !(0.0..1.0).contains(&rate) {
        return Err(GradixError::InvalidOperand {
            op: "dropout",
            message: format!("rate {rate} must be in [0, 1)"),
        });
    }
    Ok(input.to_vec())
}

pub fn add_forward(inputs: &[OperandRef<'_>], out: &mut [f32]) {
    let (x, y) = (inputs[0].values, inputs[1].values);
    if x.len() == y.len() {
        blas::add(x, y, out);
    } else {
        // rank-1 rhs broadcast across rows
        let width = y.len();
        for (row_out, row_x) in out.chunks_exact_mut(width).zip(x.chunks_exact(width)) {
            blas::add(row_x, y, row_out);
        }
    }
}

pub fn add_backward(
    grad: &[f32],
    inputs: &[OperandRef<'_>],
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    let dx = wants[0].then(|| grad.to_vec());
    let dy = wants[1].then(|| {
        let width = inputs[1].values.len();
        if width == grad.len() {
            grad.to_vec()
        } else {
            let mut acc = vec![0.0; width];
            for row in grad.chunks_exact(width) {
                blas::axpy(1.0, row, &mut acc);
            }
            acc
        }
    });
    vec![dx, dy]
}

pub fn sub_backward(grad: &[f32], wants: &[bool]) -> Vec<Option<Vec<f32>>> {
    let dx = wants[0].then(|| grad.to_vec());
    let dy = wants[1].then(|| grad.iter().map(|g| -g).collect());
    vec![dx, dy]
}

pub fn mul_forward(inputs: &[OperandRef<'_>], out: &mut [f32]) {
    let (x, y) = (inputs[0].values, inputs[1].values);
    if x.len() == y.len() {
        blas::mul(x, y, out);
    } else {
        let width = y.len();
        for (row_out, row_x) in out.chunks_exact_mut(width).zip(x.chunks_exact(width)) {
            blas::mul(row_x, y, row_out);
        }
    }
}

pub fn mul_backward(
    grad: &[f32],
    inputs: &[OperandRef<'_>],
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    let (x, y) = (inputs[0].values, inputs[1].values);
    let broadcast = x.len() != y.len();
    let dx = wants[0].then(|| {
        let mut d = vec![0.0; x.len()];
        if broadcast {
            let width = y.len();
            for (row_d, row_g) in d.chunks_exact_mut(width).zip(grad.chunks_exact(width)) {
                blas::mul(row_g, y, row_d);
            }
        } else {
            blas::mul(grad, y, &mut d);
        }
        d
    });
    let dy = wants[1].then(|| {
        let mut d = vec![0.0; y.len()];
        if broadcast {
            let width = y.len();
            for (row_g, row_x) in grad.chunks_exact(width).zip(x.chunks_exact(width)) {
                blas::mul_acc(row_g, row_x, &mut d);
            }
        } else {
            blas::mul(grad, x, &mut d);
        }
        d
    });
    vec![dx, dy]
}

pub fn square_forward(x: &[f32], out: &mut [f32]) {
    for (o, xi) in out.iter_mut().zip(x) {
        *o = xi * xi;
    }
}

pub fn square_backward(grad: &[f32], x: &[f32], wants: &[bool]) -> Vec<Option<Vec<f32>>> {
    vec![wants[0].then(|| grad.iter().zip(x).map(|(g, xi)| 2.0 * xi * g).collect())]
}

pub fn max_forward(inputs: &[OperandRef<'_>], out: &mut [f32]) {
    for ((o, xi), yi) in out.iter_mut().zip(inputs[0].values).zip(inputs[1].values) {
        *o = xi.max(*yi);
    }
}

/// The gradient follows the winning operand; ties go to the first.
pub fn max_backward(
    grad: &[f32],
    inputs: &[OperandRef<'_>],
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    let (x, y) = (inputs[0].values, inputs[1].values);
    let dx = wants[0].then(|| {
        grad.iter()
            .zip(x)
            .zip(y)
            .map(|((g, xi), yi)| if xi >= yi { *g } else { 0.0 })
            .collect()
    });
    let dy = wants[1].then(|| {
        grad.iter()
            .zip(x)
            .zip(y)
            .map(|((g, xi), yi)| if xi >= yi { 0.0 } else { *g })
            .collect()
    });
    vec![dx, dy]
}

pub fn avg_forward(inputs: &[OperandRef<'_>], out: &mut [f32]) {
    for ((o, xi), yi) in out.iter_mut().zip(inputs[0].values).zip(inputs[1].values) {
        *o = 0.5 * (xi + yi);
    }
}

pub fn avg_backward(grad: &[f32], wants: &[bool]) -> Vec<Option<Vec<f32>>> {
    let half = |g: &f32| 0.5 * g;
    vec![
        wants[0].then(|| grad.iter().map(half).collect()),
        wants[1].then(|| grad.iter().map(half).collect()),
    ]
}

fn selected_branch(mode: Mode) -> usize {
    match mode {
        Mode::Train => 0,
        Mode::Eval => 1,
    }
}

/// Copies the training branch (child 0) or the inference branch (child 1).
pub fn select_forward(inputs: &[OperandRef<'_>], out: &mut [f32], mode: Mode) {
    blas::copy(inputs[selected_branch(mode)].values, out);
}

pub fn select_backward(grad: &[f32], wants: &[bool], mode: Mode) -> Vec<Option<Vec<f32>>> {
    let branch = selected_branch(mode);
    let mut grads = vec![None, None];
    if wants[branch] {
        grads[branch] = Some(grad.to_vec());
    }
    grads
}

/// In training mode, zeroes each element with probability `rate` and scales
/// the survivors by 1/(1-rate) so activations keep their expectation. The
/// sampled mask is kept in `aux` for the backward pass. In eval mode this is
/// a plain copy.
pub fn dropout_forward(
    x: &[f32],
    rate: f32,
    out: &mut [f32],
    aux: &mut Vec<f32>,
    ctx: &mut OpContext<'_>,
) {
    if ctx.mode == Mode::Eval {
        aux.clear();
        blas::copy(x, out);
        return;
    }
    let keep_scale = 1.0 / (1.0 - rate);
    aux.resize(x.len(), 0.0);
    for ((o, xi), m) in out.iter_mut().zip(x).zip(aux.iter_mut()) {
        *m = if ctx.rng.random::<f32>() < rate {
            0.0
        } else {
            keep_scale
        };
        *o = xi * *m;
    }
}

pub fn dropout_backward(grad: &[f32], aux: &[f32], wants: &[bool]) -> Vec<Option<Vec<f32>>> {
    vec![wants[0].then(|| {
        if aux.len() == grad.len() {
            let mut d = vec![0.0; grad.len()];
            blas::mul(grad, aux, &mut d);
            d
        } else {
            // no mask captured (eval-mode forward): pass through
            grad.to_vec()
        }
    })]
}
