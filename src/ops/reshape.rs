//! Shape manipulation: reshape, slice, concat.

use crate::blas;
use crate::error::{GradixError, Result};
use crate::ops::OperandRef;
use crate::shape;

pub fn infer_reshape(input: &[usize], target: &[usize]) -> Result<Vec<usize>> {
    shape::check_extents(input)?;
    shape::check_extents(target)?;
    if shape::num_elements(input) != shape::num_elements(target) {
        return Err(GradixError::ShapeMismatch {
            op: "reshape",
            lhs: input.to_vec(),
            rhs: target.to_vec(),
        });
    }
    Ok(target.to_vec())
}

pub fn infer_slice(input: &[usize], axis: usize, start: usize, size: usize) -> Result<Vec<usize>> {
    shape::check_extents(input)?;
    shape::check_axis(input, axis)?;
    let extent = input[axis];
    if size == 0 || start + size > extent {
        return Err(GradixError::InvalidSlice {
            start,
            size,
            extent,
        });
    }
    let mut out = input.to_vec();
    out[axis] = size;
    Ok(out)
}

pub fn infer_concat(children: &[&[usize]], axis: usize) -> Result<Vec<usize>> {
    let first = children[0];
    shape::check_extents(first)?;
    shape::check_axis(first, axis)?;
    let mut axis_total = first[axis];
    for other in &children[1..] {
        shape::check_extents(other)?;
        let compatible = other.len() == first.len()
            && other
                .iter()
                .zip(first)
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(GradixError::ShapeMismatch {
                op: "concat",
                lhs: first.to_vec(),
                rhs: other.to_vec(),
            });
        }
        axis_total += other[axis];
    }
    let mut out = first.to_vec();
    out[axis] = axis_total;
    Ok(out)
}

/// Copies the contiguous `[start, start+size)` sub-range per outer index.
pub fn slice_forward(
    input: OperandRef<'_>,
    axis: usize,
    start: usize,
    size: usize,
    out: &mut [f32],
) {
    let (outer, extent, inner) = shape::axis_extents(input.shape, axis);
    for o in 0..outer {
        let src = (o * extent + start) * inner;
        let dst = o * size * inner;
        blas::copy(
            &input.values[src..src + size * inner],
            &mut out[dst..dst + size * inner],
        );
    }
}

/// Adds the output gradient back into the sliced sub-range; the rest of the
/// input gradient stays zero.
pub fn slice_backward(
    grad: &[f32],
    input: OperandRef<'_>,
    axis: usize,
    start: usize,
    size: usize,
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    vec![wants[0].then(|| {
        let (outer, extent, inner) = shape::axis_extents(input.shape, axis);
        let mut d = vec![0.0; input.values.len()];
        for o in 0..outer {
            let dst = (o * extent + start) * inner;
            let src = o * size * inner;
            blas::axpy(
                1.0,
                &grad[src..src + size * inner],
                &mut d[dst..dst + size * inner],
            );
        }
        d
    })]
}

pub fn concat_forward(inputs: &[OperandRef<'_>], axis: usize, out: &mut [f32]) {
    let (outer, _, inner) = shape::axis_extents(inputs[0].shape, axis);
    let total: usize = inputs.iter().map(|c| c.shape[axis]).sum();
    for o in 0..outer {
        let mut cursor = 0;
        for child in inputs {
            let extent = child.shape[axis];
            let src = o * extent * inner;
            let dst = (o * total + cursor) * inner;
            blas::copy(
                &child.values[src..src + extent * inner],
                &mut out[dst..dst + extent * inner],
            );
            cursor += extent;
        }
    }
}

pub fn concat_backward(
    grad: &[f32],
    inputs: &[OperandRef<'_>],
    axis: usize,
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    let (outer, _, inner) = shape::axis_extents(inputs[0].shape, axis);
    let total: usize = inputs.iter().map(|c| c.shape[axis]).sum();
    let mut grads: Vec<Option<Vec<f32>>> = inputs
        .iter()
        .zip(wants)
        .map(|(child, want)| want.then(|| vec![0.0; child.values.len()]))
        .collect();
    for o in 0..outer {
        let mut cursor = 0;
        for (child, slot) in inputs.iter().zip(grads.iter_mut()) {
            let extent = child.shape[axis];
            if let Some(d) = slot {
                let src = (o * total + cursor) * inner;
                let dst = o * extent * inner;
                blas::copy(
                    &grad[src..src + extent * inner],
                    &mut d[dst..dst + extent * inner],
                );
            }
            cursor += extent;
        }
    }
    grads
}
