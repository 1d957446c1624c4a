//! Matrix multiplication, routed through the flat-buffer GEMM.

use crate::blas;
use crate::error::{GradixError, Result};
use crate::ops::OperandRef;
use crate::shape;

pub fn infer_matmul(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    shape::check_extents(lhs)?;
    shape::check_extents(rhs)?;
    if lhs.len() != 2 || rhs.len() != 2 || lhs[1] != rhs[0] {
        return Err(GradixError::ShapeMismatch {
            op: "matmul",
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        });
    }
    Ok(vec![lhs[0], rhs[1]])
}

pub fn matmul_forward(inputs: &[OperandRef<'_>], out: &mut [f32]) {
    let (m, k) = (inputs[0].shape[0], inputs[0].shape[1]);
    let n = inputs[1].shape[1];
    blas::gemm(
        false,
        false,
        m,
        n,
        k,
        1.0,
        inputs[0].values,
        inputs[1].values,
        0.0,
        out,
    );
}

/// Matmul against a transposed rhs: (m,k) x (n,k) -> (m,n). Lets a weight
/// matrix stored row-per-output be applied without materializing B^T.
pub fn infer_cmatmul(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    shape::check_extents(lhs)?;
    shape::check_extents(rhs)?;
    if lhs.len() != 2 || rhs.len() != 2 || lhs[1] != rhs[1] {
        return Err(GradixError::ShapeMismatch {
            op: "cmatmul",
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        });
    }
    Ok(vec![lhs[0], rhs[0]])
}

pub fn cmatmul_forward(inputs: &[OperandRef<'_>], out: &mut [f32]) {
    let (m, k) = (inputs[0].shape[0], inputs[0].shape[1]);
    let n = inputs[1].shape[0];
    blas::gemm(
        false,
        true,
        m,
        n,
        k,
        1.0,
        inputs[0].values,
        inputs[1].values,
        0.0,
        out,
    );
}

/// out = A * B^T, so dA = G * B and dB = G^T * A.
pub fn cmatmul_backward(
    grad: &[f32],
    inputs: &[OperandRef<'_>],
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    let (m, k) = (inputs[0].shape[0], inputs[0].shape[1]);
    let n = inputs[1].shape[0];
    let da = wants[0].then(|| {
        let mut d = vec![0.0; m * k];
        blas::gemm(false, false, m, k, n, 1.0, grad, inputs[1].values, 0.0, &mut d);
        d
    });
    let db = wants[1].then(|| {
        let mut d = vec![0.0; n * k];
        blas::gemm(true, false, n, k, m, 1.0, grad, inputs[0].values, 0.0, &mut d);
        d
    });
    vec![da, db]
}

/// dA = G * B^T, dB = A^T * G; both expressed as GEMMs on the same buffers.
pub fn matmul_backward(
    grad: &[f32],
    inputs: &[OperandRef<'_>],
    wants: &[bool],
) -> Vec<Option<Vec<f32>>> {
    let (m, k) = (inputs[0].shape[0], inputs[0].shape[1]);
    let n = inputs[1].shape[1];
    let da = wants[0].then(|| {
        let mut d = vec![0.0; m * k];
        blas::gemm(false, true, m, k, n, 1.0, grad, inputs[1].values, 0.0, &mut d);
        d
    });
    let db = wants[1].then(|| {
        let mut d = vec![0.0; k * n];
        blas::gemm(true, false, k, n, m, 1.0, inputs[0].values, grad, 0.0, &mut d);
        d
    });
    vec![da, db]
}
