//! Flat-buffer linear algebra kernels.
//!
//! Small hand-rolled routines over `&[f32]` slices with standard row-major
//! GEMM semantics. The graph executor is agnostic to what backs these; a
//! vendor BLAS could be swapped in as long as the numerics match.

fn gemm_nn(m: usize, n: usize, k: usize, alpha: f32, a: &[f32], b: &[f32], c: &mut [f32]) {
    for i in 0..m {
        for p in 0..k {
            let a_part = alpha * a[i * k + p];
            for j in 0..n {
                c[i * n + j] += a_part * b[p * n + j];
            }
        }
    }
}

fn gemm_nt(m: usize, n: usize, k: usize, alpha: f32, a: &[f32], b: &[f32], c: &mut [f32]) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for p in 0..k {
                sum += a[i * k + p] * b[j * k + p];
            }
            c[i * n + j] += alpha * sum;
        }
    }
}

fn gemm_tn(m: usize, n: usize, k: usize, alpha: f32, a: &[f32], b: &[f32], c: &mut [f32]) {
    for p in 0..k {
        for i in 0..m {
            let a_part = alpha * a[p * m + i];
            for j in 0..n {
                c[i * n + j] += a_part * b[p * n + j];
            }
        }
    }
}

fn gemm_tt(m: usize, n: usize, k: usize, alpha: f32, a: &[f32], b: &[f32], c: &mut [f32]) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for p in 0..k {
                sum += a[p * m + i] * b[j * k + p];
            }
            c[i * n + j] += alpha * sum;
        }
    }
}

/// C = alpha * op(A) * op(B) + beta * C, row-major.
///
/// `op(A)` is `m x k` and `op(B)` is `k x n` after the optional transposes.
#[allow(clippy::too_many_arguments)]
pub fn gemm(
    trans_a: bool,
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    b: &[f32],
    beta: f32,
    c: &mut [f32],
) {
    for v in c.iter_mut().take(m * n) {
        *v *= beta;
    }
    match (trans_a, trans_b) {
        (false, false) => gemm_nn(m, n, k, alpha, a, b, c),
        (true, false) => gemm_tn(m, n, k, alpha, a, b, c),
        (false, true) => gemm_nt(m, n, k, alpha, a, b, c),
        (true, true) => gemm_tt(m, n, k, alpha, a, b, c),
    }
}

/// y += alpha * x
pub fn axpy(alpha: f32, x: &[f32], y: &mut [f32]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// y = alpha * x + beta * y
pub fn axpby(alpha: f32, x: &[f32], beta: f32, y: &mut [f32]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi = alpha * xi + beta * *yi;
    }
}

/// y = alpha * x
pub fn scale(alpha: f32, x: &[f32], y: &mut [f32]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi = alpha * xi;
    }
}

pub fn copy(x: &[f32], y: &mut [f32]) {
    y.copy_from_slice(x);
}

pub fn fill(alpha: f32, y: &mut [f32]) {
    for yi in y.iter_mut() {
        *yi = alpha;
    }
}

/// z = x + y
pub fn add(x: &[f32], y: &[f32], z: &mut [f32]) {
    for ((zi, xi), yi) in z.iter_mut().zip(x).zip(y) {
        *zi = xi + yi;
    }
}

/// z = x - y
pub fn sub(x: &[f32], y: &[f32], z: &mut [f32]) {
    for ((zi, xi), yi) in z.iter_mut().zip(x).zip(y) {
        *zi = xi - yi;
    }
}

/// z = x * y
pub fn mul(x: &[f32], y: &[f32], z: &mut [f32]) {
    for ((zi, xi), yi) in z.iter_mut().zip(x).zip(y) {
        *zi = xi * yi;
    }
}

/// z += x * y
pub fn mul_acc(x: &[f32], y: &[f32], z: &mut [f32]) {
    for ((zi, xi), yi) in z.iter_mut().zip(x).zip(y) {
        *zi += xi * yi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gemm_matches_hand_computation() {
        // A = [[1, 2], [3, 4]], B = [[5, 6], [7, 8]]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [0.0; 4];
        gemm(false, false, 2, 2, 2, 1.0, &a, &b, 0.0, &mut c);
        assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn gemm_transposed_variants_agree() {
        // A is 2x3, B is 3x2; compare A*B against (A^T)^T * (B^T)^T.
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let at = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let bt = [7.0, 9.0, 11.0, 8.0, 10.0, 12.0];

        let mut c_nn = [0.0; 4];
        let mut c_tn = [0.0; 4];
        let mut c_nt = [0.0; 4];
        let mut c_tt = [0.0; 4];
        gemm(false, false, 2, 2, 3, 1.0, &a, &b, 0.0, &mut c_nn);
        gemm(true, false, 2, 2, 3, 1.0, &at, &b, 0.0, &mut c_tn);
        gemm(false, true, 2, 2, 3, 1.0, &a, &bt, 0.0, &mut c_nt);
        gemm(true, true, 2, 2, 3, 1.0, &at, &bt, 0.0, &mut c_tt);

        for i in 0..4 {
            assert_relative_eq!(c_nn[i], c_tn[i], epsilon = 1e-6);
            assert_relative_eq!(c_nn[i], c_nt[i], epsilon = 1e-6);
            assert_relative_eq!(c_nn[i], c_tt[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn gemm_respects_beta() {
        let a = [1.0];
        let b = [1.0];
        let mut c = [10.0];
        gemm(false, false, 1, 1, 1, 2.0, &a, &b, 0.5, &mut c);
        assert_eq!(c[0], 7.0);
    }

    #[test]
    fn axpy_accumulates() {
        let x = [1.0, 2.0];
        let mut y = [10.0, 20.0];
        axpy(2.0, &x, &mut y);
        assert_eq!(y, [12.0, 24.0]);
    }

    #[test]
    fn elementwise_kernels() {
        let x = [4.0, 6.0];
        let y = [2.0, 3.0];
        let mut z = [0.0; 2];
        add(&x, &y, &mut z);
        assert_eq!(z, [6.0, 9.0]);
        sub(&x, &y, &mut z);
        assert_eq!(z, [2.0, 3.0]);
        mul(&x, &y, &mut z);
        assert_eq!(z, [8.0, 18.0]);
        mul_acc(&x, &y, &mut z);
        assert_eq!(z, [16.0, 36.0]);
    }
}
