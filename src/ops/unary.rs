//! Unary activation kernels: exp, log, relu, sigmoid, tanh, sin.
//!
//! All of these share the pattern out[i] = f(x[i]) with a derivative that is
//! elementwise in either the input or the cached output, so forward and
//! backward are expressed through the two mappers below.

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn map(x: &[f32], out: &mut [f32], f: impl Fn(f32) -> f32) {
    for (o, xi) in out.iter_mut().zip(x) {
        *o = f(*xi);
    }
}

/// dx[i] = grad[i] * df(basis[i]), where `basis` is whichever of the input
/// or the output the derivative is cheapest in.
pub fn map_backward(
    grad: &[f32],
    basis: &[f32],
    wants: &[bool],
    df: impl Fn(f32) -> f32,
) -> Vec<Option<Vec<f32>>> {
    vec![wants[0].then(|| grad.iter().zip(basis).map(|(g, b)| g * df(*b)).collect())]
}
