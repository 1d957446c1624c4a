//! Operator catalog.
//!
//! Every operator kind is a variant of [`Op`], carrying its immutable params.
//! Dispatch is a pattern match mapping kind -> (shape inference, forward,
//! backward); the per-family kernels live in the submodules. Keeping the
//! catalog in one enum means the compiler checks that every kind implements
//! all three contracts.
//!
//! Contracts shared by every kind:
//! - `infer_shape` is a pure function of the children's shapes and the
//!   params; it rejects out-of-range axes, incompatible operands and
//!   non-positive extents instead of producing a malformed node.
//! - `forward` writes the output buffer fully, never accumulates.
//! - `backward` returns one gradient contribution per child, `None` for
//!   children that cannot receive gradient; the executor *adds* each
//!   contribution into the child's gradient buffer.

pub mod basic;
pub mod loss;
pub mod matrix;
pub mod reduction;
pub mod reshape;
pub mod unary;

use rand::rngs::StdRng;

use crate::error::Result;

/// Execution mode for a forward pass. Passed in explicitly so nodes stay
/// immutable after construction; only `Select` and `Dropout` consult it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Per-pass state handed to `forward`: the execution mode and the RNG used
/// by stochastic operators (dropout mask sampling).
pub struct OpContext<'a> {
    pub mode: Mode,
    pub rng: &'a mut StdRng,
}

/// A child operand as seen by a kernel: its current values and its shape.
#[derive(Clone, Copy)]
pub struct OperandRef<'a> {
    pub values: &'a [f32],
    pub shape: &'a [usize],
}

/// How many children an operator kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

/// One operator kind together with its immutable params.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // elementwise arithmetic
    Add,
    Sub,
    Mul,
    Square,
    Max,
    Avg,
    // branch selection and regularization
    Select,
    Dropout { rate: f32 },
    // unary activations
    Exp,
    Log,
    Relu,
    Sigmoid,
    Tanh,
    Sin,
    // linear algebra
    MatMul,
    CMatMul,
    // reductions and normalization
    ReduceSum { axis: usize },
    ReduceMean { axis: usize },
    Softmax,
    Normalize,
    L1Norm,
    // shape manipulation
    Reshape { shape: Vec<usize> },
    Slice { axis: usize, start: usize, size: usize },
    Concat { axis: usize },
    // losses
    Mse,
    LogisticXent,
    CategoricalXent,
}

impl Op {
    /// Canonical identifier, used only by the serializer.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Square => "square",
            Op::Max => "max",
            Op::Avg => "avg",
            Op::Select => "select",
            Op::Dropout { .. } => "dropout",
            Op::Exp => "exp",
            Op::Log => "log",
            Op::Relu => "relu",
            Op::Sigmoid => "sigmoid",
            Op::Tanh => "tanh",
            Op::Sin => "sin",
            Op::MatMul => "matmul",
            Op::CMatMul => "cmatmul",
            Op::ReduceSum { .. } => "reduce_sum",
            Op::ReduceMean { .. } => "reduce_mean",
            Op::Softmax => "softmax",
            Op::Normalize => "normalize",
            Op::L1Norm => "l1_norm",
            Op::Reshape { .. } => "reshape",
            Op::Slice { .. } => "slice",
            Op::Concat { .. } => "concat",
            Op::Mse => "mse",
            Op::LogisticXent => "logistic_x_entropy",
            Op::CategoricalXent => "categorical_x_entropy",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Op::Square
            | Op::Dropout { .. }
            | Op::Exp
            | Op::Log
            | Op::Relu
            | Op::Sigmoid
            | Op::Tanh
            | Op::Sin
            | Op::ReduceSum { .. }
            | Op::ReduceMean { .. }
            | Op::Softmax
            | Op::Normalize
            | Op::L1Norm
            | Op::Reshape { .. }
            | Op::Slice { .. } => Arity::Exact(1),
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Max
            | Op::Avg
            | Op::Select
            | Op::MatMul
            | Op::CMatMul
            | Op::Mse
            | Op::LogisticXent
            | Op::CategoricalXent => Arity::Exact(2),
            Op::Concat { .. } => Arity::AtLeast(2),
        }
    }

    /// Output shape for the given children's shapes, or a shape error.
    pub fn infer_shape(&self, children: &[&[usize]]) -> Result<Vec<usize>> {
        match self {
            Op::Add => basic::infer_broadcast("add", children[0], children[1]),
            Op::Sub => basic::infer_same("sub", children[0], children[1]),
            Op::Mul => basic::infer_broadcast("mul", children[0], children[1]),
            Op::Square | Op::Exp | Op::Log | Op::Relu | Op::Sigmoid | Op::Tanh | Op::Sin => {
                Ok(children[0].to_vec())
            }
            Op::Max => basic::infer_same("max", children[0], children[1]),
            Op::Avg => basic::infer_same("avg", children[0], children[1]),
            Op::Select => basic::infer_same("select", children[0], children[1]),
            Op::Dropout { rate } => basic::infer_dropout(*rate, children[0]),
            Op::MatMul => matrix::infer_matmul(children[0], children[1]),
            Op::CMatMul => matrix::infer_cmatmul(children[0], children[1]),
            Op::ReduceSum { axis } | Op::ReduceMean { axis } => {
                reduction::infer_reduce(children[0], *axis)
            }
            Op::Softmax => reduction::infer_rowwise("softmax", children[0]),
            Op::Normalize => reduction::infer_rowwise("normalize", children[0]),
            Op::L1Norm => Ok(vec![]),
            Op::Reshape { shape } => reshape::infer_reshape(children[0], shape),
            Op::Slice { axis, start, size } => {
                reshape::infer_slice(children[0], *axis, *start, *size)
            }
            Op::Concat { axis } => reshape::infer_concat(children, *axis),
            Op::Mse => loss::infer_loss("mse", children[0], children[1]),
            Op::LogisticXent => loss::infer_loss("logistic_x_entropy", children[0], children[1]),
            Op::CategoricalXent => loss::infer_categorical(children[0], children[1]),
        }
    }

    /// Evaluates the node. `out` is written fully; `aux` is per-node scratch
    /// captured here and handed back to `backward` (dropout stores its mask).
    pub fn forward(
        &self,
        inputs: &[OperandRef<'_>],
        out: &mut [f32],
        aux: &mut Vec<f32>,
        ctx: &mut OpContext<'_>,
    ) {
        match self {
            Op::Add => basic::add_forward(inputs, out),
            Op::Sub => crate::blas::sub(inputs[0].values, inputs[1].values, out),
            Op::Mul => basic::mul_forward(inputs, out),
            Op::Square => basic::square_forward(inputs[0].values, out),
            Op::Max => basic::max_forward(inputs, out),
            Op::Avg => basic::avg_forward(inputs, out),
            Op::Select => basic::select_forward(inputs, out, ctx.mode),
            Op::Dropout { rate } => basic::dropout_forward(inputs[0].values, *rate, out, aux, ctx),
            Op::Exp => unary::map(inputs[0].values, out, f32::exp),
            Op::Log => unary::map(inputs[0].values, out, f32::ln),
            Op::Relu => unary::map(inputs[0].values, out, |x| x.max(0.0)),
            Op::Sigmoid => unary::map(inputs[0].values, out, unary::sigmoid),
            Op::Tanh => unary::map(inputs[0].values, out, f32::tanh),
            Op::Sin => unary::map(inputs[0].values, out, f32::sin),
            Op::MatMul => matrix::matmul_forward(inputs, out),
            Op::CMatMul => matrix::cmatmul_forward(inputs, out),
            Op::ReduceSum { axis } => reduction::reduce_forward(inputs[0], *axis, 1.0, out),
            Op::ReduceMean { axis } => {
                let s = 1.0 / inputs[0].shape[*axis] as f32;
                reduction::reduce_forward(inputs[0], *axis, s, out)
            }
            Op::Softmax => reduction::softmax_forward(inputs[0], out),
            Op::Normalize => reduction::normalize_forward(inputs[0], out),
            Op::L1Norm => reduction::l1_norm_forward(inputs[0].values, out),
            Op::Reshape { .. } => crate::blas::copy(inputs[0].values, out),
            Op::Slice { axis, start, size } => {
                reshape::slice_forward(inputs[0], *axis, *start, *size, out)
            }
            Op::Concat { axis } => reshape::concat_forward(inputs, *axis, out),
            Op::Mse => loss::mse_forward(inputs, out),
            Op::LogisticXent => loss::logistic_xent_forward(inputs, out),
            Op::CategoricalXent => loss::categorical_xent_forward(inputs, out),
        }
    }

    /// Gradient contributions for each child given the node's own gradient.
    ///
    /// `wants[i]` tells whether child `i` is gradient-receiving; kernels skip
    /// the work entirely for children that are not, and constants never
    /// accumulate gradient. Contributions are dense buffers the executor
    /// adds into the children's gradient slices.
    pub fn backward(
        &self,
        grad: &[f32],
        inputs: &[OperandRef<'_>],
        output: &[f32],
        aux: &[f32],
        wants: &[bool],
        mode: Mode,
    ) -> Vec<Option<Vec<f32>>> {
        match self {
            Op::Add => basic::add_backward(grad, inputs, wants),
            Op::Sub => basic::sub_backward(grad, wants),
            Op::Mul => basic::mul_backward(grad, inputs, wants),
            Op::Square => basic::square_backward(grad, inputs[0].values, wants),
            Op::Max => basic::max_backward(grad, inputs, wants),
            Op::Avg => basic::avg_backward(grad, wants),
            Op::Select => basic::select_backward(grad, wants, mode),
            Op::Dropout { .. } => basic::dropout_backward(grad, aux, wants),
            Op::Exp => unary::map_backward(grad, output, wants, |y| y),
            Op::Log => unary::map_backward(grad, inputs[0].values, wants, |x| 1.0 / x),
            Op::Relu => {
                unary::map_backward(grad, inputs[0].values, wants, |x| {
                    if x > 0.0 { 1.0 } else { 0.0 }
                })
            }
            Op::Sigmoid => unary::map_backward(grad, output, wants, |y| y * (1.0 - y)),
            Op::Tanh => unary::map_backward(grad, output, wants, |y| 1.0 - y * y),
            Op::Sin => unary::map_backward(grad, inputs[0].values, wants, f32::cos),
            Op::MatMul => matrix::matmul_backward(grad, inputs, wants),
            Op::CMatMul => matrix::cmatmul_backward(grad, inputs, wants),
            Op::ReduceSum { axis } => {
                reduction::reduce_backward(grad, inputs[0], *axis, 1.0, wants)
            }
            Op::ReduceMean { axis } => {
                let s = 1.0 / inputs[0].shape[*axis] as f32;
                reduction::reduce_backward(grad, inputs[0], *axis, s, wants)
            }
            Op::Softmax => reduction::softmax_backward(grad, inputs[0].shape, output, wants),
            Op::Normalize => reduction::normalize_backward(grad, inputs[0], wants),
            Op::L1Norm => reduction::l1_norm_backward(grad, inputs[0].values, wants),
            Op::Reshape { .. } => {
                vec![wants[0].then(|| grad.to_vec())]
            }
            Op::Slice { axis, start, size } => {
                reshape::slice_backward(grad, inputs[0], *axis, *start, *size, wants)
            }
            Op::Concat { axis } => reshape::concat_backward(grad, inputs, *axis, wants),
            Op::Mse => loss::mse_backward(grad, inputs, wants),
            Op::LogisticXent => loss::logistic_xent_backward(grad, inputs, wants),
            Op::CategoricalXent => loss::categorical_xent_backward(grad, inputs, wants),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_shape_is_pure() {
        let cases: [(Op, Vec<&[usize]>); 4] = [
            (Op::MatMul, vec![&[2, 3], &[3, 4]]),
            (Op::ReduceMean { axis: 1 }, vec![&[2, 3]]),
            (Op::Add, vec![&[4, 2], &[2]]),
            (Op::Concat { axis: 0 }, vec![&[2, 3], &[5, 3]]),
        ];
        for (op, children) in &cases {
            let first = op.infer_shape(children).unwrap();
            let second = op.infer_shape(children).unwrap();
            assert_eq!(first, second, "{} re-inferred differently", op.name());
        }
    }

    #[test]
    fn arity_gates_child_counts() {
        assert!(Op::Sigmoid.arity().accepts(1));
        assert!(!Op::Sigmoid.arity().accepts(2));
        assert!(Op::Concat { axis: 0 }.arity().accepts(5));
        assert!(!Op::Concat { axis: 0 }.arity().accepts(1));
    }
}
