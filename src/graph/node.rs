//! Node entity and the buffer view type.

use crate::ops::Op;
use crate::shape;

/// Arena index of a node. Children are referenced by index, which keeps the
/// graph acyclic by construction: a node can only point at nodes that
/// already existed when it was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// What a node is: one of the four leaf kinds, or an operator.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Placeholder bound to externally supplied feature data.
    Input,
    /// Placeholder bound to externally supplied target data.
    GroundTruth,
    /// Trainable leaf; its values live in the network's flat variable array.
    Variable,
    /// Fixed, non-trainable leaf.
    Constant,
    /// Operator node.
    Op(Op),
}

impl NodeKind {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, NodeKind::Input | NodeKind::GroundTruth)
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, NodeKind::Variable)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, NodeKind::Constant)
    }

    pub fn as_op(&self) -> Option<&Op> {
        match self {
            NodeKind::Op(op) => Some(op),
            _ => None,
        }
    }
}

/// Where a node's float data lives.
///
/// Before flattening every buffer is `Owned`. Flattening moves Variable and
/// Constant data into the network's contiguous arrays and leaves the nodes
/// holding (offset, len) views; an explicit view type instead of a raw
/// pointer handoff, so there is nothing to use after free.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Owned(Vec<f32>),
    Variables { offset: usize, len: usize },
    VariableGrads { offset: usize, len: usize },
    Constants { offset: usize, len: usize },
}

impl Buffer {
    pub fn len(&self) -> usize {
        match self {
            Buffer::Owned(v) => v.len(),
            Buffer::Variables { len, .. }
            | Buffer::VariableGrads { len, .. }
            | Buffer::Constants { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single operation or leaf value in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Row-major dimension sizes; immutable after construction. Rank 0 is a
    /// scalar.
    pub shape: Vec<usize>,
    /// Predecessors, in operand order. Always empty for leaf kinds.
    pub children: Vec<NodeId>,
    pub values: Buffer,
    /// Present only when the node is gradient-receiving.
    pub grad: Option<Buffer>,
    /// True if the node is a Variable or any child has it true.
    pub requires_grad: bool,
    /// Marks the node whose values `predict` returns.
    pub is_output: bool,
    /// Scratch captured by forward for backward (dropout mask). Empty for
    /// every other kind.
    pub aux: Vec<f32>,
}

impl Node {
    pub fn leaf(kind: NodeKind, shape_dims: Vec<usize>, values: Vec<f32>) -> Self {
        Self {
            kind,
            shape: shape_dims,
            children: Vec::new(),
            values: Buffer::Owned(values),
            grad: None,
            requires_grad: false,
            is_output: false,
            aux: Vec::new(),
        }
    }

    pub fn op(op: Op, shape_dims: Vec<usize>, children: Vec<NodeId>) -> Self {
        let n = shape::num_elements(&shape_dims);
        Self {
            kind: NodeKind::Op(op),
            shape: shape_dims,
            children,
            values: Buffer::Owned(vec![0.0; n]),
            grad: None,
            requires_grad: false,
            is_output: false,
            aux: Vec::new(),
        }
    }

    pub fn num_elements(&self) -> usize {
        shape::num_elements(&self.shape)
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }
}
