//! Graph construction: the arena builder, reachability compaction and
//! gradient-flow marking.

use log::debug;

use crate::error::{GradixError, Result};
use crate::graph::node::{Buffer, Node, NodeId, NodeKind};
use crate::ops::Op;
use crate::shape;

/// Arena of nodes under construction. Operator nodes run shape inference the
/// moment they are applied; a shape error leaves the arena untouched, so the
/// caller can retry with corrected arguments.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn shape_of(&self, id: NodeId) -> &[usize] {
        &self.nodes[id.0].shape
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    fn leaf(&mut self, kind: NodeKind, shape_dims: Vec<usize>, values: Vec<f32>) -> Result<NodeId> {
        shape::check_extents(&shape_dims)?;
        let expected = shape::num_elements(&shape_dims);
        if values.len() != expected {
            return Err(GradixError::ValueCountMismatch {
                shape: shape_dims,
                expected,
                got: values.len(),
            });
        }
        Ok(self.push(Node::leaf(kind, shape_dims, values)))
    }

    /// Feature placeholder; data is supplied per forward pass.
    pub fn input(&mut self, shape_dims: Vec<usize>) -> Result<NodeId> {
        let n = shape::num_elements(&shape_dims);
        self.leaf(NodeKind::Input, shape_dims, vec![0.0; n])
    }

    /// Target placeholder; data is supplied per training pass.
    pub fn ground_truth(&mut self, shape_dims: Vec<usize>) -> Result<NodeId> {
        let n = shape::num_elements(&shape_dims);
        self.leaf(NodeKind::GroundTruth, shape_dims, vec![0.0; n])
    }

    /// Trainable leaf with its initializer values.
    pub fn variable(&mut self, shape_dims: Vec<usize>, values: Vec<f32>) -> Result<NodeId> {
        self.leaf(NodeKind::Variable, shape_dims, values)
    }

    /// Fixed, non-trainable leaf.
    pub fn constant(&mut self, shape_dims: Vec<usize>, values: Vec<f32>) -> Result<NodeId> {
        self.leaf(NodeKind::Constant, shape_dims, values)
    }

    /// Applies an operator to existing nodes. Shape inference runs here and
    /// a failure aborts node creation.
    pub fn apply(&mut self, op: Op, children: &[NodeId]) -> Result<NodeId> {
        for &child in children {
            if child.0 >= self.nodes.len() {
                return Err(GradixError::UnknownNode(child.0));
            }
        }
        if !op.arity().accepts(children.len()) {
            return Err(GradixError::InvalidOperand {
                op: op.name(),
                message: format!(
                    "expects {:?} children, got {}",
                    op.arity(),
                    children.len()
                ),
            });
        }
        let child_shapes: Vec<&[usize]> = children
            .iter()
            .map(|&c| self.nodes[c.0].shape.as_slice())
            .collect();
        let out_shape = op.infer_shape(&child_shapes)?;
        debug!(
            "{}: {:?} -> {:?}",
            op.name(),
            child_shapes,
            out_shape
        );
        Ok(self.push(Node::op(op, out_shape, children.to_vec())))
    }

    /// Marks the node whose values `predict` should return.
    pub fn mark_output(&mut self, id: NodeId) -> Result<()> {
        if id.0 >= self.nodes.len() {
            return Err(GradixError::UnknownNode(id.0));
        }
        self.nodes[id.0].is_output = true;
        Ok(())
    }

    /// Ids of the output-marked nodes, in creation order. An output head is
    /// not always an ancestor of the cost node (the cross-entropy losses
    /// consume raw logits), so these are kept alive as roots of their own.
    pub fn output_marks(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_output)
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// Discovers the nodes reachable from `roots`, visiting each exactly
    /// once, and returns them in topological order (children strictly before
    /// parents) with children remapped to the compacted indices. The second
    /// return value is where each requested root landed.
    pub fn build(self, roots: &[NodeId]) -> Result<(Graph, Vec<NodeId>)> {
        for &root in roots {
            if root.0 >= self.nodes.len() {
                return Err(GradixError::UnknownNode(root.0));
            }
        }
        let mut order = Vec::new();
        let mut visited = vec![false; self.nodes.len()];
        for &root in roots {
            dfs_postorder(&self.nodes, root.0, &mut visited, &mut order);
        }

        let mut remap = vec![usize::MAX; self.nodes.len()];
        for (new_idx, &old_idx) in order.iter().enumerate() {
            remap[old_idx] = new_idx;
        }

        let mut all: Vec<Option<Node>> = self.nodes.into_iter().map(Some).collect();
        let mut nodes = Vec::with_capacity(order.len());
        for &old_idx in &order {
            let mut node = all[old_idx].take().expect("node visited once");
            for child in &mut node.children {
                child.0 = remap[child.0];
            }
            nodes.push(node);
        }

        let mut graph = Graph { nodes };
        graph.propagate_gradient_marks();
        let new_roots = roots.iter().map(|r| NodeId(remap[r.0])).collect();
        Ok((graph, new_roots))
    }
}

/// Iterative DFS post-order; a DAG's post-order is a valid topological
/// linearization because every child is emitted before its parent.
fn dfs_postorder(nodes: &[Node], root: usize, visited: &mut [bool], order: &mut Vec<usize>) {
    if visited[root] {
        return;
    }
    // (index, next child to descend into)
    let mut stack = vec![(root, 0usize)];
    visited[root] = true;
    while let Some(top) = stack.last_mut() {
        let idx = top.0;
        if top.1 < nodes[idx].children.len() {
            let child = nodes[idx].children[top.1].0;
            top.1 += 1;
            if !visited[child] {
                visited[child] = true;
                stack.push((child, 0));
            }
        } else {
            order.push(idx);
            stack.pop();
        }
    }
}

/// An ordered, deduplicated sequence of nodes in topological order.
/// Immutable after construction except for value/gradient buffer aliasing.
#[derive(Debug)]
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Index of the first node of a given leaf kind, with the requirement
    /// that it is the only one: multiple placeholders of one kind make the
    /// fed data ambiguous.
    pub fn sole_node_of_kind(&self, kind: &NodeKind, label: &'static str) -> Result<usize> {
        let mut found = None;
        let mut count = 0;
        for (i, node) in self.nodes.iter().enumerate() {
            if &node.kind == kind {
                count += 1;
                found.get_or_insert(i);
            }
        }
        match (found, count) {
            (Some(i), 1) => Ok(i),
            _ => Err(GradixError::AmbiguousPlaceholder { kind: label, count }),
        }
    }

    pub fn output_index(&self) -> Result<usize> {
        self.nodes
            .iter()
            .position(|n| n.is_output)
            .ok_or(GradixError::NoOutputNode)
    }

    /// One forward pass over the topological order: a node receives gradient
    /// if it is a Variable, or if it is an operator with at least one
    /// gradient-receiving child. Marked nodes get a gradient buffer; the
    /// backward pass skips everything else.
    pub(crate) fn propagate_gradient_marks(&mut self) {
        for i in 0..self.nodes.len() {
            let marked = match &self.nodes[i].kind {
                NodeKind::Variable => true,
                NodeKind::Op(_) => self.nodes[i]
                    .children
                    .iter()
                    .any(|c| self.nodes[c.0].requires_grad),
                _ => false,
            };
            let node = &mut self.nodes[i];
            node.requires_grad = marked;
            if marked && node.grad.is_none() {
                node.grad = Some(Buffer::Owned(vec![0.0; node.num_elements()]));
            } else if !marked {
                node.grad = None;
            }
        }
    }
}
