//! The network: flattened parameter store plus the forward/backward
//! execution driver.
//!
//! Construction runs the one-time flattening pass: every Variable node's
//! initializer values are copied into one contiguous `variables` array (with
//! a parallel `variable_gradients` array) and every Constant node's values
//! into `constants`; the nodes are left holding (offset, len) views. After
//! that no Variable or Constant node owns private storage, and the optimizer
//! can update the whole network by walking two flat slices.

use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::blas;
use crate::error::{GradixError, Result};
use crate::graph::{Buffer, Graph, GraphBuilder, NodeId, NodeKind};
use crate::ops::{Mode, Op, OpContext, OperandRef};

pub struct Network {
    pub(crate) graph: Graph,
    pub(crate) cost_index: usize,
    pub(crate) variables: Vec<f32>,
    pub(crate) variable_gradients: Vec<f32>,
    pub(crate) constants: Vec<f32>,
    rng: StdRng,
}

impl Network {
    /// Builds a network from a graph whose cost node is `cost`. The cost
    /// node must be a scalar; extra roots (for example side outputs) can be
    /// kept alive with [`Network::with_roots`].
    pub fn new(builder: GraphBuilder, cost: NodeId) -> Result<Self> {
        Self::with_roots(builder, cost, &[])
    }

    pub fn with_roots(builder: GraphBuilder, cost: NodeId, extra_roots: &[NodeId]) -> Result<Self> {
        if cost.0 >= builder.len() {
            return Err(GradixError::UnknownNode(cost.0));
        }
        let cost_shape = builder.shape_of(cost);
        if !cost_shape.is_empty() {
            return Err(GradixError::NonScalarCost {
                shape: cost_shape.to_vec(),
            });
        }
        let mut roots = vec![cost];
        roots.extend_from_slice(extra_roots);
        // output heads can sit off the cost's ancestry (softmax/sigmoid
        // heads next to a logits loss); keep them reachable
        roots.extend(builder.output_marks());
        let (graph, remapped) = builder.build(&roots)?;
        let mut net = Self::from_graph(graph, remapped[0].0);
        net.flatten();
        debug!(
            "network: {} nodes, {} variables, {} constants",
            net.graph.len(),
            net.variables.len(),
            net.constants.len()
        );
        Ok(net)
    }

    pub(crate) fn from_graph(graph: Graph, cost_index: usize) -> Self {
        Self {
            graph,
            cost_index,
            variables: Vec::new(),
            variable_gradients: Vec::new(),
            constants: Vec::new(),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reseeds the RNG driving stochastic operators (dropout), for
    /// reproducible runs.
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// The one-time, irreversible aliasing transfer described in the module
    /// docs. Nodes are visited in topological order, so offsets are stable
    /// and the serializer can dump the arrays verbatim.
    pub(crate) fn flatten(&mut self) {
        for node in &mut self.graph.nodes {
            match node.kind {
                NodeKind::Variable => {
                    let owned = std::mem::replace(&mut node.values, Buffer::Owned(Vec::new()));
                    let Buffer::Owned(values) = owned else {
                        unreachable!("flatten runs once on owned buffers");
                    };
                    let offset = self.variables.len();
                    let len = values.len();
                    self.variables.extend_from_slice(&values);
                    node.values = Buffer::Variables { offset, len };
                    node.grad = Some(Buffer::VariableGrads { offset, len });
                }
                NodeKind::Constant => {
                    let owned = std::mem::replace(&mut node.values, Buffer::Owned(Vec::new()));
                    let Buffer::Owned(values) = owned else {
                        unreachable!("flatten runs once on owned buffers");
                    };
                    let offset = self.constants.len();
                    let len = values.len();
                    self.constants.extend_from_slice(&values);
                    node.values = Buffer::Constants { offset, len };
                }
                _ => {}
            }
        }
        self.variable_gradients = vec![0.0; self.variables.len()];
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.len()
    }

    /// Flat trainable values, in flattening order.
    pub fn variables(&self) -> &[f32] {
        &self.variables
    }

    pub fn variable_gradients(&self) -> &[f32] {
        &self.variable_gradients
    }

    /// The (values, gradients) pair an optimizer step consumes.
    pub fn parameters_mut(&mut self) -> (&mut [f32], &[f32]) {
        (&mut self.variables, &self.variable_gradients)
    }

    pub fn constants(&self) -> &[f32] {
        &self.constants
    }

    /// Current values of a node, resolved through its buffer view.
    pub fn node_values(&self, id: NodeId) -> &[f32] {
        resolve_values(&self.graph, &self.variables, &self.constants, id.0)
    }

    /// Copies feature data into the Input placeholder. The network must
    /// contain exactly one Input node and the buffer must match its size.
    pub fn feed_input(&mut self, data: &[f32]) -> Result<()> {
        self.feed(NodeKind::Input, "input", data)
    }

    /// Copies target data into the GroundTruth placeholder.
    pub fn feed_truth(&mut self, data: &[f32]) -> Result<()> {
        self.feed(NodeKind::GroundTruth, "ground truth", data)
    }

    fn feed(&mut self, kind: NodeKind, label: &'static str, data: &[f32]) -> Result<()> {
        let idx = self.graph.sole_node_of_kind(&kind, label)?;
        let node = &mut self.graph.nodes[idx];
        let expected = node.num_elements();
        if data.len() != expected {
            return Err(GradixError::PlaceholderSizeMismatch {
                kind: label,
                expected,
                got: data.len(),
            });
        }
        let Buffer::Owned(values) = &mut node.values else {
            unreachable!("placeholders keep owned buffers");
        };
        values.copy_from_slice(data);
        Ok(())
    }

    /// Evaluates every node in topological order. Dependencies are complete
    /// before each node runs, so one pass suffices.
    pub fn forward(&mut self, mode: Mode) {
        for i in 0..self.graph.nodes.len() {
            let Some(op) = self.graph.nodes[i].kind.as_op().cloned() else {
                continue;
            };
            self.run_forward(i, &op, mode);
        }
    }

    fn run_forward(&mut self, i: usize, op: &Op, mode: Mode) {
        let out_buffer = std::mem::replace(&mut self.graph.nodes[i].values, Buffer::Owned(Vec::new()));
        let Buffer::Owned(mut out) = out_buffer else {
            unreachable!("operator nodes keep owned buffers");
        };
        let mut aux = std::mem::take(&mut self.graph.nodes[i].aux);
        {
            let inputs = gather_operands(
                &self.graph,
                &self.variables,
                &self.constants,
                &self.graph.nodes[i].children,
            );
            let mut ctx = OpContext {
                mode,
                rng: &mut self.rng,
            };
            op.forward(&inputs, &mut out, &mut aux, &mut ctx);
        }
        self.graph.nodes[i].values = Buffer::Owned(out);
        self.graph.nodes[i].aux = aux;
    }

    /// Scalar value of the cost node, valid after a forward pass.
    pub fn cost(&self) -> f32 {
        resolve_values(&self.graph, &self.variables, &self.constants, self.cost_index)[0]
    }

    /// Feeds the input, runs an inference-mode forward pass and returns the
    /// values of the output-marked node.
    pub fn predict(&mut self, data: &[f32]) -> Result<&[f32]> {
        let out_idx = self.graph.output_index()?;
        self.feed_input(data)?;
        self.forward(Mode::Eval);
        Ok(resolve_values(
            &self.graph,
            &self.variables,
            &self.constants,
            out_idx,
        ))
    }

    /// Reverse-mode gradient pass. Zeroes every gradient buffer, seeds the
    /// cost node's gradient with 1 and walks the nodes in reverse
    /// topological order, adding each operator's contributions into its
    /// children's gradients. By the time a node is processed, every parent
    /// consuming it has already deposited its share, which is what makes
    /// fan-out gradients exact.
    pub fn backward(&mut self) {
        blas::fill(0.0, &mut self.variable_gradients);
        for node in &mut self.graph.nodes {
            if let Some(Buffer::Owned(g)) = &mut node.grad {
                blas::fill(0.0, g);
            }
        }
        self.seed_cost_gradient(1.0);
        for i in (0..self.graph.nodes.len()).rev() {
            let node = &self.graph.nodes[i];
            if node.grad.is_none() {
                continue;
            }
            let Some(op) = node.kind.as_op().cloned() else {
                continue;
            };
            self.run_backward(i, &op);
        }
    }

    fn seed_cost_gradient(&mut self, value: f32) {
        match &mut self.graph.nodes[self.cost_index].grad {
            Some(Buffer::Owned(g)) => g[0] = value,
            Some(Buffer::VariableGrads { offset, .. }) => self.variable_gradients[*offset] = value,
            _ => {} // cost with no gradient flow: nothing to do
        }
    }

    fn run_backward(&mut self, i: usize, op: &Op) {
        let children = self.graph.nodes[i].children.clone();
        let contributions = {
            let node = &self.graph.nodes[i];
            let grad = match node.grad.as_ref() {
                Some(Buffer::Owned(g)) => g.as_slice(),
                _ => unreachable!("operator gradients are owned"),
            };
            let output = resolve_values(&self.graph, &self.variables, &self.constants, i);
            let inputs = gather_operands(&self.graph, &self.variables, &self.constants, &children);
            let wants: Vec<bool> = children
                .iter()
                .map(|c| self.graph.nodes[c.0].requires_grad)
                .collect();
            op.backward(grad, &inputs, output, &node.aux, &wants, Mode::Train)
        };
        for (child, contribution) in children.iter().zip(contributions) {
            if let Some(delta) = contribution {
                self.accumulate_gradient(child.0, &delta);
            }
        }
    }

    fn accumulate_gradient(&mut self, idx: usize, delta: &[f32]) {
        match &mut self.graph.nodes[idx].grad {
            Some(Buffer::Owned(g)) => blas::axpy(1.0, delta, g),
            Some(Buffer::VariableGrads { offset, len }) => {
                blas::axpy(1.0, delta, &mut self.variable_gradients[*offset..*offset + *len]);
            }
            Some(Buffer::Variables { .. }) | Some(Buffer::Constants { .. }) => {
                unreachable!("gradients never alias the value arrays")
            }
            None => unreachable!("contribution produced for a non-receiving child"),
        }
    }
}

fn resolve_values<'a>(
    graph: &'a Graph,
    variables: &'a [f32],
    constants: &'a [f32],
    idx: usize,
) -> &'a [f32] {
    match &graph.nodes[idx].values {
        Buffer::Owned(v) => v,
        Buffer::Variables { offset, len } => &variables[*offset..*offset + *len],
        Buffer::Constants { offset, len } => &constants[*offset..*offset + *len],
        Buffer::VariableGrads { .. } => unreachable!("values never alias the gradient array"),
    }
}

fn gather_operands<'a>(
    graph: &'a Graph,
    variables: &'a [f32],
    constants: &'a [f32],
    children: &[NodeId],
) -> Vec<OperandRef<'a>> {
    children
        .iter()
        .map(|&c| OperandRef {
            values: resolve_values(graph, variables, constants, c.0),
            shape: graph.nodes[c.0].shape.as_slice(),
        })
        .collect()
}
