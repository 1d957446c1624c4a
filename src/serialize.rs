//! Binary network format.
//!
//! Layout, all integers and floats little-endian:
//!
//! ```text
//! magic     5 bytes  "GRADX"
//! u32       node count
//! u32       cost node index
//! per node, in topological order:
//!   u32 + bytes   canonical kind identifier
//!   u32 rank, u32 x rank   shape
//!   u32 count, u32 x count child indices (each < the node's own index)
//!   kind-specific params (see `write_params`)
//!   u8            output-marked flag
//! f32 x num_variables   variables array, flattening order
//! f32 x num_constants   constants array, flattening order
//! ```
//!
//! Loading trusts the encoded shapes (shape inference is not re-run),
//! reconstructs the node list, then re-runs the flattening pass over the raw
//! float blocks so every node's buffer views land on fresh arrays. A bad
//! magic tag, an unknown identifier, or a truncated file aborts the load
//! with no partial network.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::debug;

use crate::error::{GradixError, Result};
use crate::graph::{Buffer, Graph, Node, NodeId, NodeKind};
use crate::network::Network;
use crate::ops::Op;
use crate::shape;

const MAGIC: &[u8; 5] = b"GRADX";

impl Network {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.encode(&mut w)?;
        w.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut r = BufReader::new(File::open(path)?);
        Self::decode(&mut r)
    }

    pub fn encode(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(MAGIC)?;
        write_u32(w, self.graph.len() as u32)?;
        write_u32(w, self.cost_index as u32)?;
        for node in self.graph.nodes() {
            write_node(w, node)?;
        }
        write_f32s(w, &self.variables)?;
        write_f32s(w, &self.constants)?;
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 5];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(GradixError::BadMagic);
        }
        let count = read_u32(r)? as usize;
        let cost_index = read_u32(r)? as usize;
        if cost_index >= count {
            return Err(GradixError::MalformedFile(format!(
                "cost index {cost_index} out of range for {count} nodes"
            )));
        }
        let mut nodes = Vec::with_capacity(count);
        for i in 0..count {
            nodes.push(read_node(r, i)?);
        }

        let num_vars: usize = nodes
            .iter()
            .filter(|n| n.kind.is_variable())
            .map(Node::num_elements)
            .sum();
        let num_consts: usize = nodes
            .iter()
            .filter(|n| n.kind.is_constant())
            .map(Node::num_elements)
            .sum();
        let variables = read_f32s(r, num_vars)?;
        let constants = read_f32s(r, num_consts)?;
        debug!(
            "loaded topology: {count} nodes, {num_vars} variables, {num_consts} constants"
        );

        // hand each leaf its chunk back, then let the normal flattening pass
        // rebuild the arrays and views; the result is bit-identical
        let mut var_cursor = 0;
        let mut const_cursor = 0;
        for node in &mut nodes {
            let n = node.num_elements();
            if node.kind.is_variable() {
                node.values = Buffer::Owned(variables[var_cursor..var_cursor + n].to_vec());
                var_cursor += n;
            } else if node.kind.is_constant() {
                node.values = Buffer::Owned(constants[const_cursor..const_cursor + n].to_vec());
                const_cursor += n;
            }
        }

        let mut graph = Graph { nodes };
        graph.propagate_gradient_marks();
        let mut net = Network::from_graph(graph, cost_index);
        net.flatten();
        Ok(net)
    }
}

fn write_node(w: &mut impl Write, node: &Node) -> Result<()> {
    let name = match &node.kind {
        NodeKind::Input => "input",
        NodeKind::GroundTruth => "ground_truth",
        NodeKind::Variable => "variable",
        NodeKind::Constant => "constant",
        NodeKind::Op(op) => op.name(),
    };
    write_string(w, name)?;
    write_u32(w, node.shape.len() as u32)?;
    for &d in &node.shape {
        write_u32(w, d as u32)?;
    }
    write_u32(w, node.children.len() as u32)?;
    for child in &node.children {
        write_u32(w, child.0 as u32)?;
    }
    if let NodeKind::Op(op) = &node.kind {
        write_params(w, op)?;
    }
    w.write_all(&[node.is_output as u8])?;
    Ok(())
}

fn write_params(w: &mut impl Write, op: &Op) -> Result<()> {
    match op {
        Op::ReduceSum { axis } | Op::ReduceMean { axis } | Op::Concat { axis } => {
            write_u32(w, *axis as u32)
        }
        Op::Slice { axis, start, size } => {
            write_u32(w, *axis as u32)?;
            write_u32(w, *start as u32)?;
            write_u32(w, *size as u32)
        }
        Op::Dropout { rate } => {
            w.write_all(&rate.to_le_bytes())?;
            Ok(())
        }
        Op::Reshape { shape: target } => {
            write_u32(w, target.len() as u32)?;
            for &d in target {
                write_u32(w, d as u32)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn read_node(r: &mut impl Read, index: usize) -> Result<Node> {
    let name = read_string(r)?;
    let rank = read_u32(r)? as usize;
    let mut shape_dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        shape_dims.push(read_u32(r)? as usize);
    }
    let num_children = read_u32(r)? as usize;
    let mut children = Vec::with_capacity(num_children);
    for _ in 0..num_children {
        let child = read_u32(r)? as usize;
        if child >= index {
            return Err(GradixError::MalformedFile(format!(
                "node {index} references child {child} at or after itself"
            )));
        }
        children.push(NodeId(child));
    }

    let kind = match name.as_str() {
        "input" => NodeKind::Input,
        "ground_truth" => NodeKind::GroundTruth,
        "variable" => NodeKind::Variable,
        "constant" => NodeKind::Constant,
        _ => NodeKind::Op(read_op(r, &name)?),
    };
    if kind.is_placeholder() || kind.is_variable() || kind.is_constant() {
        if !children.is_empty() {
            return Err(GradixError::MalformedFile(format!(
                "leaf node {index} has children"
            )));
        }
    } else if let NodeKind::Op(op) = &kind {
        if !op.arity().accepts(children.len()) {
            return Err(GradixError::MalformedFile(format!(
                "node {index} ({}) has {} children",
                op.name(),
                children.len()
            )));
        }
    }

    let mut flag = [0u8; 1];
    r.read_exact(&mut flag)?;

    let n = shape::num_elements(&shape_dims);
    let mut node = match kind {
        NodeKind::Op(op) => Node::op(op, shape_dims, children),
        leaf => Node::leaf(leaf, shape_dims, vec![0.0; n]),
    };
    node.is_output = flag[0] != 0;
    Ok(node)
}

fn read_op(r: &mut impl Read, name: &str) -> Result<Op> {
    let op = match name {
        "add" => Op::Add,
        "sub" => Op::Sub,
        "mul" => Op::Mul,
        "square" => Op::Square,
        "max" => Op::Max,
        "avg" => Op::Avg,
        "select" => Op::Select,
        "dropout" => Op::Dropout {
            rate: read_f32(r)?,
        },
        "exp" => Op::Exp,
        "log" => Op::Log,
        "relu" => Op::Relu,
        "sigmoid" => Op::Sigmoid,
        "tanh" => Op::Tanh,
        "sin" => Op::Sin,
        "matmul" => Op::MatMul,
        "cmatmul" => Op::CMatMul,
        "reduce_sum" => Op::ReduceSum {
            axis: read_u32(r)? as usize,
        },
        "reduce_mean" => Op::ReduceMean {
            axis: read_u32(r)? as usize,
        },
        "softmax" => Op::Softmax,
        "normalize" => Op::Normalize,
        "l1_norm" => Op::L1Norm,
        "reshape" => {
            let rank = read_u32(r)? as usize;
            let mut target = Vec::with_capacity(rank);
            for _ in 0..rank {
                target.push(read_u32(r)? as usize);
            }
            Op::Reshape { shape: target }
        }
        "slice" => Op::Slice {
            axis: read_u32(r)? as usize,
            start: read_u32(r)? as usize,
            size: read_u32(r)? as usize,
        },
        "concat" => Op::Concat {
            axis: read_u32(r)? as usize,
        },
        "mse" => Op::Mse,
        "logistic_x_entropy" => Op::LogisticXent,
        "categorical_x_entropy" => Op::CategoricalXent,
        other => return Err(GradixError::UnknownOpName(other.to_string())),
    };
    Ok(op)
}

fn write_u32(w: &mut impl Write, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32(r: &mut impl Read) -> Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn write_string(w: &mut impl Write, s: &str) -> Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let len = read_u32(r)? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|_| GradixError::MalformedFile("identifier is not valid utf-8".to_string()))
}

fn write_f32s(w: &mut impl Write, values: &[f32]) -> Result<()> {
    for v in values {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

fn read_f32s(r: &mut impl Read, count: usize) -> Result<Vec<f32>> {
    let mut bytes = vec![0u8; count * 4];
    r.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
