pub mod builder;
pub mod node;
mod tests;

pub use builder::{Graph, GraphBuilder};
pub use node::{Buffer, Node, NodeId, NodeKind};
