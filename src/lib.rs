//! # Gradix
//!
//! Gradix is a lightweight, CPU-based automatic differentiation engine for
//! training feed-forward neural networks in Rust.
//!
//! ## Features
//!
//! - Reverse-mode automatic differentiation over a static computation graph
//! - Arena-allocated nodes, acyclic by construction
//! - Flattened parameter storage for optimizer-friendly updates
//! - Dense, dropout and layer-norm layer constructors with fused cost heads
//! - Binary model serialization with bit-exact round trips
//! - SGD, RMSProp and Adam steppers
//! - Written 100% in safe Rust
//!
//! ## Quick start
//!
//! ```
//! use gradix::{CostKind, GraphBuilder, Mode, Network, Optimizer, Sgd, layers};
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let mut g = GraphBuilder::new();
//! let x = layers::input(&mut g, 4, 2).unwrap();
//! let h = layers::dense(&mut g, x, 1, &mut rng).unwrap();
//! let loss = layers::cost(&mut g, h, CostKind::L2).unwrap();
//!
//! let mut net = Network::new(g, loss).unwrap();
//! net.feed_input(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0]).unwrap();
//! net.feed_truth(&[0.0, 1.0, 1.0, 0.0]).unwrap();
//!
//! let mut opt = Optimizer::Sgd(Sgd::new(0.1));
//! for _ in 0..10 {
//!     net.forward(Mode::Train);
//!     net.backward();
//!     opt.step_network(&mut net);
//! }
//! ```

pub mod blas;
pub mod error;
pub mod graph;
pub mod initializers;
pub mod layers;
pub mod network;
pub mod ops;
pub mod optim;
pub mod serialize;
pub mod shape;

pub use error::{GradixError, Result};
pub use graph::{Graph, GraphBuilder, Node, NodeId, NodeKind};
pub use layers::CostKind;
pub use network::Network;
pub use ops::{Mode, Op};
pub use optim::{Adam, Optimizer, RmsProp, Sgd};
