//! A small reverse-mode automatic differentiation engine over `ndarray`
//! tensors.
//!
//! Values live in a [`Graph`] arena and are manipulated through copyable
//! [`Var`] handles. Every operator evaluates eagerly; in training mode it also
//! records a link from its output back to its inputs, and
//! [`Var::backward`] walks those links to fill in gradients.
//!
//! ```
//! use tensor_autograd::Graph;
//!
//! let g = Graph::new();
//! let x = g.scalar(5.0);
//! let y = g.scalar(2.0);
//! let z = x.square() + y;
//! z.backward();
//! assert_eq!(x.grad().unwrap().sum(), 10.0);
//! assert_eq!(y.grad().unwrap().sum(), 1.0);
//! ```

pub mod array;
pub mod autograd;
pub mod error;
pub mod gradcheck;
pub mod graph;
pub mod nn;
pub mod ops;
pub mod variable;

pub use array::Array;
pub use autograd::{AutogradEngine, Traversal};
pub use error::{AutogradError, Result};
pub use graph::{Graph, GraphConfig, Mark, ModeGuard, NodeId, OpInfo};
pub use variable::Var;
