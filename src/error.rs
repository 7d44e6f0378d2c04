//! Error types for the autograd core.

use thiserror::Error;

/// Errors raised while building or differentiating a computation graph.
///
/// The fluent [`Var`](crate::Var) API turns these into panics carrying the
/// same message; the `try_*` entry points hand them back to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AutogradError {
    /// Wrong number of inputs supplied to an operator with fixed arity.
    #[error("arity mismatch in {op}: expected {expected} inputs, got {actual}")]
    Arity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Input count outside the range an operator accepts.
    #[error("arity mismatch in {op}: expected {min} to {max} inputs, got {actual}")]
    ArityRange {
        op: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },

    /// A gradient whose shape disagrees with the node's value.
    #[error("gradient shape mismatch: value has shape {expected:?}, gradient has shape {actual:?}")]
    GradShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// An operator's backward returned the wrong number of gradients.
    #[error("{op} returned {actual} gradients for {expected} inputs")]
    BackwardArity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A node value that violates the tensor data model.
    #[error("invalid tensor value: {0}")]
    InvalidValue(String),

    /// A shape that cannot be broadcast to a given target shape.
    #[error("cannot broadcast shape {from:?} to {to:?}")]
    Broadcast { from: Vec<usize>, to: Vec<usize> },

    /// Two operand shapes with no common broadcast shape.
    #[error("shapes {lhs:?} and {rhs:?} are not broadcast-compatible")]
    BroadcastIncompatible { lhs: Vec<usize>, rhs: Vec<usize> },

    /// An operator-specific shape contract was not met.
    #[error("{op}: {why}")]
    Shape { op: &'static str, why: String },

    /// A handle that refers to a node dropped by [`Graph::rewind`](crate::Graph::rewind).
    #[error("node {0} no longer exists in the graph")]
    StaleNode(usize),

    /// A [`Mark`](crate::Mark) from another graph, or one whose position was
    /// already dropped by an earlier rewind.
    #[error("mark does not match the current state of this graph")]
    StaleMark,

    /// A handle passed to a graph other than the one that created it.
    #[error("node {0} belongs to a different graph")]
    ForeignNode(usize),

    /// Analytic and numeric gradients disagree.
    #[error(
        "gradient check failed for input {input} at element {index}: analytic {analytic}, numeric {numeric}"
    )]
    GradCheck {
        input: usize,
        index: usize,
        analytic: f32,
        numeric: f32,
    },
}

/// Shorthand result type used throughout the crate.
pub type Result<T> = std::result::Result<T, AutogradError>;
