//! [`Var`], the user-facing handle to a node.

use std::fmt;

use crate::array::Array;
use crate::autograd::{AutogradEngine, Traversal};
use crate::error::Result;
use crate::graph::{Graph, NodeId, OpInfo};
use crate::ops::{
    Add, Affine, BroadcastTo, Div, Exp, Log, MatMul, Mean, MeanSquaredError, Mul, Neg, Pow, ReLU,
    Reshape, Scale, Sigmoid, SoftmaxCrossEntropy, Square, Sub, Sum, SumAxis, Tanh, Transpose,
};

/// A differentiable value living in a [`Graph`].
///
/// `Var` is a copyable handle; the value, gradient and producer link are
/// stored in the graph's arena. Operator methods evaluate immediately and, in
/// training mode, record how the result was produced.
///
/// The accessors panic if the node was dropped by [`Graph::rewind`]; the
/// `try_*` variants return the error instead.
#[derive(Clone, Copy)]
pub struct Var<'g> {
    graph: &'g Graph,
    id: NodeId,
}

fn fail<T>(r: Result<T>) -> T {
    r.unwrap_or_else(|e| panic!("{e}"))
}

impl<'g> Var<'g> {
    pub(crate) fn new(graph: &'g Graph, id: NodeId) -> Self {
        Var { graph, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// A copy of the node's value.
    pub fn value(&self) -> Array {
        fail(self.try_value())
    }

    pub fn try_value(&self) -> Result<Array> {
        self.graph.value(self.id)
    }

    /// Runs `f` on the value without copying it.
    ///
    /// `f` must not build new nodes on the same graph.
    pub fn with_value<R>(&self, f: impl FnOnce(&Array) -> R) -> R {
        fail(self.graph.with_value(self.id, f))
    }

    /// Replaces the value, e.g. after an optimizer step. The shape must not change.
    pub fn set_value(&self, value: Array) {
        fail(self.graph.set_value(self.id, value))
    }

    pub fn shape(&self) -> Vec<usize> {
        fail(self.graph.shape(self.id))
    }

    /// The first element of the value; convenient for scalar losses.
    pub fn item(&self) -> f32 {
        self.with_value(|v| v.iter().next().copied().unwrap_or(f32::NAN))
    }

    pub fn grad(&self) -> Option<Array> {
        fail(self.graph.grad(self.id))
    }

    /// Stores `grad` as this node's gradient.
    ///
    /// If the node does not require grad the slot is cleared instead, so
    /// callers must not assume the gradient was kept.
    ///
    /// # Panics
    ///
    /// Panics if `grad`'s shape differs from the value's shape.
    pub fn set_grad(&self, grad: Array) {
        fail(self.try_set_grad(grad))
    }

    pub fn try_set_grad(&self, grad: Array) -> Result<()> {
        self.graph.set_grad(self.id, grad)
    }

    /// Adds `grad` to the stored gradient (or stores it if there is none).
    pub fn accumulate_grad(&self, grad: Array) {
        fail(self.graph.accumulate_grad(self.id, grad))
    }

    pub fn clear_grad(&self) {
        fail(self.graph.clear_grad(self.id))
    }

    pub fn requires_grad(&self) -> bool {
        fail(self.graph.requires_grad(self.id))
    }

    /// Freezing a node also drops any gradient it holds.
    pub fn set_requires_grad(&self, requires_grad: bool) {
        fail(self.graph.set_requires_grad(self.id, requires_grad))
    }

    pub fn name(&self) -> Option<String> {
        fail(self.graph.name(self.id))
    }

    pub fn set_name(&self, name: impl Into<String>) {
        fail(self.graph.set_name(self.id, Some(name.into())))
    }

    /// True when the node has no producer: an input, constant, parameter, or
    /// a node that was detached.
    pub fn is_leaf(&self) -> bool {
        fail(self.graph.producer(self.id)).is_none()
    }

    pub fn producer(&self) -> Option<OpInfo> {
        fail(self.graph.producer_info(self.id))
    }

    /// Fills in `grad` on every ancestor that requires it, using the graph's
    /// configured traversal.
    ///
    /// # Panics
    ///
    /// Panics on a gradient shape mismatch or when an operator returns the
    /// wrong number of gradients.
    pub fn backward(&self) {
        fail(self.try_backward())
    }

    pub fn try_backward(&self) -> Result<()> {
        AutogradEngine::new(self.graph.config().traversal).backward(*self)
    }

    pub fn backward_with(&self, traversal: Traversal) {
        fail(AutogradEngine::new(traversal).backward(*self))
    }

    /// Cuts this node and everything feeding it out of the graph. Later
    /// backward passes from this node stop here.
    pub fn detach(&self) {
        fail(AutogradEngine::default().detach(*self))
    }

    /// A new leaf holding a copy of the value. The original node keeps its links.
    pub fn detached(&self) -> Var<'g> {
        let requires_grad = self.requires_grad();
        self.graph.tensor(self.value(), requires_grad)
    }

    fn unary<O: crate::ops::Operation + 'static>(self, op: O) -> Var<'g> {
        self.graph.apply(op, &[self])
    }

    fn binary<O: crate::ops::Operation + 'static>(self, op: O, other: Var<'g>) -> Var<'g> {
        self.graph.apply(op, &[self, other])
    }

    /// Adds two nodes, broadcasting either operand.
    pub fn add(self, other: Var<'g>) -> Var<'g> {
        self.binary(Add::default(), other)
    }

    pub fn sub(self, other: Var<'g>) -> Var<'g> {
        self.binary(Sub::default(), other)
    }

    pub fn mul(self, other: Var<'g>) -> Var<'g> {
        self.binary(Mul::default(), other)
    }

    pub fn div(self, other: Var<'g>) -> Var<'g> {
        self.binary(Div::default(), other)
    }

    pub fn neg(self) -> Var<'g> {
        self.unary(Neg)
    }

    pub fn scale(self, factor: f32) -> Var<'g> {
        self.unary(Scale(factor))
    }

    pub fn pow(self, exponent: f32) -> Var<'g> {
        self.unary(Pow::new(exponent))
    }

    pub fn square(self) -> Var<'g> {
        self.unary(Square::default())
    }

    pub fn exp(self) -> Var<'g> {
        self.unary(Exp::default())
    }

    pub fn log(self) -> Var<'g> {
        self.unary(Log::default())
    }

    pub fn relu(self) -> Var<'g> {
        self.unary(ReLU::default())
    }

    pub fn sigmoid(self) -> Var<'g> {
        self.unary(Sigmoid::default())
    }

    pub fn tanh(self) -> Var<'g> {
        self.unary(Tanh::default())
    }

    /// Sum of all elements, as a rank-0 node.
    pub fn sum(self) -> Var<'g> {
        self.unary(Sum::default())
    }

    pub fn sum_axis(self, axis: usize, keep_dims: bool) -> Var<'g> {
        self.unary(SumAxis::new(axis, keep_dims))
    }

    pub fn mean(self) -> Var<'g> {
        self.unary(Mean::default())
    }

    pub fn broadcast_to(self, shape: &[usize]) -> Var<'g> {
        self.unary(BroadcastTo::new(shape.to_vec()))
    }

    pub fn reshape(self, shape: &[usize]) -> Var<'g> {
        self.unary(Reshape::new(shape.to_vec()))
    }

    /// Reverses the axes; a matrix transpose for 2-D nodes.
    pub fn transpose(self) -> Var<'g> {
        self.unary(Transpose::new(None))
    }

    pub fn permute(self, axes: &[usize]) -> Var<'g> {
        self.unary(Transpose::new(Some(axes.to_vec())))
    }

    pub fn matmul(self, other: Var<'g>) -> Var<'g> {
        self.binary(MatMul::default(), other)
    }

    /// `self · weight + bias`, with `self` as a `(batch, in)` matrix.
    pub fn affine(self, weight: Var<'g>, bias: Option<Var<'g>>) -> Var<'g> {
        match bias {
            Some(b) => self.graph.apply(Affine::default(), &[self, weight, b]),
            None => self.graph.apply(Affine::default(), &[self, weight]),
        }
    }

    pub fn mse(self, target: Var<'g>) -> Var<'g> {
        self.binary(MeanSquaredError::default(), target)
    }

    /// Cross-entropy of `self` as `(N, C)` logits against one-hot rows or class indices.
    pub fn softmax_cross_entropy(self, target: Var<'g>) -> Var<'g> {
        self.binary(SoftmaxCrossEntropy::default(), target)
    }
}

impl PartialEq for Var<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.graph, other.graph) && self.id == other.id
    }
}

impl Eq for Var<'_> {}

impl fmt::Debug for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Var");
        s.field("id", &self.id.index());
        if let Ok(Some(name)) = self.graph.name(self.id) {
            s.field("name", &name);
        }
        match self.graph.shape(self.id) {
            Ok(shape) => s.field("shape", &shape),
            Err(_) => s.field("stale", &true),
        };
        s.finish()
    }
}

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident) => {
        impl<'g> std::ops::$trait for Var<'g> {
            type Output = Var<'g>;

            fn $method(self, rhs: Var<'g>) -> Var<'g> {
                Var::$method(self, rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add);
impl_binary_operator!(Sub, sub);
impl_binary_operator!(Mul, mul);
impl_binary_operator!(Div, div);

impl<'g> std::ops::Neg for Var<'g> {
    type Output = Var<'g>;

    fn neg(self) -> Var<'g> {
        Var::neg(self)
    }
}
