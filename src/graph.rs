//! The computation graph: an arena of nodes and operator records.
//!
//! Nodes and operators live in two vectors owned by a [`Graph`]; the links
//! between them (node to producer, operator to inputs and output) are indices.
//! Truncating the graph clears an index, and [`Graph::rewind`] drops whole
//! suffixes of the arena between training iterations.

use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};

use crate::array::{self, Array};
use crate::autograd::Traversal;
use crate::error::{AutogradError, Result};
use crate::ops::{Arity, Operation};
use crate::variable::Var;

/// Identifies a node in a [`Graph`].
///
/// The serial number is never reused, so a handle to a node dropped by
/// [`Graph::rewind`] is detected instead of aliasing a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    serial: u64,
}

impl NodeId {
    /// Position of the node in the arena.
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OpId(usize);

/// A read-only view of the operator that produced a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpInfo {
    pub name: &'static str,
    pub inputs: Vec<NodeId>,
    pub output: NodeId,
}

struct Node {
    serial: u64,
    value: Array,
    grad: Option<Array>,
    producer: Option<OpId>,
    requires_grad: bool,
    name: Option<String>,
}

struct OpRecord {
    name: &'static str,
    // Taken when the output is detached, which frees the saved tensors.
    op: Option<Box<dyn Operation>>,
    inputs: Vec<NodeId>,
    output: NodeId,
}

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(0);

struct Tape {
    graph_id: u64,
    nodes: Vec<Node>,
    ops: Vec<OpRecord>,
    next_serial: u64,
}

impl Default for Tape {
    fn default() -> Self {
        Tape {
            graph_id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            ops: Vec::new(),
            next_serial: 0,
        }
    }
}

impl Tape {
    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.index)
            .filter(|n| n.serial == id.serial)
            .ok_or(AutogradError::StaleNode(id.index))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.index)
            .filter(|n| n.serial == id.serial)
            .ok_or(AutogradError::StaleNode(id.index))
    }

    /// The operator recorded as the producer of `owner`.
    ///
    /// A slot that is gone, or that now belongs to another output, means
    /// `owner` outlived a rewind.
    fn op(&self, op: OpId, owner: NodeId) -> Result<&OpRecord> {
        self.ops
            .get(op.0)
            .filter(|r| r.output == owner)
            .ok_or(AutogradError::StaleNode(owner.index))
    }

    fn op_mut(&mut self, op: OpId, owner: NodeId) -> Result<&mut OpRecord> {
        self.ops
            .get_mut(op.0)
            .filter(|r| r.output == owner)
            .ok_or(AutogradError::StaleNode(owner.index))
    }

    /// True if nothing below `mark` was dropped and rebuilt since it was taken.
    fn holds(&self, mark: &Mark) -> bool {
        if mark.graph_id != self.graph_id
            || self.nodes.len() < mark.nodes
            || self.ops.len() < mark.ops
        {
            return false;
        }
        // Serials grow with the index, so checking the last kept slot is enough.
        let nodes_ok = mark.nodes == 0 || self.nodes[mark.nodes - 1].serial < mark.serial;
        let ops_ok = mark.ops == 0 || self.ops[mark.ops - 1].output.serial < mark.serial;
        nodes_ok && ops_ok
    }

    fn push_node(&mut self, value: Array, requires_grad: bool, name: Option<String>) -> NodeId {
        let id = NodeId {
            index: self.nodes.len(),
            serial: self.next_serial,
        };
        self.next_serial += 1;
        self.nodes.push(Node {
            serial: id.serial,
            value,
            grad: None,
            producer: None,
            requires_grad,
            name,
        });
        id
    }
}

/// Settings fixed at graph construction, mutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphConfig {
    /// Record operator links during forward evaluation.
    pub training: bool,
    /// Traversal used by [`Var::backward`].
    pub traversal: Traversal,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            training: true,
            traversal: Traversal::Topological,
        }
    }
}

impl GraphConfig {
    #[must_use]
    pub fn training(mut self, training: bool) -> Self {
        self.training = training;
        self
    }

    #[must_use]
    pub fn traversal(mut self, traversal: Traversal) -> Self {
        self.traversal = traversal;
        self
    }
}

/// Restores the previous training mode when dropped.
#[must_use = "the mode is restored as soon as the guard is dropped"]
pub struct ModeGuard<'g> {
    graph: &'g Graph,
    previous: bool,
}

impl Drop for ModeGuard<'_> {
    fn drop(&mut self) {
        self.graph.set_training(self.previous);
    }
}

/// A position in the arena returned by [`Graph::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    graph_id: u64,
    nodes: usize,
    ops: usize,
    serial: u64,
}

/// Owns every node and operator of one computation graph.
///
/// A graph is single-threaded: it is `Send`, so it can be built on a worker
/// thread, but not `Sync`. Threads that train in parallel need one graph each.
#[derive(Default)]
pub struct Graph {
    tape: RefCell<Tape>,
    config: Cell<GraphConfig>,
}

impl Graph {
    /// Creates an empty graph in training mode.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Graph {
            tape: RefCell::new(Tape::default()),
            config: Cell::new(config),
        }
    }

    pub fn config(&self) -> GraphConfig {
        self.config.get()
    }

    pub fn is_training(&self) -> bool {
        self.config.get().training
    }

    /// Switches graph recording on or off. Flip it between batches, never in
    /// the middle of building an expression.
    pub fn set_training(&self, training: bool) {
        let config = self.config.get();
        if config.training != training {
            debug!("graph mode: {}", if training { "training" } else { "inference" });
        }
        self.config.set(config.training(training));
    }

    pub fn set_traversal(&self, traversal: Traversal) {
        self.config.set(self.config.get().traversal(traversal));
    }

    /// Inference mode until the guard is dropped.
    pub fn no_grad(&self) -> ModeGuard<'_> {
        self.scoped_mode(false)
    }

    /// Training mode until the guard is dropped.
    pub fn train_mode(&self) -> ModeGuard<'_> {
        self.scoped_mode(true)
    }

    fn scoped_mode(&self, training: bool) -> ModeGuard<'_> {
        let previous = self.is_training();
        self.set_training(training);
        ModeGuard {
            graph: self,
            previous,
        }
    }

    /// Creates a leaf node.
    pub fn tensor(&self, value: Array, requires_grad: bool) -> Var<'_> {
        let id = self.tape.borrow_mut().push_node(value, requires_grad, None);
        Var::new(self, id)
    }

    /// A trainable leaf.
    pub fn param(&self, value: Array) -> Var<'_> {
        self.tensor(value, true)
    }

    /// A leaf that never receives a gradient.
    pub fn constant(&self, value: Array) -> Var<'_> {
        self.tensor(value, false)
    }

    pub fn scalar(&self, value: f32) -> Var<'_> {
        self.tensor(array::scalar(value), true)
    }

    /// A leaf carrying a diagnostic label.
    pub fn named(&self, name: impl Into<String>, value: Array, requires_grad: bool) -> Var<'_> {
        let id = self
            .tape
            .borrow_mut()
            .push_node(value, requires_grad, Some(name.into()));
        Var::new(self, id)
    }

    /// Creates a leaf from a row-major buffer; fails if the buffer does not
    /// fill `shape` exactly.
    pub fn from_shape_vec(&self, shape: &[usize], data: Vec<f32>, requires_grad: bool) -> Result<Var<'_>> {
        Ok(self.tensor(array::from_shape_vec(shape, data)?, requires_grad))
    }

    pub fn zeros(&self, shape: &[usize], requires_grad: bool) -> Var<'_> {
        self.tensor(array::zeros(shape), requires_grad)
    }

    pub fn ones(&self, shape: &[usize], requires_grad: bool) -> Var<'_> {
        self.tensor(array::ones(shape), requires_grad)
    }

    /// Applies an operation to a set of input nodes.
    ///
    /// This is the primary way that computation graphs are constructed.
    ///
    /// # Panics
    ///
    /// Panics with the message of the [`AutogradError`] returned by
    /// [`Graph::try_apply`].
    pub fn apply<'g, O: Operation + 'static>(&'g self, op: O, inputs: &[Var<'g>]) -> Var<'g> {
        self.try_apply(op, inputs)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Validates arity, runs `forward` and wraps the result in a new node.
    /// The new node is linked to `op` only in training mode.
    pub fn try_apply<'g, O: Operation + 'static>(&'g self, mut op: O, inputs: &[Var<'g>]) -> Result<Var<'g>> {
        let name = op.name();
        match op.arity() {
            Arity::Fixed(expected) if expected != inputs.len() => {
                return Err(AutogradError::Arity {
                    op: name,
                    expected,
                    actual: inputs.len(),
                });
            }
            Arity::Range { min, max } if !(min..=max).contains(&inputs.len()) => {
                return Err(AutogradError::ArityRange {
                    op: name,
                    min,
                    max,
                    actual: inputs.len(),
                });
            }
            _ => {}
        }
        for input in inputs {
            if !std::ptr::eq(input.graph(), self) {
                return Err(AutogradError::ForeignNode(input.id().index()));
            }
        }
        let ids: Vec<NodeId> = inputs.iter().map(|v| v.id()).collect();

        let (value, requires_grad) = {
            let tape = self.tape.borrow();
            let mut payloads = Vec::with_capacity(ids.len());
            let mut requires_grad = false;
            for &id in &ids {
                let node = tape.node(id)?;
                requires_grad |= node.requires_grad;
                payloads.push(&node.value);
            }
            (op.forward(&payloads)?, requires_grad)
        };

        let mut tape = self.tape.borrow_mut();
        let output = tape.push_node(value, requires_grad, None);
        if self.is_training() {
            let op_id = OpId(tape.ops.len());
            tape.ops.push(OpRecord {
                name,
                op: Some(Box::new(op)),
                inputs: ids,
                output,
            });
            tape.node_mut(output)?.producer = Some(op_id);
            trace!("{name}: recorded op {} -> node {}", op_id.0, output.index);
        } else {
            trace!("{name}: inference node {}", output.index);
        }
        Ok(Var::new(self, output))
    }

    /// Remembers the current end of the arena.
    pub fn mark(&self) -> Mark {
        let tape = self.tape.borrow();
        Mark {
            graph_id: tape.graph_id,
            nodes: tape.nodes.len(),
            ops: tape.ops.len(),
            serial: tape.next_serial,
        }
    }

    /// Drops every node and operator created after `mark`.
    ///
    /// Handles to dropped nodes become stale; using them fails with
    /// [`AutogradError::StaleNode`]. Nodes created before the mark, typically
    /// parameters, keep their values and gradients.
    ///
    /// Fails with [`AutogradError::StaleMark`] if `mark` came from another
    /// graph, or if an earlier rewind already dropped part of what it covers.
    pub fn rewind(&self, mark: Mark) -> Result<()> {
        let mut tape = self.tape.borrow_mut();
        if !tape.holds(&mark) {
            return Err(AutogradError::StaleMark);
        }
        let dropped = tape.nodes.len().saturating_sub(mark.nodes);
        tape.nodes.truncate(mark.nodes);
        tape.ops.truncate(mark.ops);
        debug!("rewind: dropped {dropped} nodes");
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.tape.borrow().nodes.len()
    }

    pub fn op_count(&self) -> usize {
        self.tape.borrow().ops.len()
    }

    /// Renders the graph reachable from `root` in Graphviz dot format.
    pub fn to_dot(&self, root: Var<'_>) -> Result<String> {
        let tape = self.tape.borrow();
        let mut out = String::from("digraph autograd {\n");
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![root.id()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let node = tape.node(id)?;
            let label = match &node.name {
                Some(name) => escape_dot(name),
                None => format!("#{}", id.index),
            };
            let _ = writeln!(out, "  n{} [label=\"{} {:?}\"];", id.index, label, node.value.shape());
            if let Some(op_id) = node.producer {
                let record = tape.op(op_id, id)?;
                let _ = writeln!(out, "  o{} [shape=box, label=\"{}\"];", op_id.0, record.name);
                let _ = writeln!(out, "  o{} -> n{};", op_id.0, record.output.index);
                for input in &record.inputs {
                    let _ = writeln!(out, "  n{} -> o{};", input.index, op_id.0);
                    stack.push(*input);
                }
            }
        }
        out.push_str("}\n");
        Ok(out)
    }

    // Node accessors used by `Var` and the autograd engine.

    pub(crate) fn value(&self, id: NodeId) -> Result<Array> {
        Ok(self.tape.borrow().node(id)?.value.clone())
    }

    pub(crate) fn shape(&self, id: NodeId) -> Result<Vec<usize>> {
        Ok(self.tape.borrow().node(id)?.value.shape().to_vec())
    }

    pub(crate) fn with_value<R>(&self, id: NodeId, f: impl FnOnce(&Array) -> R) -> Result<R> {
        Ok(f(&self.tape.borrow().node(id)?.value))
    }

    pub(crate) fn set_value(&self, id: NodeId, value: Array) -> Result<()> {
        let mut tape = self.tape.borrow_mut();
        let node = tape.node_mut(id)?;
        if node.value.shape() != value.shape() {
            return Err(AutogradError::InvalidValue(format!(
                "replacement value has shape {:?}, node has shape {:?}",
                value.shape(),
                node.value.shape()
            )));
        }
        node.value = value;
        Ok(())
    }

    pub(crate) fn grad(&self, id: NodeId) -> Result<Option<Array>> {
        Ok(self.tape.borrow().node(id)?.grad.clone())
    }

    pub(crate) fn has_grad(&self, id: NodeId) -> Result<bool> {
        Ok(self.tape.borrow().node(id)?.grad.is_some())
    }

    /// Stores `grad`, or clears the slot if the node does not require grad.
    pub(crate) fn set_grad(&self, id: NodeId, grad: Array) -> Result<()> {
        let mut tape = self.tape.borrow_mut();
        let node = tape.node_mut(id)?;
        check_grad_shape(&node.value, &grad)?;
        node.grad = if node.requires_grad { Some(grad) } else { None };
        Ok(())
    }

    pub(crate) fn accumulate_grad(&self, id: NodeId, grad: Array) -> Result<()> {
        let mut tape = self.tape.borrow_mut();
        let node = tape.node_mut(id)?;
        check_grad_shape(&node.value, &grad)?;
        node.grad = match (node.requires_grad, node.grad.take()) {
            (false, _) => None,
            (true, Some(existing)) => Some(existing + &grad),
            (true, None) => Some(grad),
        };
        Ok(())
    }

    pub(crate) fn clear_grad(&self, id: NodeId) -> Result<()> {
        self.tape.borrow_mut().node_mut(id)?.grad = None;
        Ok(())
    }

    pub(crate) fn requires_grad(&self, id: NodeId) -> Result<bool> {
        Ok(self.tape.borrow().node(id)?.requires_grad)
    }

    pub(crate) fn set_requires_grad(&self, id: NodeId, requires_grad: bool) -> Result<()> {
        let mut tape = self.tape.borrow_mut();
        let node = tape.node_mut(id)?;
        node.requires_grad = requires_grad;
        if !requires_grad {
            node.grad = None;
        }
        Ok(())
    }

    pub(crate) fn name(&self, id: NodeId) -> Result<Option<String>> {
        Ok(self.tape.borrow().node(id)?.name.clone())
    }

    pub(crate) fn set_name(&self, id: NodeId, name: Option<String>) -> Result<()> {
        self.tape.borrow_mut().node_mut(id)?.name = name;
        Ok(())
    }

    pub(crate) fn producer(&self, id: NodeId) -> Result<Option<OpId>> {
        Ok(self.tape.borrow().node(id)?.producer)
    }

    pub(crate) fn producer_info(&self, id: NodeId) -> Result<Option<OpInfo>> {
        let tape = self.tape.borrow();
        let Some(op_id) = tape.node(id)?.producer else {
            return Ok(None);
        };
        let record = tape.op(op_id, id)?;
        Ok(Some(OpInfo {
            name: record.name,
            inputs: record.inputs.clone(),
            output: record.output,
        }))
    }

    /// Inputs of the operator that produced `id`.
    pub(crate) fn op_inputs(&self, id: NodeId, op: OpId) -> Result<Vec<NodeId>> {
        Ok(self.tape.borrow().op(op, id)?.inputs.clone())
    }

    /// Runs the local backward of `op` and pairs each gradient with its input.
    ///
    /// A gradient count that differs from the input count is an operator bug.
    pub(crate) fn op_backward(
        &self,
        id: NodeId,
        op: OpId,
        output_grad: &Array,
    ) -> Result<Vec<(NodeId, Array)>> {
        let tape = self.tape.borrow();
        let record = tape.op(op, id)?;
        let Some(operation) = record.op.as_ref() else {
            // Only detached outputs lose their operator, and those have no producer.
            return Ok(Vec::new());
        };
        let grads = operation.backward(output_grad);
        if grads.len() != record.inputs.len() {
            return Err(AutogradError::BackwardArity {
                op: record.name,
                expected: record.inputs.len(),
                actual: grads.len(),
            });
        }
        Ok(record.inputs.iter().copied().zip(grads).collect())
    }

    /// Clears the producer link of `id`, releasing the operator's saved
    /// state, and returns the operator's inputs.
    pub(crate) fn unlink(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut tape = self.tape.borrow_mut();
        let Some(op_id) = tape.node_mut(id)?.producer.take() else {
            return Ok(Vec::new());
        };
        let record = tape.op_mut(op_id, id)?;
        record.op = None;
        Ok(record.inputs.clone())
    }
}

fn escape_dot(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

fn check_grad_shape(value: &Array, grad: &Array) -> Result<()> {
    if value.shape() != grad.shape() {
        return Err(AutogradError::GradShape {
            expected: value.shape().to_vec(),
            actual: grad.shape().to_vec(),
        });
    }
    Ok(())
}
