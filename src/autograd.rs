//! Reverse-mode traversal and graph truncation.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::array::{self, Array};
use crate::error::{AutogradError, Result};
use crate::graph::{Graph, NodeId};
use crate::variable::Var;

/// How [`AutogradEngine::backward`] walks the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Depth-first recursion. Each path into a node overwrites its gradient,
    /// so a node used twice in one expression keeps only the last path.
    Recursive,
    /// Same visiting order and overwrite semantics as `Recursive`, driven by
    /// an explicit stack so deep unrolled graphs cannot exhaust the call stack.
    Stack,
    /// Visits each node once in reverse topological order and sums the
    /// gradients of every path reaching it.
    #[default]
    Topological,
}

/// The `AutogradEngine` is responsible for orchestrating the backward pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutogradEngine {
    traversal: Traversal,
}

impl AutogradEngine {
    pub fn new(traversal: Traversal) -> Self {
        AutogradEngine { traversal }
    }

    pub fn traversal(&self) -> Traversal {
        self.traversal
    }

    /// Starts the backpropagation process from a given node.
    ///
    /// A root that does not require grad is left untouched. Otherwise a root
    /// without a gradient is seeded with ones shaped like its value; a root
    /// that already holds one (a caller-supplied seed) propagates that.
    pub fn backward(&self, root: Var<'_>) -> Result<()> {
        let graph = root.graph();
        let id = root.id();
        if !graph.requires_grad(id)? {
            return Ok(());
        }
        debug!("backward from node {} ({:?})", id.index(), self.traversal);
        match self.traversal {
            Traversal::Recursive => backward_recursive(graph, id),
            Traversal::Stack => backward_stack(graph, id),
            Traversal::Topological => backward_topological(graph, id),
        }
    }

    /// Severs the producer link of `root` and of every node feeding it.
    ///
    /// Safe to call repeatedly; leaves are untouched.
    pub fn detach(&self, root: Var<'_>) -> Result<()> {
        let graph = root.graph();
        let mut stack = vec![root.id()];
        let mut unlinked = 0usize;
        while let Some(id) = stack.pop() {
            let inputs = graph.unlink(id)?;
            if !inputs.is_empty() {
                unlinked += 1;
            }
            stack.extend(inputs);
        }
        debug!("detach from node {}: {unlinked} links cut", root.id().index());
        Ok(())
    }
}

fn seed(graph: &Graph, id: NodeId) -> Result<()> {
    if !graph.has_grad(id)? {
        let ones = array::ones(&graph.shape(id)?);
        graph.set_grad(id, ones)?;
    }
    Ok(())
}

fn backward_recursive(graph: &Graph, id: NodeId) -> Result<()> {
    if !graph.requires_grad(id)? {
        return Ok(());
    }
    seed(graph, id)?;
    let Some(op) = graph.producer(id)? else {
        return Ok(());
    };
    let Some(grad) = graph.grad(id)? else {
        return Ok(());
    };
    for (input, input_grad) in graph.op_backward(id, op, &grad)? {
        graph.set_grad(input, input_grad)?;
        backward_recursive(graph, input)?;
    }
    Ok(())
}

fn backward_stack(graph: &Graph, root: NodeId) -> Result<()> {
    let mut stack: Vec<(NodeId, Option<Array>)> = vec![(root, None)];
    while let Some((id, incoming)) = stack.pop() {
        if let Some(g) = incoming {
            graph.set_grad(id, g)?;
        }
        if !graph.requires_grad(id)? {
            continue;
        }
        seed(graph, id)?;
        let Some(op) = graph.producer(id)? else {
            continue;
        };
        let Some(grad) = graph.grad(id)? else {
            continue;
        };
        // Reversed so the first input is popped (and fully explored) first.
        for (input, input_grad) in graph.op_backward(id, op, &grad)?.into_iter().rev() {
            stack.push((input, Some(input_grad)));
        }
    }
    Ok(())
}

/// Post-order over the nodes reachable from `root` through nodes that
/// require grad: every node appears after all of its inputs.
fn topological_order(graph: &Graph, root: NodeId) -> Result<Vec<NodeId>> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        if !visited.insert(id) {
            continue;
        }
        stack.push((id, true));
        if !graph.requires_grad(id)? {
            continue;
        }
        if let Some(op) = graph.producer(id)? {
            for input in graph.op_inputs(id, op)? {
                if !visited.contains(&input) {
                    stack.push((input, false));
                }
            }
        }
    }
    Ok(order)
}

fn backward_topological(graph: &Graph, root: NodeId) -> Result<()> {
    let order = topological_order(graph, root)?;
    trace!("topological backward over {} nodes", order.len());

    let root_grad = match graph.grad(root)? {
        Some(g) => g,
        None => array::ones(&graph.shape(root)?),
    };
    let mut pending: HashMap<NodeId, Array> = HashMap::new();
    pending.insert(root, root_grad);

    for id in order.into_iter().rev() {
        let Some(grad) = pending.remove(&id) else {
            continue;
        };
        graph.set_grad(id, grad.clone())?;
        if !graph.requires_grad(id)? {
            continue;
        }
        let Some(op) = graph.producer(id)? else {
            continue;
        };
        for (input, input_grad) in graph.op_backward(id, op, &grad)? {
            let shape = graph.shape(input)?;
            if input_grad.shape() != shape.as_slice() {
                return Err(AutogradError::GradShape {
                    expected: shape,
                    actual: input_grad.shape().to_vec(),
                });
            }
            if !graph.requires_grad(input)? {
                graph.clear_grad(input)?;
                continue;
            }
            match pending.get_mut(&input) {
                Some(acc) => *acc += &input_grad,
                None => {
                    pending.insert(input, input_grad);
                }
            }
        }
    }
    Ok(())
}
