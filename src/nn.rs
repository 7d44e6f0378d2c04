//! Minimal layers and optimizers built on the autograd core.

use std::collections::HashMap;

use log::trace;
use rand::Rng;

use crate::array::{self, Array};
use crate::error::Result;
use crate::graph::{Graph, NodeId};
use crate::variable::Var;

/// A trait for neural network modules.
pub trait Module<'g> {
    /// Performs a forward pass through the module.
    fn forward(&self, input: Var<'g>) -> Var<'g>;

    /// Returns the parameters of the module.
    fn parameters(&self) -> Vec<Var<'g>>;
}

/// A linear (fully connected) layer.
pub struct Linear<'g> {
    pub weight: Var<'g>,
    pub bias: Option<Var<'g>>,
}

impl<'g> Linear<'g> {
    /// Creates a new linear layer with weights drawn from
    /// `U(-1/sqrt(in), 1/sqrt(in))` and a zero bias.
    ///
    /// # Arguments
    ///
    /// * `in_features` - The number of input features.
    /// * `out_features` - The number of output features.
    /// * `bias` - Whether to include a bias term.
    pub fn new<R: Rng + ?Sized>(
        graph: &'g Graph,
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let weight = graph.named(
            "linear.weight",
            array::uniform(&[in_features, out_features], -bound, bound, rng)?,
            true,
        );
        let bias = bias.then(|| graph.named("linear.bias", array::zeros(&[out_features]), true));
        Ok(Linear { weight, bias })
    }
}

impl<'g> Module<'g> for Linear<'g> {
    fn forward(&self, input: Var<'g>) -> Var<'g> {
        input.affine(self.weight, self.bias)
    }

    fn parameters(&self) -> Vec<Var<'g>> {
        let mut params = vec![self.weight];
        params.extend(self.bias);
        params
    }
}

/// Parameter-free element-wise activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    ReLU,
    Sigmoid,
    Tanh,
}

impl<'g> Module<'g> for Activation {
    fn forward(&self, input: Var<'g>) -> Var<'g> {
        match self {
            Activation::ReLU => input.relu(),
            Activation::Sigmoid => input.sigmoid(),
            Activation::Tanh => input.tanh(),
        }
    }

    fn parameters(&self) -> Vec<Var<'g>> {
        Vec::new()
    }
}

/// A sequential container for modules.
#[derive(Default)]
pub struct Sequential<'g> {
    modules: Vec<Box<dyn Module<'g> + 'g>>,
}

impl<'g> Sequential<'g> {
    pub fn new() -> Self {
        Sequential {
            modules: Vec::new(),
        }
    }

    /// Adds a module to the container.
    #[must_use]
    pub fn add<M: Module<'g> + 'g>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl<'g> Module<'g> for Sequential<'g> {
    fn forward(&self, input: Var<'g>) -> Var<'g> {
        self.modules
            .iter()
            .fold(input, |x, module| module.forward(x))
    }

    fn parameters(&self) -> Vec<Var<'g>> {
        self.modules.iter().flat_map(|m| m.parameters()).collect()
    }
}

/// A trait for optimizers.
pub trait Optimizer {
    /// Performs a single optimization step. Parameters without a gradient
    /// are left alone.
    fn step(&mut self, parameters: &[Var<'_>]);

    /// Clears the gradients of all parameters.
    fn zero_grad(&mut self, parameters: &[Var<'_>]) {
        for param in parameters {
            param.clear_grad();
        }
    }
}

/// Stochastic Gradient Descent with optional momentum.
pub struct SGD {
    lr: f32,
    momentum: f32,
    velocity: HashMap<NodeId, Array>,
}

impl SGD {
    /// Creates a new SGD optimizer.
    ///
    /// # Arguments
    ///
    /// * `lr` - The learning rate.
    /// * `momentum` - The momentum factor; `0.0` gives plain gradient descent.
    ///   The velocity is an exponential moving average of the gradients.
    pub fn new(lr: f32, momentum: f32) -> Self {
        SGD {
            lr,
            momentum,
            velocity: HashMap::new(),
        }
    }
}

impl Optimizer for SGD {
    fn step(&mut self, parameters: &[Var<'_>]) {
        for param in parameters {
            let Some(grad) = param.grad() else {
                continue;
            };
            let update = if self.momentum == 0.0 {
                grad * self.lr
            } else {
                let velocity = self
                    .velocity
                    .entry(param.id())
                    .or_insert_with(|| Array::zeros(grad.raw_dim()));
                *velocity = &*velocity * self.momentum + grad * (1.0 - self.momentum);
                &*velocity * self.lr
            };
            trace!("sgd: updating node {}", param.id().index());
            param.set_value(param.value() - &update);
        }
    }
}
