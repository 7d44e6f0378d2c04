//! Differentiable primitives.
//!
//! Every primitive implements [`Operation`]. A fresh instance is created per
//! call site; `forward` stores whatever it needs for `backward` on `self`.

use ndarray::{ArrayView2, Axis, Ix2, IxDyn};

use crate::array::{self, Array};
use crate::error::{AutogradError, Result};

/// Number of inputs an operator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    /// Between `min` and `max` inputs, both inclusive.
    Range { min: usize, max: usize },
    /// The operator validates its own input count.
    Variadic,
}

/// A trait for operations that can be recorded in the computation graph.
pub trait Operation: Send {
    /// Short name used in error messages, logs and graph exports.
    fn name(&self) -> &'static str;

    fn arity(&self) -> Arity;

    /// Performs the forward pass of the operation.
    ///
    /// Must not mutate its inputs. Anything needed by [`Operation::backward`]
    /// is saved on `self`.
    fn forward(&mut self, inputs: &[&Array]) -> Result<Array>;

    /// Performs the backward pass of the operation.
    ///
    /// Returns one gradient per input, in input order, each shaped like the
    /// input as it was passed to `forward` (before any broadcasting).
    fn backward(&self, output_grad: &Array) -> Vec<Array>;
}

// Backward runs after a successful forward, so shape helpers cannot fail there
// unless the operator itself is broken.
fn internal<T>(op: &'static str, r: Result<T>) -> T {
    r.unwrap_or_else(|e| panic!("internal error in {op} backward: {e}"))
}

fn as_matrix<'a>(op: &'static str, a: &'a Array) -> Result<ArrayView2<'a, f32>> {
    a.view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| AutogradError::Shape {
            op,
            why: format!("expected a 2-D tensor, got shape {:?}", a.shape()),
        })
}

fn matrix<'a>(op: &'static str, a: &'a Array) -> ArrayView2<'a, f32> {
    internal(op, as_matrix(op, a))
}

/// The addition operation.
#[derive(Debug, Default)]
pub struct Add {
    a_shape: Vec<usize>,
    b_shape: Vec<usize>,
}

impl Operation for Add {
    fn name(&self) -> &'static str {
        "add"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(2)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let (a, b) = (inputs[0], inputs[1]);
        array::broadcast_shape(a.shape(), b.shape())?;
        self.a_shape = a.shape().to_vec();
        self.b_shape = b.shape().to_vec();
        Ok(a + b)
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![
            array::reduce_grad_to_shape(output_grad, &self.a_shape),
            array::reduce_grad_to_shape(output_grad, &self.b_shape),
        ]
    }
}

/// The subtraction operation.
#[derive(Debug, Default)]
pub struct Sub {
    a_shape: Vec<usize>,
    b_shape: Vec<usize>,
}

impl Operation for Sub {
    fn name(&self) -> &'static str {
        "sub"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(2)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let (a, b) = (inputs[0], inputs[1]);
        array::broadcast_shape(a.shape(), b.shape())?;
        self.a_shape = a.shape().to_vec();
        self.b_shape = b.shape().to_vec();
        Ok(a - b)
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let neg = output_grad.mapv(|g| -g);
        vec![
            array::reduce_grad_to_shape(output_grad, &self.a_shape),
            array::reduce_grad_to_shape(&neg, &self.b_shape),
        ]
    }
}

/// The multiplication operation.
#[derive(Debug, Default)]
pub struct Mul {
    a: Array,
    b: Array,
}

impl Operation for Mul {
    fn name(&self) -> &'static str {
        "mul"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(2)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let (a, b) = (inputs[0], inputs[1]);
        array::broadcast_shape(a.shape(), b.shape())?;
        self.a = a.clone();
        self.b = b.clone();
        Ok(a * b)
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let grad_a = output_grad * &self.b;
        let grad_b = output_grad * &self.a;
        vec![
            array::reduce_grad_to_shape(&grad_a, self.a.shape()),
            array::reduce_grad_to_shape(&grad_b, self.b.shape()),
        ]
    }
}

/// The division operation.
#[derive(Debug, Default)]
pub struct Div {
    a: Array,
    b: Array,
}

impl Operation for Div {
    fn name(&self) -> &'static str {
        "div"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(2)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let (a, b) = (inputs[0], inputs[1]);
        array::broadcast_shape(a.shape(), b.shape())?;
        self.a = a.clone();
        self.b = b.clone();
        Ok(a / b)
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let grad_a = output_grad / &self.b;
        let b_sq = &self.b * &self.b;
        let grad_b = -(output_grad * &self.a) / &b_sq;
        vec![
            array::reduce_grad_to_shape(&grad_a, self.a.shape()),
            array::reduce_grad_to_shape(&grad_b, self.b.shape()),
        ]
    }
}

/// Element-wise negation.
#[derive(Debug, Default)]
pub struct Neg;

impl Operation for Neg {
    fn name(&self) -> &'static str {
        "neg"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        Ok(inputs[0].mapv(|x| -x))
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![output_grad.mapv(|g| -g)]
    }
}

/// Multiplication by a constant.
#[derive(Debug)]
pub struct Scale(pub f32);

impl Operation for Scale {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        Ok(inputs[0] * self.0)
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![output_grad * self.0]
    }
}

/// The power operation, `x^p` for a constant exponent.
#[derive(Debug)]
pub struct Pow {
    exponent: f32,
    input: Array,
}

impl Pow {
    pub fn new(exponent: f32) -> Self {
        Pow {
            exponent,
            input: array::scalar(0.0),
        }
    }
}

impl Operation for Pow {
    fn name(&self) -> &'static str {
        "pow"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        self.input = inputs[0].clone();
        let p = self.exponent;
        Ok(inputs[0].mapv(|x| x.powf(p)))
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let p = self.exponent;
        vec![output_grad * &self.input.mapv(|x| p * x.powf(p - 1.0))]
    }
}

/// Element-wise square.
#[derive(Debug, Default)]
pub struct Square {
    input: Array,
}

impl Operation for Square {
    fn name(&self) -> &'static str {
        "square"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        self.input = inputs[0].clone();
        Ok(inputs[0].mapv(|x| x * x))
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![output_grad * &self.input.mapv(|x| 2.0 * x)]
    }
}

/// Element-wise `e^x`. Keeps its output, which is also its derivative.
#[derive(Debug, Default)]
pub struct Exp {
    output: Array,
}

impl Operation for Exp {
    fn name(&self) -> &'static str {
        "exp"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        self.output = inputs[0].mapv(f32::exp);
        Ok(self.output.clone())
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![output_grad * &self.output]
    }
}

/// Element-wise natural logarithm.
#[derive(Debug, Default)]
pub struct Log {
    input: Array,
}

impl Operation for Log {
    fn name(&self) -> &'static str {
        "log"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        self.input = inputs[0].clone();
        Ok(inputs[0].mapv(f32::ln))
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![output_grad / &self.input]
    }
}

/// The ReLU activation.
#[derive(Debug, Default)]
pub struct ReLU {
    input: Array,
}

impl Operation for ReLU {
    fn name(&self) -> &'static str {
        "relu"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        self.input = inputs[0].clone();
        Ok(inputs[0].mapv(|x| x.max(0.0)))
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let mask = self.input.mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
        vec![output_grad * &mask]
    }
}

/// The logistic sigmoid. Its derivative is written in terms of the output.
#[derive(Debug, Default)]
pub struct Sigmoid {
    output: Array,
}

impl Operation for Sigmoid {
    fn name(&self) -> &'static str {
        "sigmoid"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        self.output = inputs[0].mapv(|x| 1.0 / (1.0 + (-x).exp()));
        Ok(self.output.clone())
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![output_grad * &self.output.mapv(|y| y * (1.0 - y))]
    }
}

/// The hyperbolic tangent.
#[derive(Debug, Default)]
pub struct Tanh {
    output: Array,
}

impl Operation for Tanh {
    fn name(&self) -> &'static str {
        "tanh"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        self.output = inputs[0].mapv(f32::tanh);
        Ok(self.output.clone())
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![output_grad * &self.output.mapv(|y| 1.0 - y * y)]
    }
}

/// Sum operation: sums all elements to a scalar.
#[derive(Debug, Default)]
pub struct Sum {
    input_shape: Vec<usize>,
}

impl Operation for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        self.input_shape = inputs[0].shape().to_vec();
        Ok(array::scalar(inputs[0].sum()))
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![array::full(&self.input_shape, output_grad.sum())]
    }
}

/// Sum along one axis, optionally keeping it with length 1.
#[derive(Debug)]
pub struct SumAxis {
    axis: usize,
    keep_dims: bool,
    input_shape: Vec<usize>,
}

impl SumAxis {
    pub fn new(axis: usize, keep_dims: bool) -> Self {
        SumAxis {
            axis,
            keep_dims,
            input_shape: Vec::new(),
        }
    }
}

impl Operation for SumAxis {
    fn name(&self) -> &'static str {
        "sum_axis"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let a = inputs[0];
        if self.axis >= a.ndim() {
            return Err(AutogradError::Shape {
                op: "sum_axis",
                why: format!("axis {} out of range for shape {:?}", self.axis, a.shape()),
            });
        }
        self.input_shape = a.shape().to_vec();
        let summed = a.sum_axis(Axis(self.axis));
        Ok(if self.keep_dims {
            summed.insert_axis(Axis(self.axis))
        } else {
            summed
        })
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let g = if self.keep_dims {
            output_grad.clone()
        } else {
            output_grad.clone().insert_axis(Axis(self.axis))
        };
        vec![internal("sum_axis", array::broadcast_to(&g, &self.input_shape))]
    }
}

/// Mean operation: computes mean over all elements to a scalar.
#[derive(Debug, Default)]
pub struct Mean {
    input_shape: Vec<usize>,
}

impl Operation for Mean {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let a = inputs[0];
        if a.is_empty() {
            return Err(AutogradError::Shape {
                op: "mean",
                why: "mean of an empty tensor".to_string(),
            });
        }
        self.input_shape = a.shape().to_vec();
        Ok(array::scalar(a.sum() / a.len() as f32))
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let n: usize = self.input_shape.iter().product();
        vec![array::full(&self.input_shape, output_grad.sum() / n as f32)]
    }
}

/// Explicit broadcast to a larger shape; backward sums back down.
#[derive(Debug)]
pub struct BroadcastTo {
    shape: Vec<usize>,
    input_shape: Vec<usize>,
}

impl BroadcastTo {
    pub fn new(shape: Vec<usize>) -> Self {
        BroadcastTo {
            shape,
            input_shape: Vec::new(),
        }
    }
}

impl Operation for BroadcastTo {
    fn name(&self) -> &'static str {
        "broadcast_to"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let a = inputs[0];
        if !array::is_broadcastable(a.shape(), &self.shape) {
            return Err(AutogradError::Broadcast {
                from: a.shape().to_vec(),
                to: self.shape.clone(),
            });
        }
        self.input_shape = a.shape().to_vec();
        array::broadcast_to(a, &self.shape)
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![array::reduce_grad_to_shape(output_grad, &self.input_shape)]
    }
}

/// Reshape operation: changes tensor shape but keeps elements order.
#[derive(Debug)]
pub struct Reshape {
    shape: Vec<usize>,
    input_shape: Vec<usize>,
}

impl Reshape {
    pub fn new(shape: Vec<usize>) -> Self {
        Reshape {
            shape,
            input_shape: Vec::new(),
        }
    }
}

impl Operation for Reshape {
    fn name(&self) -> &'static str {
        "reshape"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        self.input_shape = inputs[0].shape().to_vec();
        array::reshape(inputs[0], &self.shape)
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        vec![internal("reshape", array::reshape(output_grad, &self.input_shape))]
    }
}

/// Axis permutation. `None` reverses the axes (a plain matrix transpose for 2-D).
#[derive(Debug)]
pub struct Transpose {
    axes: Option<Vec<usize>>,
    perm: Vec<usize>,
}

impl Transpose {
    pub fn new(axes: Option<Vec<usize>>) -> Self {
        Transpose {
            axes,
            perm: Vec::new(),
        }
    }
}

fn permute(a: &Array, perm: &[usize]) -> Array {
    a.view()
        .permuted_axes(IxDyn(perm))
        .as_standard_layout()
        .into_owned()
}

impl Operation for Transpose {
    fn name(&self) -> &'static str {
        "transpose"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let a = inputs[0];
        let ndim = a.ndim();
        let perm = match &self.axes {
            Some(axes) => axes.clone(),
            None => (0..ndim).rev().collect(),
        };
        let mut seen = vec![false; ndim];
        let valid = perm.len() == ndim
            && perm.iter().all(|&p| p < ndim && !std::mem::replace(&mut seen[p], true));
        if !valid {
            return Err(AutogradError::Shape {
                op: "transpose",
                why: format!("{:?} is not a permutation of {} axes", perm, ndim),
            });
        }
        let out = permute(a, &perm);
        self.perm = perm;
        Ok(out)
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let mut inverse = vec![0usize; self.perm.len()];
        for (i, &p) in self.perm.iter().enumerate() {
            inverse[p] = i;
        }
        vec![permute(output_grad, &inverse)]
    }
}

/// The matrix multiplication operation (2-D by 2-D).
#[derive(Debug, Default)]
pub struct MatMul {
    a: Array,
    b: Array,
}

impl Operation for MatMul {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(2)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let a = as_matrix("matmul", inputs[0])?;
        let b = as_matrix("matmul", inputs[1])?;
        if a.ncols() != b.nrows() {
            return Err(AutogradError::Shape {
                op: "matmul",
                why: format!("inner dimensions differ: {:?} x {:?}", a.shape(), b.shape()),
            });
        }
        let out = a.dot(&b).into_dyn();
        self.a = inputs[0].clone();
        self.b = inputs[1].clone();
        Ok(out)
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let g = matrix("matmul", output_grad);
        let a = matrix("matmul", &self.a);
        let b = matrix("matmul", &self.b);
        vec![g.dot(&b.t()).into_dyn(), a.t().dot(&g).into_dyn()]
    }
}

/// `x · W + b` with the bias optional, so it takes two or three inputs.
#[derive(Debug, Default)]
pub struct Affine {
    x: Array,
    w: Array,
    bias_shape: Option<Vec<usize>>,
}

impl Operation for Affine {
    fn name(&self) -> &'static str {
        "affine"
    }

    fn arity(&self) -> Arity {
        Arity::Range { min: 2, max: 3 }
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let x = as_matrix("affine", inputs[0])?;
        let w = as_matrix("affine", inputs[1])?;
        if x.ncols() != w.nrows() {
            return Err(AutogradError::Shape {
                op: "affine",
                why: format!("input {:?} does not match weight {:?}", x.shape(), w.shape()),
            });
        }
        let mut out = x.dot(&w).into_dyn();
        self.bias_shape = None;
        if let Some(b) = inputs.get(2) {
            if !array::is_broadcastable(b.shape(), out.shape()) {
                return Err(AutogradError::Broadcast {
                    from: b.shape().to_vec(),
                    to: out.shape().to_vec(),
                });
            }
            out = out + *b;
            self.bias_shape = Some(b.shape().to_vec());
        }
        self.x = inputs[0].clone();
        self.w = inputs[1].clone();
        Ok(out)
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let g = matrix("affine", output_grad);
        let x = matrix("affine", &self.x);
        let w = matrix("affine", &self.w);
        let mut grads = vec![g.dot(&w.t()).into_dyn(), x.t().dot(&g).into_dyn()];
        if let Some(shape) = &self.bias_shape {
            grads.push(array::reduce_grad_to_shape(output_grad, shape));
        }
        grads
    }
}

/// Mean squared error between a prediction and a target of the same shape.
#[derive(Debug, Default)]
pub struct MeanSquaredError {
    diff: Array,
}

impl Operation for MeanSquaredError {
    fn name(&self) -> &'static str {
        "mse"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(2)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let (pred, target) = (inputs[0], inputs[1]);
        if pred.shape() != target.shape() || pred.is_empty() {
            return Err(AutogradError::Shape {
                op: "mse",
                why: format!(
                    "prediction {:?} and target {:?} must have the same non-empty shape",
                    pred.shape(),
                    target.shape()
                ),
            });
        }
        self.diff = pred - target;
        let n = self.diff.len() as f32;
        Ok(array::scalar(self.diff.mapv(|d| d * d).sum() / n))
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let scale = 2.0 * output_grad.sum() / self.diff.len() as f32;
        let grad_pred = &self.diff * scale;
        let grad_target = grad_pred.mapv(|g| -g);
        vec![grad_pred, grad_target]
    }
}

/// Softmax followed by cross-entropy, averaged over the batch.
///
/// Logits are `(N, C)`. Targets are either `(N, C)` probability rows (one-hot
/// or soft labels) or `(N,)` class indices stored as floats. The target never
/// receives a gradient; its slot is filled with zeros.
#[derive(Debug, Default)]
pub struct SoftmaxCrossEntropy {
    probs: Array,
    target: Array,
    target_shape: Vec<usize>,
}

impl SoftmaxCrossEntropy {
    fn dense_target(logits_shape: &[usize], target: &Array) -> Result<Array> {
        let (n, c) = (logits_shape[0], logits_shape[1]);
        if target.shape() == logits_shape {
            return Ok(target.clone());
        }
        if target.shape() != [n] {
            return Err(AutogradError::Shape {
                op: "softmax_cross_entropy",
                why: format!(
                    "target {:?} is neither {:?} nor [{}]",
                    target.shape(),
                    logits_shape,
                    n
                ),
            });
        }
        let mut dense = array::zeros(&[n, c]);
        for (row, &label) in target.iter().enumerate() {
            let class = label as usize;
            if label < 0.0 || label.fract() != 0.0 || class >= c {
                return Err(AutogradError::Shape {
                    op: "softmax_cross_entropy",
                    why: format!("label {label} at row {row} is not a class index below {c}"),
                });
            }
            dense[[row, class]] = 1.0;
        }
        Ok(dense)
    }
}

impl Operation for SoftmaxCrossEntropy {
    fn name(&self) -> &'static str {
        "softmax_cross_entropy"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(2)
    }

    fn forward(&mut self, inputs: &[&Array]) -> Result<Array> {
        let logits = as_matrix("softmax_cross_entropy", inputs[0])?;
        if logits.nrows() == 0 {
            return Err(AutogradError::Shape {
                op: "softmax_cross_entropy",
                why: "empty batch".to_string(),
            });
        }
        let target = Self::dense_target(inputs[0].shape(), inputs[1])?;

        // Row-wise log-softmax with the max subtracted for stability.
        let mut log_probs = logits.to_owned();
        for mut row in log_probs.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            let lse = row.mapv(|x| (x - max).exp()).sum().ln() + max;
            row.mapv_inplace(|x| x - lse);
        }
        let n = logits.nrows() as f32;
        let loss = -(&log_probs * &matrix("softmax_cross_entropy", &target)).sum() / n;

        self.probs = log_probs.mapv(f32::exp).into_dyn();
        self.target = target;
        self.target_shape = inputs[1].shape().to_vec();
        Ok(array::scalar(loss))
    }

    fn backward(&self, output_grad: &Array) -> Vec<Array> {
        let n = self.probs.shape()[0] as f32;
        let scale = output_grad.sum() / n;
        let grad_logits = (&self.probs - &self.target) * scale;
        vec![grad_logits, array::zeros(&self.target_shape)]
    }
}
