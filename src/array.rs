//! Thin helpers over [`ndarray::ArrayD`], the numeric payload of every node.
//!
//! The autograd core never looks inside a tensor. It needs constructors, shape
//! checks and the broadcast/reduce pair that keeps gradients shaped like the
//! operands they belong to.

use ndarray::{ArrayD, Axis, IxDyn};
use rand::distributions::Uniform;
use rand::Rng;
use rand_distr::Normal;

use crate::error::{AutogradError, Result};

/// The tensor value carried by every node.
pub type Array = ArrayD<f32>;

pub fn zeros(shape: &[usize]) -> Array {
    ArrayD::zeros(IxDyn(shape))
}

pub fn ones(shape: &[usize]) -> Array {
    ArrayD::ones(IxDyn(shape))
}

pub fn full(shape: &[usize], value: f32) -> Array {
    ArrayD::from_elem(IxDyn(shape), value)
}

/// A rank-0 tensor holding `value`.
pub fn scalar(value: f32) -> Array {
    ArrayD::from_elem(IxDyn(&[]), value)
}

/// Builds a tensor from a row-major buffer.
///
/// Fails when `data.len()` differs from the product of `shape`.
pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Result<Array> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        return Err(AutogradError::InvalidValue(format!(
            "buffer of {} elements does not fill shape {:?} ({} elements)",
            data.len(),
            shape,
            expected
        )));
    }
    ArrayD::from_shape_vec(IxDyn(shape), data)
        .map_err(|e| AutogradError::InvalidValue(e.to_string()))
}

/// Samples every element from `U[low, high)`.
pub fn uniform<R: Rng + ?Sized>(shape: &[usize], low: f32, high: f32, rng: &mut R) -> Result<Array> {
    if !(low < high) {
        return Err(AutogradError::InvalidValue(format!(
            "uniform range [{low}, {high}) is empty"
        )));
    }
    if !(high - low).is_finite() {
        return Err(AutogradError::InvalidValue(format!(
            "uniform range [{low}, {high}) is not finite"
        )));
    }
    let dist = Uniform::new(low, high);
    Ok(ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.sample(dist)))
}

/// Samples every element from `N(mean, std^2)`.
pub fn normal<R: Rng + ?Sized>(shape: &[usize], mean: f32, std: f32, rng: &mut R) -> Result<Array> {
    let dist = Normal::new(mean, std)
        .map_err(|e| AutogradError::InvalidValue(format!("normal(mean={mean}, std={std}): {e}")))?;
    Ok(ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.sample(dist)))
}

/// Right-aligned broadcast of two shapes.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut out = vec![1usize; ndim];
    for (i, slot) in out.iter_mut().enumerate() {
        // Index from the right; missing leading dims behave like 1.
        let da = dim_from_right(a, ndim - 1 - i);
        let db = dim_from_right(b, ndim - 1 - i);
        *slot = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(AutogradError::BroadcastIncompatible {
                    lhs: a.to_vec(),
                    rhs: b.to_vec(),
                })
            }
        };
    }
    Ok(out)
}

fn dim_from_right(shape: &[usize], offset: usize) -> usize {
    if offset < shape.len() {
        shape[shape.len() - 1 - offset]
    } else {
        1
    }
}

/// Whether a tensor of shape `from` can be broadcast to exactly `to`.
pub fn is_broadcastable(from: &[usize], to: &[usize]) -> bool {
    matches!(broadcast_shape(to, from), Ok(s) if s == to)
}

/// Sums `grad` over the axes that were broadcast to produce it, so that the
/// result has exactly `target_shape`.
///
/// `target_shape` must broadcast to `grad.shape()`; operators only call this
/// with the shapes they saw in `forward`.
pub fn reduce_grad_to_shape(grad: &Array, target_shape: &[usize]) -> Array {
    if grad.shape() == target_shape {
        return grad.clone();
    }

    let mut res = grad.clone();
    // Leading axes that did not exist in the operand.
    while res.ndim() > target_shape.len() {
        res = res.sum_axis(Axis(0));
    }
    while res.ndim() < target_shape.len() {
        res.insert_axis_inplace(Axis(0));
    }
    for (axis, &dim) in target_shape.iter().enumerate() {
        if dim == 1 && res.shape()[axis] != 1 {
            res = res.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    debug_assert_eq!(res.shape(), target_shape);
    res
}

/// Materialises `a` broadcast to `shape`.
pub fn broadcast_to(a: &Array, shape: &[usize]) -> Result<Array> {
    a.broadcast(IxDyn(shape))
        .map(|v| v.to_owned())
        .ok_or_else(|| AutogradError::Broadcast {
            from: a.shape().to_vec(),
            to: shape.to_vec(),
        })
}

/// Row-major reshape into a freshly owned tensor.
pub fn reshape(a: &Array, shape: &[usize]) -> Result<Array> {
    let numel: usize = shape.iter().product();
    if numel != a.len() {
        return Err(AutogradError::Shape {
            op: "reshape",
            why: format!("cannot reshape {:?} into {:?}", a.shape(), shape),
        });
    }
    a.to_shape(IxDyn(shape))
        .map(|c| c.into_owned())
        .map_err(|e| AutogradError::Shape {
            op: "reshape",
            why: e.to_string(),
        })
}
