use approx::assert_abs_diff_eq;
use ndarray::{arr0, arr1, arr2};
use tensor_autograd::ops::{Add, Arity, Operation};
use tensor_autograd::{array, Array, AutogradError, Graph, GraphConfig, Traversal};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_square_plus_scalar() {
    init_logger();
    let g = Graph::new();
    let x = g.scalar(5.0);
    let y = g.scalar(2.0);
    let z = x.square().add(y);
    z.backward();

    assert_eq!(z.value(), arr0(27.0).into_dyn());
    assert_eq!(x.grad().unwrap(), arr0(10.0).into_dyn());
    assert_eq!(y.grad().unwrap(), arr0(1.0).into_dyn());
}

#[test]
fn test_sum_backward_gives_ones() {
    let g = Graph::new();
    let a = g.param(arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn());
    let loss = a.sum();
    loss.backward();

    assert_eq!(loss.item(), 10.0);
    assert_eq!(a.grad().unwrap(), arr2(&[[1.0, 1.0], [1.0, 1.0]]).into_dyn());
}

#[test]
fn test_broadcast_add_reduces_gradient() {
    let g = Graph::new();
    let m = g.param(arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).into_dyn());
    let v = g.param(arr2(&[[1.0, 1.0, 1.0]]).into_dyn());
    let s = m.add(v).sum();
    s.backward();

    assert_eq!(v.grad().unwrap(), arr2(&[[2.0, 2.0, 2.0]]).into_dyn());
    assert_eq!(m.grad().unwrap(), array::ones(&[2, 3]));
}

#[test]
fn test_every_traversal_agrees_on_trees() {
    for traversal in [Traversal::Recursive, Traversal::Stack, Traversal::Topological] {
        let g = Graph::with_config(GraphConfig::default().traversal(traversal));
        let x = g.scalar(5.0);
        let y = g.scalar(2.0);
        x.square().add(y).backward();
        assert_eq!(x.grad().unwrap(), arr0(10.0).into_dyn(), "{traversal:?}");
        assert_eq!(y.grad().unwrap(), arr0(1.0).into_dyn(), "{traversal:?}");
    }
}

#[test]
fn test_mul_backward() {
    let g = Graph::new();
    let a = g.param(arr1(&[2.0, 3.0]).into_dyn());
    let b = g.param(arr1(&[4.0, 5.0]).into_dyn());
    (a * b).sum().backward();

    assert_eq!(a.grad().unwrap(), arr1(&[4.0, 5.0]).into_dyn());
    assert_eq!(b.grad().unwrap(), arr1(&[2.0, 3.0]).into_dyn());
}

#[test]
fn test_sub_backward() {
    let g = Graph::new();
    let a = g.param(arr1(&[1.0, 2.0]).into_dyn());
    let b = g.param(arr1(&[3.0, 4.0]).into_dyn());
    let c = a - b;
    assert_eq!(c.value(), arr1(&[-2.0, -2.0]).into_dyn());
    c.sum().backward();

    assert_eq!(a.grad().unwrap(), arr1(&[1.0, 1.0]).into_dyn());
    assert_eq!(b.grad().unwrap(), arr1(&[-1.0, -1.0]).into_dyn());
}

#[test]
fn test_div_backward() {
    let g = Graph::new();
    let a = g.param(arr1(&[1.0, 2.0]).into_dyn());
    let b = g.param(arr1(&[4.0, 3.0]).into_dyn());
    (a / b).sum().backward();

    let grad_a = a.grad().unwrap();
    let grad_b = b.grad().unwrap();
    assert_abs_diff_eq!(grad_a, arr1(&[0.25, 1.0 / 3.0]).into_dyn(), epsilon = 1e-6);
    assert_abs_diff_eq!(grad_b, arr1(&[-1.0 / 16.0, -2.0 / 9.0]).into_dyn(), epsilon = 1e-6);
}

#[test]
fn test_neg_and_scale() {
    let g = Graph::new();
    let a = g.param(arr1(&[1.0, -2.0]).into_dyn());
    let b = (-a).scale(3.0);
    assert_eq!(b.value(), arr1(&[-3.0, 6.0]).into_dyn());
    b.sum().backward();
    assert_eq!(a.grad().unwrap(), arr1(&[-3.0, -3.0]).into_dyn());
}

#[test]
fn test_activations_backward() {
    let g = Graph::new();
    let x = g.param(arr1(&[-1.0, 0.5, 2.0]).into_dyn());
    x.relu().sum().backward();
    assert_eq!(x.grad().unwrap(), arr1(&[0.0, 1.0, 1.0]).into_dyn());

    let g = Graph::new();
    let x = g.param(arr1(&[0.0]).into_dyn());
    x.sigmoid().sum().backward();
    assert_abs_diff_eq!(x.grad().unwrap(), arr1(&[0.25]).into_dyn(), epsilon = 1e-6);

    let g = Graph::new();
    let x = g.param(arr1(&[0.0]).into_dyn());
    x.tanh().sum().backward();
    assert_abs_diff_eq!(x.grad().unwrap(), arr1(&[1.0]).into_dyn(), epsilon = 1e-6);
}

#[test]
fn test_exp_log_pow() {
    let g = Graph::new();
    let x = g.param(arr1(&[1.0, 2.0]).into_dyn());
    x.exp().sum().backward();
    let e = x.value().mapv(f32::exp);
    assert_abs_diff_eq!(x.grad().unwrap(), e, epsilon = 1e-5);

    let g = Graph::new();
    let x = g.param(arr1(&[1.0, 4.0]).into_dyn());
    x.log().sum().backward();
    assert_abs_diff_eq!(x.grad().unwrap(), arr1(&[1.0, 0.25]).into_dyn(), epsilon = 1e-6);

    let g = Graph::new();
    let x = g.param(arr1(&[2.0, 3.0]).into_dyn());
    x.pow(3.0).sum().backward();
    assert_abs_diff_eq!(x.grad().unwrap(), arr1(&[12.0, 27.0]).into_dyn(), epsilon = 1e-4);
}

#[test]
fn test_mean_and_sum_axis() {
    let g = Graph::new();
    let x = g.param(arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn());
    let m = x.mean();
    assert_eq!(m.item(), 2.5);
    m.backward();
    assert_eq!(x.grad().unwrap(), array::full(&[2, 2], 0.25));

    let g = Graph::new();
    let x = g.param(arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).into_dyn());
    let rows = x.sum_axis(1, false);
    assert_eq!(rows.value(), arr1(&[6.0, 15.0]).into_dyn());
    let kept = x.sum_axis(0, true);
    assert_eq!(kept.shape(), vec![1, 3]);
    rows.square().sum().backward();
    assert_eq!(
        x.grad().unwrap(),
        arr2(&[[12.0, 12.0, 12.0], [30.0, 30.0, 30.0]]).into_dyn()
    );
}

#[test]
fn test_shape_ops_route_gradients() {
    let g = Graph::new();
    let x = g.param(arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).into_dyn());
    let t = x.transpose();
    assert_eq!(t.shape(), vec![3, 2]);
    assert_eq!(t.value(), arr2(&[[1.0, 4.0], [2.0, 5.0], [3.0, 6.0]]).into_dyn());
    let r = t.reshape(&[6]);
    let w = g.constant(arr1(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).into_dyn());
    r.mul(w).sum().backward();
    // r[k] came from t[k / 2][k % 2] = x[k % 2][k / 2].
    assert_eq!(
        x.grad().unwrap(),
        arr2(&[[1.0, 3.0, 5.0], [2.0, 4.0, 6.0]]).into_dyn()
    );

    let g = Graph::new();
    let v = g.param(arr1(&[1.0, 2.0]).into_dyn());
    let b = v.broadcast_to(&[3, 2]);
    assert_eq!(b.shape(), vec![3, 2]);
    b.sum().backward();
    assert_eq!(v.grad().unwrap(), arr1(&[3.0, 3.0]).into_dyn());
}

#[test]
fn test_matmul_backward() {
    let g = Graph::new();
    let a = g.param(arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn());
    let b = g.param(arr2(&[[5.0, 6.0], [7.0, 8.0]]).into_dyn());
    let c = a.matmul(b);
    assert_eq!(c.value(), arr2(&[[19.0, 22.0], [43.0, 50.0]]).into_dyn());
    c.sum().backward();

    assert_eq!(a.grad().unwrap(), arr2(&[[11.0, 15.0], [11.0, 15.0]]).into_dyn());
    assert_eq!(b.grad().unwrap(), arr2(&[[4.0, 4.0], [6.0, 6.0]]).into_dyn());
}

#[test]
fn test_affine_matches_matmul_plus_bias() {
    let g = Graph::new();
    let x = g.constant(arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]).into_dyn());
    let w = g.param(arr2(&[[0.5, -1.0], [1.5, 2.0]]).into_dyn());
    let b = g.param(arr1(&[0.1, 0.2]).into_dyn());
    let y = x.affine(w, Some(b));
    let expected = x.value().into_dimensionality::<ndarray::Ix2>().unwrap().dot(
        &w.value().into_dimensionality::<ndarray::Ix2>().unwrap(),
    ) + arr1(&[0.1, 0.2]);
    assert_abs_diff_eq!(y.value(), expected.into_dyn(), epsilon = 1e-6);
    y.sum().backward();

    assert_eq!(b.grad().unwrap(), arr1(&[3.0, 3.0]).into_dyn());
    assert_eq!(w.grad().unwrap(), arr2(&[[9.0, 9.0], [12.0, 12.0]]).into_dyn());
    assert!(x.grad().is_none());
}

#[test]
fn test_losses() {
    let g = Graph::new();
    let pred = g.param(arr1(&[1.0, 2.0, 3.0]).into_dyn());
    let target = g.constant(arr1(&[1.0, 1.0, 1.0]).into_dyn());
    let loss = pred.mse(target);
    assert_abs_diff_eq!(loss.item(), 5.0 / 3.0, epsilon = 1e-6);
    loss.backward();
    assert_abs_diff_eq!(
        pred.grad().unwrap(),
        arr1(&[0.0, 2.0 / 3.0, 4.0 / 3.0]).into_dyn(),
        epsilon = 1e-6
    );

    let g = Graph::new();
    let logits = g.param(arr2(&[[2.0, 0.0], [0.0, 2.0]]).into_dyn());
    let labels = g.constant(arr1(&[0.0, 1.0]).into_dyn());
    let one_hot = g.constant(arr2(&[[1.0, 0.0], [0.0, 1.0]]).into_dyn());
    let by_index = logits.softmax_cross_entropy(labels);
    let by_row = logits.softmax_cross_entropy(one_hot);
    assert_abs_diff_eq!(by_index.item(), by_row.item(), epsilon = 1e-6);
    let expected = (1.0f32 + (-2.0f32).exp()).ln();
    assert_abs_diff_eq!(by_index.item(), expected, epsilon = 1e-5);
}

#[test]
fn test_diamond_accumulates_in_topological_mode() {
    let g = Graph::new();
    let a = g.scalar(3.0);
    let c = a.mul(a);
    c.backward();
    assert_eq!(a.grad().unwrap(), arr0(6.0).into_dyn());

    // Two distinct operators consuming the same node.
    let g = Graph::new();
    let a = g.scalar(3.0);
    let d = a.exp().add(a.scale(2.0));
    d.backward();
    assert_abs_diff_eq!(a.grad().unwrap(), arr0(3f32.exp() + 2.0).into_dyn(), epsilon = 1e-4);
}

#[test]
fn test_diamond_overwrites_in_depth_first_modes() {
    for traversal in [Traversal::Recursive, Traversal::Stack] {
        let g = Graph::new();
        let a = g.scalar(3.0);
        let c = a.mul(a);
        c.backward_with(traversal);
        // Each path writes g * other = 3.0; the second write wins.
        assert_eq!(a.grad().unwrap(), arr0(3.0).into_dyn(), "{traversal:?}");
    }
}

#[test]
fn test_stack_matches_recursive_on_shared_subgraph() {
    let build = |traversal: Traversal| {
        let g = Graph::new();
        let x = g.param(arr1(&[0.5, -1.5]).into_dyn());
        let w = g.param(arr1(&[2.0, 3.0]).into_dyn());
        let h = x.mul(w).tanh();
        let out = h.add(h.mul(w)).add(x.exp()).sum();
        out.backward_with(traversal);
        (x.grad().unwrap(), w.grad().unwrap())
    };
    let (xr, wr) = build(Traversal::Recursive);
    let (xs, ws) = build(Traversal::Stack);
    assert_eq!(xr, xs);
    assert_eq!(wr, ws);
}

#[test]
fn test_deep_chain_with_stack_traversal() {
    let g = Graph::with_config(GraphConfig::default().traversal(Traversal::Stack));
    let x = g.scalar(1.0);
    let mut y = x;
    for _ in 0..20_000 {
        y = y.scale(1.0);
    }
    y.backward();
    assert_eq!(x.grad().unwrap(), arr0(1.0).into_dyn());
}

#[test]
fn test_caller_supplied_seed_is_propagated() {
    let g = Graph::new();
    let x = g.param(arr1(&[1.0, 2.0]).into_dyn());
    let y = x.scale(2.0);
    y.set_grad(arr1(&[1.0, 10.0]).into_dyn());
    y.backward();
    assert_eq!(x.grad().unwrap(), arr1(&[2.0, 20.0]).into_dyn());
}

#[test]
fn test_backward_overwrites_leaf_gradients_between_calls() {
    let g = Graph::new();
    let x = g.scalar(2.0);
    x.square().backward();
    x.square().backward();
    assert_eq!(x.grad().unwrap(), arr0(4.0).into_dyn());

    x.accumulate_grad(arr0(1.0).into_dyn());
    assert_eq!(x.grad().unwrap(), arr0(5.0).into_dyn());
    x.clear_grad();
    assert!(x.grad().is_none());
}

#[test]
fn test_frozen_nodes_never_hold_gradients() {
    let g = Graph::new();
    let w = g.param(arr1(&[1.0, 2.0]).into_dyn());
    let c = g.constant(arr1(&[3.0, 4.0]).into_dyn());
    let y = w.mul(c).sum();
    y.backward();
    assert!(c.grad().is_none());
    assert_eq!(w.grad().unwrap(), arr1(&[3.0, 4.0]).into_dyn());

    c.set_grad(array::ones(&[2]));
    assert!(c.grad().is_none());

    w.set_requires_grad(false);
    assert!(w.grad().is_none());
    w.set_grad(array::ones(&[2]));
    assert!(w.grad().is_none());
}

#[test]
fn test_backward_from_constant_is_a_no_op() {
    let g = Graph::new();
    let a = g.constant(arr1(&[1.0]).into_dyn());
    let b = a.exp();
    assert!(!b.requires_grad());
    b.backward();
    assert!(b.grad().is_none());
    assert!(a.grad().is_none());
}

#[test]
#[should_panic(expected = "gradient shape mismatch")]
fn test_set_grad_with_wrong_shape_panics() {
    let g = Graph::new();
    let x = g.param(array::zeros(&[2]));
    x.set_grad(array::ones(&[3]));
}

#[test]
fn test_set_grad_shape_checked_even_when_frozen() {
    let g = Graph::new();
    let x = g.constant(array::zeros(&[2]));
    let err = x.try_set_grad(array::ones(&[3])).unwrap_err();
    assert!(matches!(err, AutogradError::GradShape { .. }));
}

#[test]
#[should_panic(expected = "arity mismatch in add")]
fn test_arity_mismatch_panics() {
    let g = Graph::new();
    let a = g.scalar(1.0);
    g.apply(Add::default(), &[a]);
}

#[test]
#[should_panic(expected = "matmul")]
fn test_matmul_shape_error_panics() {
    let g = Graph::new();
    let a = g.param(array::ones(&[2, 3]));
    let b = g.param(array::ones(&[2, 3]));
    a.matmul(b);
}

#[test]
fn test_incompatible_broadcast_is_an_error() {
    let g = Graph::new();
    let a = g.param(array::ones(&[2, 3]));
    let b = g.param(array::ones(&[2]));
    let err = g.try_apply(Add::default(), &[a, b]).unwrap_err();
    assert_eq!(
        err,
        AutogradError::BroadcastIncompatible {
            lhs: vec![2, 3],
            rhs: vec![2],
        }
    );
    assert_eq!(g.node_count(), 2);
}

struct DropsGradients;

impl Operation for DropsGradients {
    fn name(&self) -> &'static str {
        "drops_gradients"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn forward(&mut self, inputs: &[&Array]) -> tensor_autograd::Result<Array> {
        Ok(inputs[0].clone())
    }

    fn backward(&self, _output_grad: &Array) -> Vec<Array> {
        Vec::new()
    }
}

#[test]
fn test_backward_arity_mismatch_is_reported() {
    for traversal in [Traversal::Recursive, Traversal::Stack, Traversal::Topological] {
        let g = Graph::with_config(GraphConfig::default().traversal(traversal));
        let x = g.scalar(1.0);
        let y = g.apply(DropsGradients, &[x]);
        let err = y.try_backward().unwrap_err();
        assert_eq!(
            err,
            AutogradError::BackwardArity {
                op: "drops_gradients",
                expected: 1,
                actual: 0
            }
        );
    }
}

#[test]
fn test_producer_info_and_leaves() {
    let g = Graph::new();
    let a = g.named("a", arr1(&[1.0]).into_dyn(), true);
    let b = g.scalar(2.0);
    let c = a.mul(b);
    assert!(a.is_leaf());
    assert_eq!(a.name().as_deref(), Some("a"));
    let info = c.producer().unwrap();
    assert_eq!(info.name, "mul");
    assert_eq!(info.inputs, vec![a.id(), b.id()]);
    assert_eq!(info.output, c.id());
    assert!(!c.is_leaf());
}

#[test]
fn test_from_shape_vec_rejects_mismatched_buffer() {
    let g = Graph::new();
    let err = g.from_shape_vec(&[2, 2], vec![1.0; 3], true).unwrap_err();
    assert!(matches!(err, AutogradError::InvalidValue(_)));
    let ok = g.from_shape_vec(&[2, 2], vec![1.0; 4], true).unwrap();
    assert_eq!(ok.shape(), vec![2, 2]);
}
