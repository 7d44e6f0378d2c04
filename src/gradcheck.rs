//! Finite-difference gradient checking.
//!
//! Compares the gradient the engine computes for `sum(f(inputs))` with a
//! central difference of the same function evaluated in inference mode.

use log::debug;

use crate::array::{self, Array};
use crate::error::{AutogradError, Result};
use crate::graph::{Graph, GraphConfig};
use crate::variable::Var;

/// Step size and tolerances. Values are `f32`, so the defaults are looser
/// than a double-precision checker would use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradCheckConfig {
    /// Relative step: each element moves by `eps * (1 + |x|)`.
    pub eps: f32,
    pub rtol: f32,
    pub atol: f32,
}

impl Default for GradCheckConfig {
    fn default() -> Self {
        GradCheckConfig {
            eps: 1e-2,
            rtol: 1e-2,
            atol: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradCheckReport {
    pub max_abs_error: f32,
    pub max_rel_error: f32,
    /// Number of elements compared.
    pub checked: usize,
}

/// Checks the analytic gradient of `f` with respect to every input.
///
/// `f` is called once on a training graph and then twice per input element
/// on throwaway inference graphs, so it must be deterministic.
pub fn check<F>(inputs: &[Array], f: F, config: GradCheckConfig) -> Result<GradCheckReport>
where
    F: for<'g> Fn(&'g Graph, &[Var<'g>]) -> Var<'g>,
{
    let analytic = analytic_gradients(inputs, &f)?;

    let mut report = GradCheckReport {
        max_abs_error: 0.0,
        max_rel_error: 0.0,
        checked: 0,
    };
    for (i, input) in inputs.iter().enumerate() {
        for (j, (&x, &a)) in input.iter().zip(analytic[i].iter()).enumerate() {
            let h = config.eps * (1.0 + x.abs());
            let f_plus = evaluate(inputs, i, j, h, &f)?;
            let f_minus = evaluate(inputs, i, j, -h, &f)?;
            let numeric = (f_plus - f_minus) / (2.0 * h);

            let abs_error = (a - numeric).abs();
            let scale = a.abs().max(numeric.abs());
            if abs_error > config.atol + config.rtol * scale {
                return Err(AutogradError::GradCheck {
                    input: i,
                    index: j,
                    analytic: a,
                    numeric,
                });
            }
            report.max_abs_error = report.max_abs_error.max(abs_error);
            if scale > 0.0 {
                report.max_rel_error = report.max_rel_error.max(abs_error / scale);
            }
            report.checked += 1;
        }
    }
    debug!("gradcheck passed: {report:?}");
    Ok(report)
}

fn analytic_gradients<F>(inputs: &[Array], f: &F) -> Result<Vec<Array>>
where
    F: for<'g> Fn(&'g Graph, &[Var<'g>]) -> Var<'g>,
{
    let graph = Graph::new();
    let vars: Vec<Var<'_>> = inputs.iter().map(|a| graph.param(a.clone())).collect();
    let loss = f(&graph, &vars).sum();
    loss.try_backward()?;
    vars.iter()
        .map(|v| {
            // An input that does not reach the output has a zero gradient.
            match graph.grad(v.id())? {
                Some(g) => Ok(g),
                None => Ok(array::zeros(&graph.shape(v.id())?)),
            }
        })
        .collect()
}

fn evaluate<F>(inputs: &[Array], input: usize, index: usize, delta: f32, f: &F) -> Result<f32>
where
    F: for<'g> Fn(&'g Graph, &[Var<'g>]) -> Var<'g>,
{
    let graph = Graph::with_config(GraphConfig::default().training(false));
    let vars: Vec<Var<'_>> = inputs
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let mut value = a.clone();
            if i == input {
                if let Some(x) = value.iter_mut().nth(index) {
                    *x += delta;
                }
            }
            graph.constant(value)
        })
        .collect();
    let out = f(&graph, &vars);
    Ok(graph.value(out.id())?.sum())
}
