//! Reverse-mode gradients of a trajectory by the continuous adjoint method.
//!
//! The backward pass integrates the augmented state `[y | a_y | a_t | a_p]`
//! from the last output time to the first, one output interval at a time,
//! in the reversed time variable `s = -t`. Each segment restarts `y` from the
//! stored forward solution, so forward and backward errors do not compound
//! across segments. The vector-Jacobian products come from the system's
//! [`Differentiable`] implementation.

use crate::autodiff::{Dual, ForwardVjp};
use crate::dynamics::{Structured, TreeSystem};
use crate::error::{ensure, OdeError, Result};
use crate::integrate::{integrate, time_direction, IntegrationStats, IntegratorSettings, Trajectory};
use crate::state::{Layout, State};
use crate::traits::{Differentiable, DynamicalSystem};
use log::debug;
use serde::{Deserialize, Serialize};

/// Cotangents of the inputs of a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gradients {
    pub y0: Vec<f64>,
    /// One entry per output time.
    pub times: Vec<f64>,
    pub params: Vec<f64>,
}

/// [`Gradients`] shaped like the initial state and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeGradients {
    pub y0: State<f64>,
    pub times: Vec<f64>,
    pub params: State<f64>,
}

/// Adjoint dynamics in reversed time:
/// `d/ds [y, a_y, a_t, a_p] = [-f, a_yᵀ ∂f/∂y, a_yᵀ ∂f/∂t, a_yᵀ ∂f/∂p]`
/// evaluated at `t = -s`.
struct AugmentedDynamics<'a, S> {
    system: &'a S,
    n: usize,
    p: usize,
}

impl<'a, S: Differentiable> AugmentedDynamics<'a, S> {
    fn new(system: &'a S, n: usize, p: usize) -> Self {
        Self { system, n, p }
    }
}

impl<S: Differentiable> DynamicalSystem<f64> for AugmentedDynamics<'_, S> {
    fn dimension(&self) -> usize {
        2 * self.n + 1 + self.p
    }

    fn apply(&self, s: f64, z: &[f64], params: &[f64], out: &mut [f64]) {
        let n = self.n;
        let t = -s;
        let (y, rest) = z.split_at(n);
        let a_y = &rest[..n];

        let (dy, rest) = out.split_at_mut(n);
        let (da_y, rest) = rest.split_at_mut(n);
        let (da_t, da_p) = rest.split_at_mut(1);

        self.system.apply(t, y, params, dy);
        for v in dy.iter_mut() {
            *v = -*v;
        }
        da_t[0] = self.system.vjp(t, y, params, a_y, da_y, da_p);
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn check_len(what: &str, index: usize, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(OdeError::ShapeMismatch {
            expected: format!("{expected} components"),
            found: format!("{found} components in {what} {index}"),
        });
    }
    Ok(())
}

/// Pulls the cotangents of every output state back to `y0`, the output times
/// and the parameters.
///
/// `trajectory` must come from [`integrate`] with the same `system`, `params`
/// and `settings`; `cotangents[i]` is the cotangent of `trajectory.states[i]`.
/// The backward segments use `settings` unchanged, so their fatal errors
/// surface exactly as in the forward pass.
pub fn integrate_vjp<S: Differentiable>(
    system: &S,
    trajectory: &Trajectory<f64>,
    params: &[f64],
    cotangents: &[Vec<f64>],
    settings: &IntegratorSettings,
) -> Result<Gradients> {
    let times = trajectory.times.as_slice();
    time_direction(times)?;
    let count = times.len();
    ensure!(
        trajectory.states.len() == count,
        "trajectory has {} states for {} times",
        trajectory.states.len(),
        count
    );
    ensure!(
        cotangents.len() == count,
        "expected {} cotangents, one per output time, got {}",
        count,
        cotangents.len()
    );
    system.validate(times[0], &trajectory.states[0], params)?;
    let n = system.dimension();
    for (i, (state, cotangent)) in trajectory.states.iter().zip(cotangents).enumerate() {
        check_len("state", i, n, state.len())?;
        check_len("cotangent", i, n, cotangent.len())?;
    }

    let p = params.len();
    let augmented = AugmentedDynamics::new(system, n, p);
    let mut z = vec![0.0; 2 * n + 1 + p];
    z[n..2 * n].copy_from_slice(&cotangents[count - 1]);
    let mut grad_times = vec![0.0; count];
    let mut f = vec![0.0; n];
    let mut backward = IntegrationStats::default();

    for i in (1..count).rev() {
        system.apply(times[i], &trajectory.states[i], params, &mut f);
        grad_times[i] = dot(&cotangents[i], &f);
        z[2 * n] -= grad_times[i];
        z[..n].copy_from_slice(&trajectory.states[i]);

        let segment = integrate(&augmented, &z, &[-times[i], -times[i - 1]], params, settings)?;
        debug!(
            "adjoint segment {} -> {}: {} accepted, {} rejected",
            times[i], times[i - 1], segment.stats.accepted_steps, segment.stats.rejected_steps
        );
        backward += segment.stats;
        z.copy_from_slice(segment.final_state());
        for (a, g) in z[n..2 * n].iter_mut().zip(&cotangents[i - 1]) {
            *a += g;
        }
    }
    grad_times[0] = z[2 * n];
    debug!(
        "adjoint pass over {} segments: {} accepted, {} rejected, {} evaluations",
        count - 1,
        backward.accepted_steps,
        backward.rejected_steps,
        backward.evaluations
    );

    Ok(Gradients {
        y0: z[n..2 * n].to_vec(),
        times: grad_times,
        params: z[2 * n + 1..].to_vec(),
    })
}

fn check_layout(layout: &Layout, what: &str, states: &[State<f64>]) -> Result<Vec<Vec<f64>>> {
    states
        .iter()
        .enumerate()
        .map(|(i, state)| {
            if !layout.matches(state) {
                return Err(OdeError::ShapeMismatch {
                    expected: layout.to_string(),
                    found: format!("{} for {what} {i}", state.layout()),
                });
            }
            Ok(state.to_flat())
        })
        .collect()
}

/// [`integrate_vjp`] over nested states.
///
/// `system` must be evaluable on both `f64` and [`Dual`]; its vector-Jacobian
/// products are assembled by [`ForwardVjp`]. Cotangents must have the
/// structure of the states they belong to.
pub fn odeint_vjp<S>(
    system: S,
    trajectory: &[State<f64>],
    times: &[f64],
    params: &State<f64>,
    cotangents: &[State<f64>],
    settings: &IntegratorSettings,
) -> Result<TreeGradients>
where
    S: TreeSystem<f64> + TreeSystem<Dual>,
{
    time_direction(times)?;
    ensure!(
        trajectory.len() == times.len(),
        "trajectory has {} states for {} times",
        trajectory.len(),
        times.len()
    );
    ensure!(
        cotangents.len() == times.len(),
        "expected {} cotangents, one per output time, got {}",
        times.len(),
        cotangents.len()
    );
    let structured = Structured::new(system, times[0], &trajectory[0], params)?;
    let state_layout = structured.state_layout().clone();
    let param_layout = structured.param_layout().clone();

    let flat = Trajectory {
        times: times.to_vec(),
        states: check_layout(&state_layout, "state", trajectory)?,
        stats: Default::default(),
    };
    let flat_cotangents = check_layout(&state_layout, "cotangent", cotangents)?;

    let differentiable = ForwardVjp::new(structured);
    let gradients = integrate_vjp(
        &differentiable,
        &flat,
        &params.to_flat(),
        &flat_cotangents,
        settings,
    )?;
    Ok(TreeGradients {
        y0: state_layout.unflatten(&gradients.y0)?,
        times: gradients.times,
        params: param_layout.unflatten(&gradients.params)?,
    })
}
