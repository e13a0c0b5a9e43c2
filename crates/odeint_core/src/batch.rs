//! Batched integration over lanes that share dynamics and output times.
//!
//! Lanes run one after another. [`LaneSync::Independent`] gives every lane its
//! own step-size controller, so each result is bit-identical to a separate
//! [`integrate`] call. [`LaneSync::Lockstep`] drives all lanes with one shared
//! step size: a step is committed only when every lane accepts it, which is
//! how a vectorised caller sees a batch.

use crate::adjoint::{integrate_vjp, Gradients};
use crate::error::{ensure, Result};
use crate::integrate::{integrate, time_direction, Integrator, IntegratorSettings, Trajectory};
use crate::traits::{Differentiable, DynamicalSystem, Scalar};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LaneSync {
    #[default]
    Independent,
    Lockstep,
}

/// Initial state and parameters of one batch member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lane<T> {
    pub y0: Vec<T>,
    pub params: Vec<T>,
}

impl<T> Lane<T> {
    pub fn new(y0: Vec<T>, params: Vec<T>) -> Self {
        Self { y0, params }
    }
}

/// Integrates every lane over the same `times`; one trajectory per lane.
pub fn integrate_batch<S, T>(
    system: &S,
    lanes: &[Lane<T>],
    times: &[T],
    settings: &IntegratorSettings,
    sync: LaneSync,
) -> Result<Vec<Trajectory<T>>>
where
    S: DynamicalSystem<T>,
    T: Scalar,
{
    match sync {
        LaneSync::Independent => lanes
            .iter()
            .map(|lane| integrate(system, &lane.y0, times, &lane.params, settings))
            .collect(),
        LaneSync::Lockstep => integrate_lockstep(system, lanes, times, settings),
    }
}

fn shortest_step<S, T>(integrators: &[Integrator<'_, S, T>]) -> Option<T>
where
    S: DynamicalSystem<T>,
    T: Scalar,
{
    integrators
        .iter()
        .map(|integrator| integrator.step_size())
        .reduce(|a, b| if b.real().abs() < a.real().abs() { b } else { a })
}

fn integrate_lockstep<S, T>(
    system: &S,
    lanes: &[Lane<T>],
    times: &[T],
    settings: &IntegratorSettings,
) -> Result<Vec<Trajectory<T>>>
where
    S: DynamicalSystem<T>,
    T: Scalar,
{
    time_direction(times)?;
    let mut integrators = lanes
        .iter()
        .map(|lane| Integrator::new(system, &lane.y0, times, &lane.params, settings))
        .collect::<Result<Vec<_>>>()?;
    let Some(h0) = shortest_step(&integrators) else {
        return Ok(Vec::new());
    };
    for integrator in &mut integrators {
        integrator.set_step_size(h0);
    }

    let mut states: Vec<Vec<Vec<T>>> = lanes.iter().map(|lane| vec![lane.y0.clone()]).collect();
    while states[0].len() < times.len() {
        let errors = integrators
            .iter_mut()
            .map(|integrator| integrator.attempt())
            .collect::<Result<Vec<f64>>>()?;
        let all_accept = integrators
            .iter()
            .zip(&errors)
            .all(|(integrator, &error)| integrator.accepts(error));

        if all_accept {
            for ((integrator, &error), lane_states) in
                integrators.iter_mut().zip(&errors).zip(&mut states)
            {
                let dense = integrator.commit(error);
                integrator.emit(&dense, times, lane_states);
            }
        } else {
            for (integrator, &error) in integrators.iter_mut().zip(&errors) {
                if integrator.accepts(error) {
                    integrator.discard();
                } else {
                    integrator.reject(error)?;
                }
            }
        }

        if let Some(h) = shortest_step(&integrators) {
            for integrator in &mut integrators {
                integrator.set_step_size(h);
            }
        }
    }

    let trajectories: Vec<Trajectory<T>> = integrators
        .iter()
        .zip(states)
        .map(|(integrator, states)| Trajectory {
            times: times.to_vec(),
            states,
            stats: integrator.stats(),
        })
        .collect();
    let stats = trajectories[0].stats;
    debug!(
        "lockstep batch of {} lanes: {} accepted, {} rejected steps per lane",
        trajectories.len(),
        stats.accepted_steps,
        stats.rejected_steps
    );
    Ok(trajectories)
}

/// Per-lane [`integrate_vjp`]. `cotangents[lane][i]` is the cotangent of
/// `trajectories[lane].states[i]`.
pub fn integrate_vjp_batch<S: Differentiable>(
    system: &S,
    lanes: &[Lane<f64>],
    trajectories: &[Trajectory<f64>],
    cotangents: &[Vec<Vec<f64>>],
    settings: &IntegratorSettings,
) -> Result<Vec<Gradients>> {
    ensure!(
        trajectories.len() == lanes.len() && cotangents.len() == lanes.len(),
        "expected one trajectory and one cotangent set per lane ({} lanes, {} trajectories, {} cotangent sets)",
        lanes.len(),
        trajectories.len(),
        cotangents.len()
    );
    lanes
        .iter()
        .zip(trajectories)
        .zip(cotangents)
        .map(|((lane, trajectory), cotangents)| {
            integrate_vjp(system, trajectory, &lane.params, cotangents, settings)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::ForwardVjp;

    struct Growth;

    impl<T: Scalar> DynamicalSystem<T> for Growth {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: T, x: &[T], params: &[T], out: &mut [T]) {
            out[0] = params[0] * x[0];
            out[1] = -x[0] * x[1];
        }
    }

    fn lanes() -> Vec<Lane<f64>> {
        vec![
            Lane::new(vec![1.0, 1.0], vec![0.1]),
            Lane::new(vec![0.5, 2.0], vec![-2.0]),
            Lane::new(vec![3.0, 0.1], vec![0.7]),
        ]
    }

    #[test]
    fn independent_lanes_match_separate_calls() {
        let settings = IntegratorSettings::default();
        let times = [0.0, 0.5, 2.0];
        let batch =
            integrate_batch(&Growth, &lanes(), &times, &settings, LaneSync::Independent).unwrap();
        for (lane, trajectory) in lanes().iter().zip(&batch) {
            let single = integrate(&Growth, &lane.y0, &times, &lane.params, &settings).unwrap();
            assert_eq!(&single, trajectory);
        }
    }

    #[test]
    fn lockstep_lanes_share_steps_and_agree_within_tolerance() {
        let settings = IntegratorSettings::default();
        let times = [0.0, 0.5, 2.0];
        let batch =
            integrate_batch(&Growth, &lanes(), &times, &settings, LaneSync::Lockstep).unwrap();
        let first = batch[0].stats;
        for (lane, trajectory) in lanes().iter().zip(&batch) {
            assert_eq!(trajectory.stats.accepted_steps, first.accepted_steps);
            assert_eq!(trajectory.stats.rejected_steps, first.rejected_steps);
            let single = integrate(&Growth, &lane.y0, &times, &lane.params, &settings).unwrap();
            assert_eq!(trajectory.states[0], lane.y0);
            for (a, b) in trajectory.final_state().iter().zip(single.final_state()) {
                assert!((a - b).abs() < 1e-5 * (1.0 + b.abs()), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn fixed_step_lockstep_over_zero_lanes_states() {
        let settings = IntegratorSettings::default().with_fixed_step(0.25);
        let zeros = vec![Lane::new(vec![0.0, 0.0], vec![1.0]); 5];
        let batch =
            integrate_batch(&Growth, &zeros, &[0.0, 1.0], &settings, LaneSync::Lockstep).unwrap();
        assert_eq!(batch.len(), 5);
        for trajectory in &batch {
            assert_eq!(trajectory.final_state(), &[0.0, 0.0]);
            assert_eq!(trajectory.stats.accepted_steps, 4);
        }
    }

    #[test]
    fn empty_batch_is_empty() {
        let settings = IntegratorSettings::default();
        let batch = integrate_batch::<_, f64>(&Growth, &[], &[0.0, 1.0], &settings, LaneSync::Lockstep)
            .unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn batch_gradients_match_single_lane_gradients() {
        let settings = IntegratorSettings::default().with_tolerances(1e-9, 1e-11);
        let system = ForwardVjp::new(Growth);
        let times = [0.0, 1.0];
        let lanes = lanes();
        let trajectories =
            integrate_batch(&system, &lanes, &times, &settings, LaneSync::Independent).unwrap();
        let cotangents: Vec<Vec<Vec<f64>>> = lanes
            .iter()
            .map(|_| vec![vec![0.0, 0.0], vec![1.0, 1.0]])
            .collect();
        let batch =
            integrate_vjp_batch(&system, &lanes, &trajectories, &cotangents, &settings).unwrap();
        assert_eq!(batch.len(), 3);
        for ((lane, trajectory), grads) in lanes.iter().zip(&trajectories).zip(&batch) {
            let single =
                integrate_vjp(&system, trajectory, &lane.params, &cotangents[0], &settings)
                    .unwrap();
            assert_eq!(&single, grads);
        }
        assert!(integrate_vjp_batch(&system, &lanes, &trajectories[..1], &cotangents, &settings)
            .is_err());
    }
}
