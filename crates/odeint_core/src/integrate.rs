//! Forward integration driver.
//!
//! The driver owns one stepper and one controller per integration call and
//! walks the requested output times: attempt a step, commit it and emit every
//! output time it covers, or shrink and retry from the same point.

use crate::controller::{initial_step, ControllerSettings, PiController};
use crate::dynamics::{Structured, TreeSystem};
use crate::error::{ensure, OdeError, Result};
use crate::interpolate::QuarticInterpolant;
use crate::solvers::{Dopri5, EVALUATIONS_PER_STEP};
use crate::state::State;
use crate::traits::{DynamicalSystem, Scalar};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type")]
pub enum StepControl {
    /// Embedded error estimate with PI step-size control.
    #[default]
    Adaptive,
    /// Constant step magnitude, every attempt accepted.
    Fixed { step: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub rtol: f64,
    pub atol: f64,
    /// Bound on accepted plus rejected attempts; unbounded when `None`.
    pub max_steps: Option<usize>,
    pub max_step: Option<f64>,
    pub min_step: f64,
    pub initial_step: Option<f64>,
    pub step_control: StepControl,
    pub controller: ControllerSettings,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            rtol: 1e-7,
            atol: 1e-9,
            max_steps: None,
            max_step: None,
            min_step: 0.0,
            initial_step: None,
            step_control: StepControl::Adaptive,
            controller: ControllerSettings::default(),
        }
    }
}

impl IntegratorSettings {
    pub fn with_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.rtol = rtol;
        self.atol = atol;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_max_step(mut self, max_step: f64) -> Self {
        self.max_step = Some(max_step);
        self
    }

    pub fn with_min_step(mut self, min_step: f64) -> Self {
        self.min_step = min_step;
        self
    }

    pub fn with_initial_step(mut self, initial_step: f64) -> Self {
        self.initial_step = Some(initial_step);
        self
    }

    pub fn with_fixed_step(mut self, step: f64) -> Self {
        self.step_control = StepControl::Fixed { step };
        self
    }

    pub fn with_controller(mut self, controller: ControllerSettings) -> Self {
        self.controller = controller;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            self.rtol >= 0.0 && self.atol >= 0.0,
            "tolerances must be non-negative (rtol = {}, atol = {})",
            self.rtol,
            self.atol
        );
        ensure!(
            self.rtol > 0.0 || self.atol > 0.0,
            "at least one of rtol and atol must be positive"
        );
        ensure!(
            self.min_step >= 0.0 && self.min_step.is_finite(),
            "min_step must be finite and non-negative, got {}",
            self.min_step
        );
        if let Some(max_step) = self.max_step {
            ensure!(max_step > 0.0, "max_step must be positive, got {max_step}");
        }
        if let Some(initial) = self.initial_step {
            ensure!(
                initial > 0.0 && initial.is_finite(),
                "initial_step must be finite and positive, got {initial}"
            );
        }
        if let StepControl::Fixed { step } = self.step_control {
            ensure!(
                step > 0.0 && step.is_finite(),
                "fixed step must be finite and positive, got {step}"
            );
        }
        let c = &self.controller;
        ensure!(c.safety > 0.0, "controller safety must be positive");
        ensure!(
            c.min_factor > 0.0 && c.min_factor <= 1.0 && c.max_factor >= 1.0,
            "controller factors must satisfy 0 < min_factor <= 1 <= max_factor"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    /// Dynamics evaluations, including the initial derivative and the initial step estimate.
    pub evaluations: usize,
}

impl std::ops::AddAssign for IntegrationStats {
    fn add_assign(&mut self, other: Self) {
        self.accepted_steps += other.accepted_steps;
        self.rejected_steps += other.rejected_steps;
        self.evaluations += other.evaluations;
    }
}

/// The solution at every requested time, `states[0]` being `y0` itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory<T> {
    pub times: Vec<T>,
    pub states: Vec<Vec<T>>,
    pub stats: IntegrationStats,
}

impl<T> Trajectory<T> {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn final_state(&self) -> &[T] {
        self.states.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Checks that `times` has at least two finite, strictly monotone entries
/// and returns the direction of integration (`1.0` or `-1.0`).
pub(crate) fn time_direction<T: Scalar>(times: &[T]) -> Result<f64> {
    ensure!(
        times.len() >= 2,
        "at least two output times are required, got {}",
        times.len()
    );
    ensure!(
        times.iter().all(|t| t.real().is_finite()),
        "output times must be finite"
    );
    let direction = (times[1] - times[0]).real().signum();
    let monotone = times
        .windows(2)
        .all(|w| (w[1] - w[0]).real() * direction > 0.0);
    ensure!(monotone, "output times must be strictly monotone");
    Ok(direction)
}

/// Step-by-step driver state. Public entry points loop over
/// [`attempt`](Self::attempt) and either [`commit`](Self::commit) or
/// [`reject`](Self::reject); the lockstep batch driver coordinates several.
pub(crate) struct Integrator<'a, S, T: Scalar> {
    system: &'a S,
    params: &'a [T],
    settings: &'a IntegratorSettings,
    controller: PiController,
    stepper: Dopri5<T>,
    direction: f64,
    t: T,
    t_final: T,
    y: Vec<T>,
    f: Vec<T>,
    /// Signed step proposed for the next attempt.
    h: T,
    /// Signed step of the last attempt after clamping.
    h_attempt: T,
    reaches_end: bool,
    stats: IntegrationStats,
}

impl<'a, S, T> Integrator<'a, S, T>
where
    S: DynamicalSystem<T>,
    T: Scalar,
{
    pub(crate) fn new(
        system: &'a S,
        y0: &[T],
        times: &[T],
        params: &'a [T],
        settings: &'a IntegratorSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let direction = time_direction(times)?;
        let t0 = times[0];
        let t_final = times[times.len() - 1];
        system.validate(t0, y0, params)?;

        let n = y0.len();
        let mut f = vec![T::zero(); n];
        system.apply(t0, y0, params, &mut f);
        let mut stats = IntegrationStats {
            evaluations: 1,
            ..IntegrationStats::default()
        };

        if let StepControl::Fixed { step } = settings.step_control {
            let step = settings.max_step.map_or(step, |m| step.min(m));
            let reach = t0.real().abs().max(t_final.real().abs());
            let floor = settings.min_step.max(16.0 * f64::EPSILON * reach);
            if step < floor {
                warn!("fixed step {step:e} is below {floor:e} over [{}, {}]", t0.real(), t_final.real());
                return Err(OdeError::StepSizeUnderflow {
                    t: t0.real(),
                    h: step,
                    min: floor,
                });
            }
        }

        let span = (t_final - t0).real().abs();
        let h = match (settings.step_control, settings.initial_step) {
            (StepControl::Fixed { step }, _) => T::lit(direction * step),
            (StepControl::Adaptive, Some(initial)) => {
                let initial = settings.max_step.map_or(initial, |m| initial.min(m));
                T::lit(direction * initial)
            }
            (StepControl::Adaptive, None) => {
                stats.evaluations += 1;
                initial_step(
                    system,
                    t0,
                    y0,
                    &f,
                    params,
                    settings.rtol,
                    settings.atol,
                    direction,
                    span,
                    settings.max_step,
                )
            }
        };

        Ok(Self {
            system,
            params,
            settings,
            controller: PiController::new(settings.controller),
            stepper: Dopri5::new(n),
            direction,
            t: t0,
            t_final,
            y: y0.to_vec(),
            f,
            h,
            h_attempt: h,
            reaches_end: false,
            stats,
        })
    }

    fn fixed(&self) -> bool {
        matches!(self.settings.step_control, StepControl::Fixed { .. })
    }

    /// Attempts a step from the current point and returns its error ratio.
    /// The step is clamped to `max_step` and to the final time.
    pub(crate) fn attempt(&mut self) -> Result<f64> {
        if let Some(max_steps) = self.settings.max_steps {
            if self.stats.accepted_steps + self.stats.rejected_steps >= max_steps {
                warn!(
                    "aborting at t = {} after {} attempted steps",
                    self.t.real(),
                    max_steps
                );
                return Err(OdeError::MaxStepsExceeded {
                    max_steps,
                    t: self.t.real(),
                });
            }
        }

        let mut magnitude = self.h.real().abs();
        if let Some(max_step) = self.settings.max_step {
            magnitude = magnitude.min(max_step);
        }
        let remaining = self.t_final - self.t;
        self.reaches_end = magnitude >= remaining.real().abs();
        self.h_attempt = if self.reaches_end {
            remaining
        } else {
            T::lit(self.direction * magnitude)
        };

        self.stats.evaluations += EVALUATIONS_PER_STEP;
        Ok(self.stepper.step(
            self.system,
            self.t,
            &self.y,
            &self.f,
            self.h_attempt,
            self.params,
            self.settings.rtol,
            self.settings.atol,
        ))
    }

    /// A non-finite attempt is never accepted, even with fixed steps.
    pub(crate) fn accepts(&self, error: f64) -> bool {
        error.is_finite() && (self.fixed() || self.controller.accept(error))
    }

    /// Moves to the end of the last attempt and returns its dense output.
    pub(crate) fn commit(&mut self, error: f64) -> QuarticInterpolant<T> {
        let h = self.h_attempt;
        let dense = QuarticInterpolant::fit(
            self.t,
            h,
            &self.y,
            self.stepper.solution(),
            self.stepper.stages(),
        );
        self.t = if self.reaches_end { self.t_final } else { self.t + h };
        self.y.copy_from_slice(self.stepper.solution());
        self.f.copy_from_slice(self.stepper.end_derivative());
        self.stats.accepted_steps += 1;
        if !self.fixed() {
            self.h = self.controller.on_accept(h, error);
        }
        dense
    }

    /// Shrinks the step after a failed attempt. Fixed steps cannot shrink,
    /// so a rejection there is an underflow.
    pub(crate) fn reject(&mut self, error: f64) -> Result<()> {
        self.stats.rejected_steps += 1;
        let t = self.t.real();
        let floor = self
            .settings
            .min_step
            .max(16.0 * f64::EPSILON * t.abs());
        if self.fixed() {
            let h = self.h_attempt.real().abs();
            warn!("fixed step {h:e} at t = {t} produced error ratio {error:e}");
            return Err(OdeError::StepSizeUnderflow {
                t,
                h,
                min: floor.max(h),
            });
        }
        let h = self.controller.on_reject(self.h_attempt, error);
        let magnitude = h.real().abs();
        if magnitude < floor || magnitude == 0.0 || !magnitude.is_finite() {
            warn!("step size {magnitude:e} at t = {t} fell below {floor:e}");
            return Err(OdeError::StepSizeUnderflow {
                t,
                h: magnitude,
                min: floor,
            });
        }
        trace!(
            "rejected step of {:e} at t = {} (error ratio {:e}), retrying with {:e}",
            self.h_attempt.real(),
            t,
            error,
            h.real()
        );
        self.h = h;
        Ok(())
    }

    /// Drops an acceptable attempt without touching the controller; counts
    /// as a rejected attempt.
    pub(crate) fn discard(&mut self) {
        self.stats.rejected_steps += 1;
    }

    /// Appends the state at every output time covered by the last committed
    /// step. A time equal to the step end gets the step's solution exactly.
    pub(crate) fn emit(&self, dense: &QuarticInterpolant<T>, times: &[T], states: &mut Vec<Vec<T>>) {
        while states.len() < times.len() {
            let target = times[states.len()];
            let ahead = (self.t - target).real() * self.direction;
            if ahead < 0.0 {
                break;
            }
            if ahead == 0.0 {
                states.push(self.y.clone());
            } else {
                states.push(dense.evaluate_at(target));
            }
        }
    }

    pub(crate) fn time(&self) -> T {
        self.t
    }

    pub(crate) fn step_size(&self) -> T {
        self.h
    }

    pub(crate) fn set_step_size(&mut self, h: T) {
        self.h = h;
    }

    pub(crate) fn stats(&self) -> IntegrationStats {
        self.stats
    }
}

/// Integrates `system` from `y0` at `times[0]` and returns the solution at
/// every entry of `times`.
///
/// `times` must be strictly monotone, ascending or descending. The result is
/// deterministic: the same inputs give bit-identical trajectories.
pub fn integrate<S, T>(
    system: &S,
    y0: &[T],
    times: &[T],
    params: &[T],
    settings: &IntegratorSettings,
) -> Result<Trajectory<T>>
where
    S: DynamicalSystem<T>,
    T: Scalar,
{
    let mut integrator = Integrator::new(system, y0, times, params, settings)?;
    let mut states = Vec::with_capacity(times.len());
    states.push(y0.to_vec());

    while states.len() < times.len() {
        let error = integrator.attempt()?;
        if integrator.accepts(error) {
            let dense = integrator.commit(error);
            integrator.emit(&dense, times, &mut states);
        } else {
            integrator.reject(error)?;
        }
    }

    let stats = integrator.stats();
    debug!(
        "integrated {} -> {}: {} accepted, {} rejected, {} evaluations",
        times[0].real(),
        integrator.time().real(),
        stats.accepted_steps,
        stats.rejected_steps,
        stats.evaluations
    );
    Ok(Trajectory {
        times: times.to_vec(),
        states,
        stats,
    })
}

/// [`integrate`] over nested states. The result has one entry per time,
/// each with the structure of `y0`.
pub fn odeint<S, T>(
    system: S,
    y0: &State<T>,
    times: &[T],
    params: &State<T>,
    settings: &IntegratorSettings,
) -> Result<Vec<State<T>>>
where
    S: TreeSystem<T>,
    T: Scalar,
{
    time_direction(times)?;
    let structured = Structured::new(system, times[0], y0, params)?;
    let (layout, flat) = y0.flatten();
    let trajectory = integrate(&structured, &flat, times, &params.to_flat(), settings)?;
    trajectory
        .states
        .iter()
        .map(|state| layout.unflatten(state))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::FnSystem;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    struct Decay;

    impl<T: Scalar> DynamicalSystem<T> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: T, x: &[T], params: &[T], out: &mut [T]) {
            out[0] = -params[0] * x[0];
        }
    }

    #[test]
    fn decay_matches_exponential() {
        let times: [f64; 4] = [0.0, 0.5, 1.0, 2.0];
        let settings = IntegratorSettings::default();
        let trajectory = integrate(&Decay, &[1.0], &times, &[0.7], &settings).unwrap();
        assert_eq!(trajectory.len(), 4);
        assert_eq!(trajectory.states[0], vec![1.0]);
        for (t, state) in times.iter().zip(&trajectory.states) {
            assert!((state[0] - (-0.7 * t).exp()).abs() < 1e-6, "t = {t}");
        }
        assert!(trajectory.stats.accepted_steps > 0);
        assert_eq!(
            trajectory.stats.evaluations,
            2 + EVALUATIONS_PER_STEP
                * (trajectory.stats.accepted_steps + trajectory.stats.rejected_steps)
        );
    }

    #[test]
    fn dense_output_between_steps_is_accurate() {
        let times: Vec<f64> = (0..=40).map(|i| i as f64 * 0.05).collect();
        let oscillator = FnSystem::new(2, |_t, x: &[f64], _p: &[f64], out: &mut [f64]| {
            out[0] = x[1];
            out[1] = -x[0];
        });
        let settings = IntegratorSettings::default().with_tolerances(1e-6, 1e-9);
        let trajectory = integrate(&oscillator, &[0.0, 1.0], &times, &[], &settings).unwrap();
        // far fewer steps than output times, so most outputs are interpolated
        assert!(trajectory.stats.accepted_steps < times.len() / 2);
        for (t, state) in times.iter().zip(&trajectory.states) {
            assert!((state[0] - t.sin()).abs() < 1e-5, "t = {t}");
            assert!((state[1] - t.cos()).abs() < 1e-5, "t = {t}");
        }
    }

    #[test]
    fn descending_times_integrate_backwards() {
        let times = [1.0, 0.5, 0.0];
        let trajectory =
            integrate(&Decay, &[1.0], &times, &[1.0], &IntegratorSettings::default()).unwrap();
        assert!((trajectory.final_state()[0] - 1f64.exp()).abs() < 1e-5);
        assert!((trajectory.states[1][0] - 0.5f64.exp()).abs() < 1e-5);
    }

    #[test]
    fn fixed_steps_accept_every_attempt() {
        let settings = IntegratorSettings::default().with_fixed_step(0.3);
        let trajectory = integrate(&Decay, &[1.0], &[0.0, 1.0], &[1.0], &settings).unwrap();
        // 0.3, 0.6, 0.9 and a clamped final step of 0.1
        assert_eq!(trajectory.stats.accepted_steps, 4);
        assert_eq!(trajectory.stats.rejected_steps, 0);
        assert!((trajectory.final_state()[0] - (-1f64).exp()).abs() < 1e-5);
    }

    #[test]
    fn max_step_bounds_every_step() {
        let settings = IntegratorSettings::default().with_max_step(0.01);
        let trajectory = integrate(&Decay, &[1.0], &[0.0, 1.0], &[0.1], &settings).unwrap();
        assert!(trajectory.stats.accepted_steps >= 100);
    }

    #[test]
    fn step_limit_aborts() {
        let settings = IntegratorSettings::default().with_max_steps(3);
        let result = integrate(&Decay, &[1.0], &[0.0, 100.0], &[1.0], &settings);
        assert!(matches!(
            result,
            Err(OdeError::MaxStepsExceeded { max_steps: 3, .. })
        ));
    }

    #[test]
    fn blowup_reports_underflow() {
        // y' = y^2 from y = 1 explodes at t = 1
        let blowup = FnSystem::new(1, |_t, x: &[f64], _p: &[f64], out: &mut [f64]| {
            out[0] = x[0] * x[0];
        });
        let settings = IntegratorSettings::default().with_min_step(1e-6);
        assert_err_contains(
            integrate(&blowup, &[1.0], &[0.0, 2.0], &[], &settings),
            "fell below the minimum step",
        );
    }

    #[test]
    fn nan_dynamics_underflow_without_min_step() {
        let broken = FnSystem::new(1, |t: f64, _x: &[f64], _p: &[f64], out: &mut [f64]| {
            out[0] = if t > 0.5 { f64::NAN } else { 1.0 };
        });
        let result = integrate(&broken, &[0.0], &[0.0, 1.0], &[], &IntegratorSettings::default());
        assert!(matches!(result, Err(OdeError::StepSizeUnderflow { .. })));
    }

    #[test]
    fn non_finite_attempts_are_retried_with_smaller_steps() {
        // y' = -sqrt(y) reaches y = 0 at t = 2; an oversized first step
        // overshoots into negative y where sqrt is NaN
        let sink = FnSystem::new(1, |_t, x: &[f64], _p: &[f64], out: &mut [f64]| {
            out[0] = -x[0].sqrt();
        });
        let settings = IntegratorSettings::default().with_initial_step(1.9);
        let trajectory = integrate(&sink, &[1.0], &[0.0, 1.9], &[], &settings).unwrap();
        assert!(trajectory.stats.rejected_steps > 0);
        assert!((trajectory.final_state()[0] - 0.0025).abs() < 1e-6);
    }

    #[test]
    fn fixed_step_below_time_resolution_underflows() {
        let drift = FnSystem::new(1, |_t, _x: &[f64], _p: &[f64], out: &mut [f64]| {
            out[0] = 1.0;
        });
        let settings = IntegratorSettings::default().with_fixed_step(1e-9);
        let result = integrate(&drift, &[0.0], &[1e8, 1e8 + 1.0], &[], &settings);
        assert!(matches!(result, Err(OdeError::StepSizeUnderflow { h, .. }) if h == 1e-9));

        let floored = settings.with_min_step(1e-6);
        let result = integrate(&drift, &[0.0], &[0.0, 1.0], &[], &floored);
        assert!(matches!(result, Err(OdeError::StepSizeUnderflow { min, .. }) if min == 1e-6));
    }

    #[test]
    fn fixed_steps_never_accept_non_finite_states() {
        let broken = FnSystem::new(1, |t: f64, _x: &[f64], _p: &[f64], out: &mut [f64]| {
            out[0] = if t > 0.5 { f64::NAN } else { 1.0 };
        });
        let settings = IntegratorSettings::default().with_fixed_step(0.1);
        match integrate(&broken, &[0.0], &[0.0, 1.0], &[], &settings) {
            Err(OdeError::StepSizeUnderflow { t, h, .. }) => {
                assert!(t <= 0.5 + 1e-12, "t = {t}");
                assert_eq!(h, 0.1);
            }
            other => panic!("expected step size underflow, got {other:?}"),
        }
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let settings = IntegratorSettings::default();
        assert_err_contains(
            integrate(&Decay, &[1.0], &[0.0], &[1.0], &settings),
            "at least two output times",
        );
        assert_err_contains(
            integrate(&Decay, &[1.0], &[0.0, 1.0, 1.0], &[1.0], &settings),
            "strictly monotone",
        );
        assert_err_contains(
            integrate(&Decay, &[1.0], &[0.0, 1.0, 0.5], &[1.0], &settings),
            "strictly monotone",
        );
        assert_err_contains(
            integrate(&Decay, &[1.0], &[0.0, f64::NAN], &[1.0], &settings),
            "finite",
        );
        let negative = IntegratorSettings::default().with_tolerances(-1.0, 1e-9);
        assert_err_contains(
            integrate(&Decay, &[1.0], &[0.0, 1.0], &[1.0], &negative),
            "non-negative",
        );
        let zero = IntegratorSettings::default().with_tolerances(0.0, 0.0);
        assert_err_contains(
            integrate(&Decay, &[1.0], &[0.0, 1.0], &[1.0], &zero),
            "must be positive",
        );
        assert!(matches!(
            integrate(&Decay, &[1.0, 2.0], &[0.0, 1.0], &[1.0], &settings),
            Err(OdeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn repeated_calls_are_bit_identical() {
        let times = [0.0, 0.3, 1.7];
        let settings = IntegratorSettings::default();
        let a = integrate(&Decay, &[2.0], &times, &[1.3], &settings).unwrap();
        let b = integrate(&Decay, &[2.0], &times, &[1.3], &settings).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn settings_round_trip_through_json_with_defaults() {
        let settings: IntegratorSettings =
            serde_json::from_str(r#"{"rtol": 1e-4, "step_control": {"type": "Fixed", "step": 0.1}}"#)
                .unwrap();
        assert_eq!(settings.rtol, 1e-4);
        assert_eq!(settings.atol, 1e-9);
        assert_eq!(settings.step_control, StepControl::Fixed { step: 0.1 });
        assert_eq!(settings.controller, ControllerSettings::default());
    }

    #[test]
    fn odeint_keeps_state_structure() {
        let y0 = State::sequence(vec![
            State::scalar(-0.1),
            State::array(vec![1, 1, 1], vec![0.1]).unwrap(),
        ]);
        let negate = |_t: f64, y: &State<f64>, _p: &State<f64>| y.map(|v| -v);
        let states = odeint(negate, &y0, &[0.0, 1.0], &State::empty(), &IntegratorSettings::default())
            .unwrap();
        assert_eq!(states.len(), 2);
        assert!(states[1].same_structure(&y0));
        let flat = states[1].to_flat();
        let decay = (-1f64).exp();
        assert!((flat[0] + 0.1 * decay).abs() < 1e-7);
        assert!((flat[1] - 0.1 * decay).abs() < 1e-7);
    }
}
