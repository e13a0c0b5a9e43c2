//! Step-size control: PI acceptance law and the initial step heuristic.

use crate::traits::{DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};

/// Coefficients of the PI step-size law
/// `h_next = h * clamp(safety * err^-alpha * err_prev^beta, min_factor, max_factor)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub safety: f64,
    pub alpha: f64,
    pub beta: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        // Gustafsson's PI gains for a 5(4) pair.
        Self {
            safety: 0.9,
            alpha: 0.7 / 5.0,
            beta: 0.4 / 5.0,
            min_factor: 0.2,
            max_factor: 10.0,
        }
    }
}

/// Accepted errors are remembered no smaller than this.
const MIN_REMEMBERED_ERROR: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct PiController {
    settings: ControllerSettings,
    prev_error: f64,
}

impl PiController {
    pub fn new(settings: ControllerSettings) -> Self {
        Self {
            settings,
            prev_error: 1.0,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Error of the last accepted step (1 after a rejection).
    pub fn prev_error(&self) -> f64 {
        self.prev_error
    }

    pub fn accept(&self, error: f64) -> bool {
        error <= 1.0
    }

    /// Pure PI law. `accepted` caps the growth at 1 for rejected steps.
    pub fn propose_next_h<T: Scalar>(&self, h: T, error: f64, error_prev: f64, accepted: bool) -> T {
        h * T::lit(self.factor(error, error_prev, accepted))
    }

    fn factor(&self, error: f64, error_prev: f64, accepted: bool) -> f64 {
        let s = &self.settings;
        let max_factor = if accepted { s.max_factor } else { s.max_factor.min(1.0) };
        if error == 0.0 {
            return max_factor;
        }
        let raw = s.safety * error.powf(-s.alpha) * error_prev.powf(s.beta);
        if raw.is_nan() {
            return s.min_factor;
        }
        raw.max(s.min_factor).min(max_factor)
    }

    /// Next step after accepting a step with `error`; remembers the error.
    pub fn on_accept<T: Scalar>(&mut self, h: T, error: f64) -> T {
        let next = self.propose_next_h(h, error, self.prev_error, true);
        self.prev_error = error.max(MIN_REMEMBERED_ERROR);
        next
    }

    /// Shrunk retry step after rejecting a step with `error`.
    pub fn on_reject<T: Scalar>(&mut self, h: T, error: f64) -> T {
        self.prev_error = 1.0;
        self.propose_next_h(h, error, self.prev_error, false)
    }
}

/// Initial step guess from the scale of `f` near `t0` (Hairer, Nørsett &
/// Wanner, II.4) for a method of order 5.
///
/// Costs one extra evaluation of `f`. The result carries the sign of
/// `direction` and never exceeds `max_step` or `span`.
#[allow(clippy::too_many_arguments)]
pub fn initial_step<T: Scalar>(
    system: &impl DynamicalSystem<T>,
    t0: T,
    y0: &[T],
    f0: &[T],
    params: &[T],
    rtol: f64,
    atol: f64,
    direction: f64,
    span: f64,
    max_step: Option<f64>,
) -> T {
    let n = y0.len();
    if n == 0 {
        return T::lit(direction * span);
    }
    let scale: Vec<f64> = y0.iter().map(|y| atol + rtol * y.real().abs()).collect();
    let rms = |values: &mut dyn Iterator<Item = f64>| -> f64 {
        (values.map(|v| v * v).sum::<f64>() / n as f64).sqrt()
    };

    let d0 = rms(&mut y0.iter().zip(&scale).map(|(y, s)| y.real() / s));
    let d1 = rms(&mut f0.iter().zip(&scale).map(|(f, s)| f.real() / s));
    let h0 = if d0 < 1e-5 || d1 < 1e-5 || !d1.is_finite() {
        1e-6
    } else {
        0.01 * d0 / d1
    };
    let h0 = h0.min(span);

    // Explicit Euler trial step
    let h0_t = T::lit(direction * h0);
    let y1: Vec<T> = y0.iter().zip(f0).map(|(&y, &f)| y + h0_t * f).collect();
    let mut f1 = vec![T::zero(); n];
    system.apply(t0 + h0_t, &y1, params, &mut f1);
    let d2 = rms(&mut f1
        .iter()
        .zip(f0)
        .zip(&scale)
        .map(|((a, b), s)| (a.real() - b.real()) / s))
        / h0;

    let h1 = if d1.max(d2) <= 1e-15 || !d2.is_finite() {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(1.0 / 5.0)
    };

    let mut h = (100.0 * h0).min(h1).min(span);
    if let Some(max_step) = max_step {
        h = h.min(max_step);
    }
    T::lit(direction * h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_errors_within_tolerance() {
        let controller = PiController::new(ControllerSettings::default());
        assert!(controller.accept(1.0));
        assert!(controller.accept(0.3));
        assert!(!controller.accept(1.0001));
        assert!(!controller.accept(f64::INFINITY));
        assert!(!controller.accept(f64::NAN));
    }

    #[test]
    fn factor_is_clamped() {
        let controller = PiController::new(ControllerSettings::default());
        assert_eq!(controller.propose_next_h(1.0, 0.0, 1.0, true), 10.0);
        assert_eq!(controller.propose_next_h(1.0, 1e-30, 1.0, true), 10.0);
        assert_eq!(controller.propose_next_h(1.0, f64::INFINITY, 1.0, false), 0.2);
        assert_eq!(controller.propose_next_h(1.0, 1e30, 1.0, false), 0.2);
        // a rejected step never grows
        assert!(controller.propose_next_h(1.0, 1.01, 1.0, false) <= 1.0);
    }

    #[test]
    fn previous_error_damps_growth() {
        let controller = PiController::new(ControllerSettings::default());
        let calm = controller.propose_next_h(1.0, 0.5, 1e-4, true);
        let rough = controller.propose_next_h(1.0, 0.5, 1.0, true);
        assert!(calm < rough);
        let expected = 0.9 * 0.5f64.powf(-0.14);
        assert!((rough - expected).abs() < 1e-12);
    }

    #[test]
    fn rejection_resets_memory() {
        let mut controller = PiController::new(ControllerSettings::default());
        let next = controller.on_accept(0.1, 0.1);
        assert!(next > 0.1);
        assert_eq!(controller.prev_error(), 0.1);
        controller.on_accept(next, 0.0);
        assert_eq!(controller.prev_error(), MIN_REMEMBERED_ERROR);

        let retry = controller.on_reject(0.1, 4.0);
        assert_eq!(controller.prev_error(), 1.0);
        let expected = 0.1 * 0.9 * 4.0f64.powf(-0.14);
        assert!((retry - expected).abs() < 1e-12);
    }

    struct Linear;

    impl DynamicalSystem<f64> for Linear {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], params: &[f64], out: &mut [f64]) {
            out[0] = params[0] * x[0];
        }
    }

    #[test]
    fn initial_step_shrinks_for_fast_dynamics() {
        let slow = initial_step(&Linear, 0.0, &[1.0], &[-1.0], &[-1.0], 1e-6, 1e-9, 1.0, 10.0, None);
        let fast =
            initial_step(&Linear, 0.0, &[1.0], &[-100.0], &[-100.0], 1e-6, 1e-9, 1.0, 10.0, None);
        assert!(slow > 0.0 && fast > 0.0);
        assert!(fast < slow);
    }

    #[test]
    fn initial_step_respects_direction_and_bounds() {
        let h = initial_step(&Linear, 0.0, &[1.0], &[-1.0], &[-1.0], 1e-3, 1e-6, -1.0, 10.0, Some(1e-3));
        assert!(h < 0.0);
        assert!(h.abs() <= 1e-3);
        let h = initial_step(&Linear, 0.0, &[0.0], &[0.0], &[0.0], 1e-3, 1e-6, 1.0, 1e-9, None);
        assert!(h > 0.0 && h <= 1e-9);
    }
}
