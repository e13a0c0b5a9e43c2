use crate::traits::{DynamicalSystem, Scalar};

/// Number of fresh dynamics evaluations per attempted step (FSAL reuses the first stage).
pub const EVALUATIONS_PER_STEP: usize = 6;

/// Dormand-Prince 5(4) embedded pair with first-same-as-last reuse.
///
/// One attempted step evaluates stages 2..7; stage 1 is the derivative at the
/// start of the step and stage 7 is the derivative at the fifth-order
/// solution, which becomes stage 1 of the next accepted step.
pub struct Dopri5<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    k5: Vec<T>,
    k6: Vec<T>,
    k7: Vec<T>,
    tmp: Vec<T>,
    y_new: Vec<T>,
    y_err: Vec<T>,
}

impl<T: Scalar> Dopri5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            k5: vec![z; dim],
            k6: vec![z; dim],
            k7: vec![z; dim],
            tmp: vec![z; dim],
            y_new: vec![z; dim],
            y_err: vec![z; dim],
        }
    }

    /// Attempts one step of size `h` from `(t, y)` with `f0 = f(t, y)`.
    ///
    /// Returns the scaled RMS error ratio of the embedded pair, `+inf` when any
    /// stage or the solution is not finite. The fifth-order solution, the
    /// local error and the stages stay in the stepper until the next attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        y: &[T],
        f0: &[T],
        h: T,
        params: &[T],
        rtol: f64,
        atol: f64,
    ) -> f64 {
        let n = y.len();

        // Dopri5 Coefficients
        let c2 = T::lit(1.0 / 5.0);
        let c3 = T::lit(3.0 / 10.0);
        let c4 = T::lit(4.0 / 5.0);
        let c5 = T::lit(8.0 / 9.0);

        let a21 = T::lit(1.0 / 5.0);

        let a31 = T::lit(3.0 / 40.0);
        let a32 = T::lit(9.0 / 40.0);

        let a41 = T::lit(44.0 / 45.0);
        let a42 = T::lit(-56.0 / 15.0);
        let a43 = T::lit(32.0 / 9.0);

        let a51 = T::lit(19372.0 / 6561.0);
        let a52 = T::lit(-25360.0 / 2187.0);
        let a53 = T::lit(64448.0 / 6561.0);
        let a54 = T::lit(-212.0 / 729.0);

        let a61 = T::lit(9017.0 / 3168.0);
        let a62 = T::lit(-355.0 / 33.0);
        let a63 = T::lit(46732.0 / 5247.0);
        let a64 = T::lit(49.0 / 176.0);
        let a65 = T::lit(-5103.0 / 18656.0);

        // b coefficients (5th order); the 7th row of the tableau
        let b1 = T::lit(35.0 / 384.0);
        let b3 = T::lit(500.0 / 1113.0);
        let b4 = T::lit(125.0 / 192.0);
        let b5 = T::lit(-2187.0 / 6784.0);
        let b6 = T::lit(11.0 / 84.0);

        // e = b - b_hat (difference to the embedded 4th order weights)
        let e1 = T::lit(35.0 / 384.0 - 1951.0 / 21600.0);
        let e3 = T::lit(500.0 / 1113.0 - 22642.0 / 50085.0);
        let e4 = T::lit(125.0 / 192.0 - 451.0 / 720.0);
        let e5 = T::lit(-2187.0 / 6784.0 + 12231.0 / 42400.0);
        let e6 = T::lit(11.0 / 84.0 - 649.0 / 6300.0);
        let e7 = T::lit(-1.0 / 60.0);

        // k1 (FSAL)
        self.k1.copy_from_slice(f0);

        // k2
        for i in 0..n {
            self.tmp[i] = y[i] + h * (a21 * self.k1[i]);
        }
        system.apply(t + c2 * h, &self.tmp, params, &mut self.k2);

        // k3
        for i in 0..n {
            self.tmp[i] = y[i] + h * (a31 * self.k1[i] + a32 * self.k2[i]);
        }
        system.apply(t + c3 * h, &self.tmp, params, &mut self.k3);

        // k4
        for i in 0..n {
            self.tmp[i] = y[i] + h * (a41 * self.k1[i] + a42 * self.k2[i] + a43 * self.k3[i]);
        }
        system.apply(t + c4 * h, &self.tmp, params, &mut self.k4);

        // k5
        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (a51 * self.k1[i] + a52 * self.k2[i] + a53 * self.k3[i] + a54 * self.k4[i]);
        }
        system.apply(t + c5 * h, &self.tmp, params, &mut self.k5);

        // k6
        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (a61 * self.k1[i]
                    + a62 * self.k2[i]
                    + a63 * self.k3[i]
                    + a64 * self.k4[i]
                    + a65 * self.k5[i]);
        }
        system.apply(t + h, &self.tmp, params, &mut self.k6);

        // 5th order solution
        for i in 0..n {
            self.y_new[i] = y[i]
                + h * (b1 * self.k1[i]
                    + b3 * self.k3[i]
                    + b4 * self.k4[i]
                    + b5 * self.k5[i]
                    + b6 * self.k6[i]);
        }

        // k7 = f(t + h, y_new)
        system.apply(t + h, &self.y_new, params, &mut self.k7);

        for i in 0..n {
            self.y_err[i] = h
                * (e1 * self.k1[i]
                    + e3 * self.k3[i]
                    + e4 * self.k4[i]
                    + e5 * self.k5[i]
                    + e6 * self.k6[i]
                    + e7 * self.k7[i]);
        }

        let finite = self
            .y_new
            .iter()
            .chain(&self.k7)
            .chain(&self.y_err)
            .all(|v| v.is_finite());
        if !finite {
            return f64::INFINITY;
        }
        error_ratio(y, &self.y_new, &self.y_err, rtol, atol)
    }

    /// Fifth-order solution of the last attempt.
    pub fn solution(&self) -> &[T] {
        &self.y_new
    }

    /// Derivative at the end of the last attempt (stage 7).
    pub fn end_derivative(&self) -> &[T] {
        &self.k7
    }

    /// Stage derivatives of the last attempt, `k1..k7`.
    pub fn stages(&self) -> [&[T]; 7] {
        [
            &self.k1, &self.k2, &self.k3, &self.k4, &self.k5, &self.k6, &self.k7,
        ]
    }
}

/// RMS over components of `err / (atol + rtol * max(|y0|, |y1|))`.
/// Zero for an empty state, `+inf` instead of NaN.
pub fn error_ratio<T: Scalar>(y0: &[T], y1: &[T], err: &[T], rtol: f64, atol: f64) -> f64 {
    if err.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..err.len() {
        if err[i].real() == 0.0 {
            continue;
        }
        let scale = atol + rtol * y0[i].real().abs().max(y1[i].real().abs());
        let ratio = err[i].real() / scale;
        sum += ratio * ratio;
    }
    let ratio = (sum / err.len() as f64).sqrt();
    if ratio.is_nan() {
        f64::INFINITY
    } else {
        ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Dual;

    struct Decay;

    impl<T: Scalar> DynamicalSystem<T> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: T, x: &[T], params: &[T], out: &mut [T]) {
            out[0] = -params[0] * x[0];
        }
    }

    struct Polynomial;

    impl DynamicalSystem<f64> for Polynomial {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, _x: &[f64], _params: &[f64], out: &mut [f64]) {
            out[0] = 5.0 * t.powi(4);
        }
    }

    #[test]
    fn single_step_is_fifth_order_accurate() {
        let mut stepper = Dopri5::<f64>::new(1);
        let f0 = [-1.0];
        let h = 0.1;
        stepper.step(&Decay, 0.0, &[1.0], &f0, h, &[1.0], 1e-6, 1e-9);
        let exact = (-h).exp();
        let error = (stepper.solution()[0] - exact).abs();
        assert!(error < 1e-8, "local error {error}");
        assert!((stepper.end_derivative()[0] + stepper.solution()[0]).abs() < 1e-15);
    }

    #[test]
    fn quadrature_of_quartic_is_exact() {
        // y' = 5 t^4 is integrated exactly by a fifth order method.
        let mut stepper = Dopri5::new(1);
        let error = stepper.step(&Polynomial, 0.0, &[0.0], &[0.0], 1.0, &[], 1e-6, 1e-9);
        assert!((stepper.solution()[0] - 1.0).abs() < 1e-14);
        assert!(error.is_finite());
    }

    #[test]
    fn error_ratio_grows_with_step_size() {
        let mut stepper = Dopri5::new(1);
        let small = stepper.step(&Decay, 0.0, &[1.0], &[-1.0], 0.05, &[1.0], 1e-6, 1e-9);
        let large = stepper.step(&Decay, 0.0, &[1.0], &[-1.0], 0.5, &[1.0], 1e-6, 1e-9);
        assert!(small < large);
        // the estimate is O(h^5); a tenfold step raises it by orders of magnitude
        let ratio = large / small;
        assert!(ratio > 1e3, "ratio {ratio}");
    }

    #[test]
    fn non_finite_dynamics_report_infinite_error() {
        struct Blowup;
        impl DynamicalSystem<f64> for Blowup {
            fn dimension(&self) -> usize {
                1
            }
            fn apply(&self, t: f64, _x: &[f64], _p: &[f64], out: &mut [f64]) {
                out[0] = if t > 0.0 { f64::NAN } else { 1.0 };
            }
        }
        let mut stepper = Dopri5::new(1);
        let error = stepper.step(&Blowup, 0.0, &[0.0], &[1.0], 0.1, &[], 1e-6, 1e-9);
        assert_eq!(error, f64::INFINITY);
    }

    #[test]
    fn dual_step_carries_parameter_sensitivity() {
        // d/dk exp(-k h) at k = 1 is -h exp(-h)
        let mut stepper = Dopri5::new(1);
        let y0 = [Dual::constant(1.0)];
        let k = [Dual::variable(1.0)];
        let f0 = [-k[0] * y0[0]];
        let h = Dual::constant(0.1);
        stepper.step(&Decay, Dual::constant(0.0), &y0, &f0, h, &k, 1e-6, 1e-9);
        let expected = -0.1 * (-0.1f64).exp();
        assert!((stepper.solution()[0].eps - expected).abs() < 1e-8);
    }

    #[test]
    fn error_ratio_handles_empty_and_scaled_components() {
        assert_eq!(error_ratio::<f64>(&[], &[], &[], 1e-3, 1e-6), 0.0);
        let ratio = error_ratio(&[1.0, 1.0], &[1.0, -1.0], &[1e-3, 0.0], 1e-3, 0.0);
        assert!((ratio - (0.5f64).sqrt()).abs() < 1e-12);
    }
}
