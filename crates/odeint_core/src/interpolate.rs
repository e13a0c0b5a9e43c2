//! Dense output for accepted Dormand-Prince steps.
//!
//! Each accepted step is covered by a quartic in the normalised time
//! `s = (t - t_start) / h`. The quartic matches the solution and its
//! derivative at both ends of the step plus the method's continuous
//! extension at `s = 1/2`, which keeps the interpolant fourth-order accurate
//! between grid points.

use crate::traits::Scalar;

/// Weights of the stages for the continuous extension at the step midpoint.
const MIDPOINT_WEIGHTS: [f64; 7] = [
    6025192743.0 / 30085553152.0 / 2.0,
    0.0,
    51252292925.0 / 65400821598.0 / 2.0,
    -2691868925.0 / 45128329728.0 / 2.0,
    187940372067.0 / 1594534317056.0 / 2.0,
    -1776094331.0 / 19743644256.0 / 2.0,
    11237099.0 / 235043384.0 / 2.0,
];

#[derive(Debug, Clone)]
pub struct QuarticInterpolant<T> {
    t_start: T,
    h: T,
    /// Per component `[a, b, c, d, e]` of `a s^4 + b s^3 + c s^2 + d s + e`.
    coeffs: Vec<[T; 5]>,
}

impl<T: Scalar> QuarticInterpolant<T> {
    /// Fits the step `[t_start, t_start + h]` from its end points and stages.
    /// `stages[0]` and `stages[6]` are the derivatives at the start and end.
    pub fn fit(t_start: T, h: T, y0: &[T], y1: &[T], stages: [&[T]; 7]) -> Self {
        let two = T::lit(2.0);
        let weights = MIDPOINT_WEIGHTS.map(T::lit);
        let coeffs = (0..y0.len())
            .map(|i| {
                let mut mid = T::zero();
                for (w, k) in weights.iter().zip(stages.iter()) {
                    mid = mid + *w * k[i];
                }
                let y_mid = y0[i] + h * mid;
                let dy0 = h * stages[0][i];
                let dy1 = h * stages[6][i];
                let (y0, y1) = (y0[i], y1[i]);

                let a = -two * dy0 + two * dy1 - T::lit(8.0) * y0 - T::lit(8.0) * y1
                    + T::lit(16.0) * y_mid;
                let b = T::lit(5.0) * dy0 - T::lit(3.0) * dy1 + T::lit(18.0) * y0
                    + T::lit(14.0) * y1
                    - T::lit(32.0) * y_mid;
                let c = -T::lit(4.0) * dy0 + dy1 - T::lit(11.0) * y0 - T::lit(5.0) * y1
                    + T::lit(16.0) * y_mid;
                [a, b, c, dy0, y0]
            })
            .collect();
        Self { t_start, h, coeffs }
    }

    pub fn t_start(&self) -> T {
        self.t_start
    }

    pub fn t_end(&self) -> T {
        self.t_start + self.h
    }

    /// Evaluates at normalised time `s` (Horner).
    pub fn evaluate(&self, s: T, out: &mut [T]) {
        for (o, c) in out.iter_mut().zip(&self.coeffs) {
            *o = (((c[0] * s + c[1]) * s + c[2]) * s + c[3]) * s + c[4];
        }
    }

    /// Evaluates at absolute time `t`, which should lie inside the step.
    pub fn evaluate_at(&self, t: T) -> Vec<T> {
        let mut out = vec![T::zero(); self.coeffs.len()];
        self.evaluate((t - self.t_start) / self.h, &mut out);
        out
    }
}
