use crate::error::{OdeError, Result};
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars by the integrator.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {
    /// Lifts an `f64` constant (tableau coefficient, tolerance, step factor) into `Self`.
    fn lit(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }

    /// The real part as `f64`. Step-size control and error norms work on this value.
    fn real(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Right-hand side `dy/dt = f(y, t, params)` over a flat state buffer.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// params: parameters, passed unchanged at every evaluation
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], params: &[T], out: &mut [T]);

    /// Checks that the system can be integrated from `x0`.
    /// Called once by the driver before the first step.
    fn validate(&self, _t0: T, x0: &[T], _params: &[T]) -> Result<()> {
        if self.dimension() != x0.len() {
            return Err(OdeError::ShapeMismatch {
                expected: format!("{} state components", x0.len()),
                found: format!("{} derivative components", self.dimension()),
            });
        }
        Ok(())
    }
}

/// Reverse-mode derivative of a system's vector field.
///
/// This is the differentiation capability consumed by the adjoint engine.
/// Implementations may be hand-written or derived, see
/// [`ForwardVjp`](crate::autodiff::ForwardVjp).
pub trait Differentiable: DynamicalSystem<f64> {
    /// Computes the vector-Jacobian products of `f` at `(t, x, params)`:
    /// `cotangentᵀ ∂f/∂x` into `x_bar`, `cotangentᵀ ∂f/∂params` into
    /// `params_bar`, and returns `cotangentᵀ ∂f/∂t`.
    /// Both output buffers are overwritten.
    fn vjp(
        &self,
        t: f64,
        x: &[f64],
        params: &[f64],
        cotangent: &[f64],
        x_bar: &mut [f64],
        params_bar: &mut [f64],
    ) -> f64;
}
