//! Adapters that present user dynamics as a flat [`DynamicalSystem`].

use crate::error::{ensure, OdeError, Result};
use crate::state::{Layout, State};
use crate::traits::{DynamicalSystem, Scalar};
use log::trace;

/// Closure-backed flat system of a fixed dimension.
///
/// Closures cannot be evaluated on dual numbers, so a `FnSystem` supports
/// forward integration only. Implement [`DynamicalSystem`] generically (or
/// [`Differentiable`](crate::traits::Differentiable) by hand) to get gradients.
pub struct FnSystem<F> {
    dimension: usize,
    func: F,
}

impl<F> FnSystem<F>
where
    F: Fn(f64, &[f64], &[f64], &mut [f64]),
{
    pub fn new(dimension: usize, func: F) -> Self {
        Self { dimension, func }
    }
}

impl<F> DynamicalSystem<f64> for FnSystem<F>
where
    F: Fn(f64, &[f64], &[f64], &mut [f64]),
{
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn apply(&self, t: f64, x: &[f64], params: &[f64], out: &mut [f64]) {
        (self.func)(t, x, params, out)
    }
}

/// Dynamics over nested states: `f(t, y, params) -> dy/dt`, where the
/// result must have the structure of `y`.
pub trait TreeSystem<T: Scalar> {
    fn apply(&self, t: T, y: &State<T>, params: &State<T>) -> State<T>;
}

impl<T, F> TreeSystem<T> for F
where
    T: Scalar,
    F: Fn(T, &State<T>, &State<T>) -> State<T>,
{
    fn apply(&self, t: T, y: &State<T>, params: &State<T>) -> State<T> {
        self(t, y, params)
    }
}

/// A [`TreeSystem`] bound to the layouts of its initial state and
/// parameters, exposed as a flat [`DynamicalSystem`].
///
/// The layouts are captured once; every evaluation unflattens the buffers,
/// calls the tree dynamics and flattens the result. An evaluation whose
/// result has a different structure yields NaN derivatives, which the
/// stepper rejects.
pub struct Structured<S> {
    inner: S,
    state_layout: Layout,
    param_layout: Layout,
}

impl<S> Structured<S> {
    /// Binds `inner` to `y0` and `params`, checking eagerly that
    /// `f(t0, y0, params)` has the structure of `y0`.
    pub fn new<T: Scalar>(inner: S, t0: T, y0: &State<T>, params: &State<T>) -> Result<Self>
    where
        S: TreeSystem<T>,
    {
        let state_layout = y0.layout();
        let derivative = inner.apply(t0, y0, params);
        if !state_layout.matches(&derivative) {
            return Err(OdeError::ShapeMismatch {
                expected: state_layout.to_string(),
                found: derivative.layout().to_string(),
            });
        }
        Ok(Self {
            inner,
            state_layout,
            param_layout: params.layout(),
        })
    }

    pub fn state_layout(&self) -> &Layout {
        &self.state_layout
    }

    pub fn param_layout(&self) -> &Layout {
        &self.param_layout
    }
}

impl<T: Scalar, S: TreeSystem<T>> DynamicalSystem<T> for Structured<S> {
    fn dimension(&self) -> usize {
        self.state_layout.size()
    }

    fn apply(&self, t: T, x: &[T], params: &[T], out: &mut [T]) {
        let (Ok(y), Ok(p)) = (
            self.state_layout.unflatten(x),
            self.param_layout.unflatten(params),
        ) else {
            out.fill(T::nan());
            return;
        };
        let derivative = self.inner.apply(t, &y, &p);
        if self.state_layout.matches(&derivative) {
            derivative.write_flat(out);
        } else {
            trace!(
                "dynamics returned {} for state {}; treating as non-finite",
                derivative.layout(),
                self.state_layout
            );
            out.fill(T::nan());
        }
    }

    fn validate(&self, _t0: T, x0: &[T], params: &[T]) -> Result<()> {
        if x0.len() != self.state_layout.size() {
            return Err(OdeError::ShapeMismatch {
                expected: format!("{} scalars for {}", self.state_layout.size(), self.state_layout),
                found: format!("{} scalars", x0.len()),
            });
        }
        ensure!(
            params.len() == self.param_layout.size(),
            "expected {} parameter scalars for {}, got {}",
            self.param_layout.size(),
            self.param_layout,
            params.len()
        );
        Ok(())
    }
}
