//! The `odeint_core` crate integrates `dy/dt = f(y, t, params)` with an
//! adaptive Dormand-Prince 5(4) method and differentiates the resulting
//! trajectory by the continuous adjoint method.
//! Numerical components are generic over `Scalar`, so the same integrator runs
//! on `f64` and on forward-mode Dual numbers.
//!
//! Key components:
//! - **Traits**: `Scalar`, `DynamicalSystem` (flat vector fields), `Differentiable` (VJPs).
//! - **State**: nested states (`State`, `Layout`) flattened once per call.
//! - **Solvers**: the Dopri5 stepper, PI step-size control and quartic dense output.
//! - **Integrate**: the forward driver (`integrate`, `odeint`).
//! - **Adjoint**: reverse-mode gradients (`integrate_vjp`, `odeint_vjp`).
//! - **Batch**: independent or lockstep integration of several lanes.
//! - **Autodiff**: Dual numbers and the `ForwardVjp` wrapper.
pub mod adjoint;
pub mod autodiff;
pub mod batch;
pub mod controller;
pub mod dynamics;
pub mod error;
pub mod integrate;
pub mod interpolate;
pub mod solvers;
pub mod state;
pub mod traits;

pub use adjoint::{integrate_vjp, odeint_vjp, Gradients, TreeGradients};
pub use autodiff::{Dual, ForwardVjp};
pub use batch::{integrate_batch, integrate_vjp_batch, Lane, LaneSync};
pub use controller::ControllerSettings;
pub use dynamics::{FnSystem, Structured, TreeSystem};
pub use error::{OdeError, Result};
pub use integrate::{integrate, odeint, IntegrationStats, IntegratorSettings, StepControl, Trajectory};
pub use state::{Array, Layout, State};
pub use traits::{Differentiable, DynamicalSystem, Scalar};
