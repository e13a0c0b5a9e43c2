//! Error taxonomy of the integrator.
//!
//! Only the fatal conditions surface here. Rejected steps, including those
//! caused by non-finite dynamics, are handled inside the driver.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OdeError {
    /// The step size needed to meet the tolerance fell below the floor.
    #[error("step size {h:e} at t = {t} fell below the minimum step {min:e}")]
    StepSizeUnderflow { t: f64, h: f64, min: f64 },

    /// Accepted plus rejected steps exceeded the configured bound.
    #[error("exceeded the maximum of {max_steps} steps at t = {t}")]
    MaxStepsExceeded { max_steps: usize, t: f64 },

    /// The dynamics output (or a cotangent) does not have the state's structure.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T, E = OdeError> = std::result::Result<T, E>;

/// Returns `Err(OdeError::InvalidInput(...))` if `$cond` is false.
macro_rules! ensure {
    ($cond:expr, $($msg:tt)*) => {
        if !$cond {
            return Err($crate::error::OdeError::InvalidInput(format!($($msg)*)));
        }
    };
}

pub(crate) use ensure;
