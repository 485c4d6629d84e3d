use crate::error::Result;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in our models.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Lifts an `f64` model constant into `T`.
pub fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// A continuous-time system driven by an exogenous input, `dx/dt = f(x, u)`.
///
/// Model constants live inside the implementor and stay fixed for its lifetime.
pub trait ControlledSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn state_dimension(&self) -> usize;

    /// Returns the dimension of the input (action) space.
    fn input_dimension(&self) -> usize;

    /// Rejects inputs for which `apply` is not defined.
    /// Called once per integration step, before any stage is evaluated.
    fn check_input(&self, _u: &[T]) -> Result<()> {
        Ok(())
    }

    /// Evaluates the vector field.
    /// x: current state
    /// u: input, held constant by the caller
    /// out: buffer to write dx/dt
    fn apply(&self, x: &[T], u: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a controlled system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt with `u` held over the whole step.
    /// state: current state (updated after step)
    fn step(
        &mut self,
        system: &impl ControlledSystem<T>,
        state: &mut [T],
        u: &[T],
        dt: T,
    ) -> Result<()>;
}
