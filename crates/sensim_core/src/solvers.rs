use crate::error::{ensure_dimension, Result, SimError};
use crate::traits::{ControlledSystem, Scalar, Steppable};
use tracing::debug;

/// Classic Runge-Kutta 4th Order Solver.
///
/// The input is held constant over the step (zero-order hold), so all four stage
/// evaluations see the same `u`. The stage buffers are scratch space only; nothing
/// carries over from one step to the next.
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![T::zero(); dim],
            k2: vec![T::zero(); dim],
            k3: vec![T::zero(); dim],
            k4: vec![T::zero(); dim],
            tmp: vec![T::zero(); dim],
        }
    }

    pub fn dimension(&self) -> usize {
        self.tmp.len()
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(
        &mut self,
        system: &impl ControlledSystem<T>,
        state: &mut [T],
        u: &[T],
        dt: T,
    ) -> Result<()> {
        ensure_dimension("State", system.state_dimension(), state.len())?;
        ensure_dimension("Solver buffer", self.dimension(), state.len())?;
        ensure_dimension("Input", system.input_dimension(), u.len())?;
        if !(dt > T::zero()) {
            return Err(SimError::precondition("Step size dt must be positive."));
        }
        system.check_input(u)?;

        let two = T::one() + T::one();
        let six = two + two + two;

        // k1 = f(x, u)
        system.apply(state, u, &mut self.k1);

        // k2 = f(x + dt*k1/2, u)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] / two;
        }
        system.apply(&self.tmp, u, &mut self.k2);

        // k3 = f(x + dt*k2/2, u)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] / two;
        }
        system.apply(&self.tmp, u, &mut self.k3);

        // k4 = f(x + dt*k3, u)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(&self.tmp, u, &mut self.k4);

        // x_next = x + dt*(k1 + 2k2 + 2k3 + k4)/6
        for i in 0..state.len() {
            state[i] = state[i]
                + dt * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]) / six;
        }

        Ok(())
    }
}

/// Advances `state` by one RK4 step of size `step_size` and returns the new state.
/// The input state is left untouched.
pub fn integrate_step<S>(system: &S, state: &[f64], u: &[f64], step_size: f64) -> Result<Vec<f64>>
where
    S: ControlledSystem<f64>,
{
    let mut next = state.to_vec();
    RK4::new(state.len()).step(system, &mut next, u, step_size)?;
    Ok(next)
}

/// Integrates through a sequence of inputs, one step per input.
/// The returned trajectory starts with `x0` and has `inputs.len() + 1` entries.
pub fn simulate<S>(
    system: &S,
    x0: &[f64],
    inputs: &[Vec<f64>],
    step_size: f64,
) -> Result<Vec<Vec<f64>>>
where
    S: ControlledSystem<f64>,
{
    let mut stepper = RK4::new(x0.len());
    let mut state = x0.to_vec();
    let mut trajectory = Vec::with_capacity(inputs.len() + 1);
    trajectory.push(state.clone());

    for (k, u) in inputs.iter().enumerate() {
        stepper.step(system, &mut state, u, step_size)?;
        debug!(step = k, state = ?state, "integrated step");
        trajectory.push(state.clone());
    }

    Ok(trajectory)
}
