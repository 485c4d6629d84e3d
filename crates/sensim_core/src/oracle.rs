//! A small finite-horizon linear-quadratic problem that implements
//! [`SensitivityOracle`].
//!
//! Scalar dynamics `x⁺ = a x + b u`, stage cost `½(q x² + r u²)` and terminal cost
//! `½ q_N x²`, with per-stage parameters `p = [a, b, q, r]`. The value function is
//! quadratic, `V(x) = ½ P₀ x²`, with `P` from the backward Riccati recursion. Parameter
//! gradients are taken with respect to the parameter vector shared by all stages, by
//! forward-mode dual numbers.

use crate::autodiff::{seed_unit, Dual};
use crate::sensitivity::SensitivityOracle;
use crate::traits::{constant, Scalar};
use anyhow::{bail, Result};

pub const PARAMETER_DIMENSION: usize = 4;

/// Cost-to-go weights and the first feedback gain.
struct Riccati<T> {
    cost_to_go: Vec<T>,
    first_gain: T,
}

fn riccati<T: Scalar>(stages: &[[T; PARAMETER_DIMENSION]]) -> Result<Riccati<T>> {
    let n = stages.len() - 1;
    let mut p = vec![T::zero(); n + 1];
    p[n] = stages[n][2];
    let mut first_gain = T::zero();

    for k in (0..n).rev() {
        let [a, b, q, r] = stages[k];
        let next = p[k + 1];
        let s = r + b * b * next;
        if !(s > T::zero()) {
            bail!(
                "Riccati recursion is not positive definite at stage {} (r + b²P = {:?}).",
                k,
                s
            );
        }
        let gain = a * b * next / s;
        p[k] = q + a * a * next - a * b * next * gain;
        if k == 0 {
            first_gain = gain;
        }
    }

    Ok(Riccati {
        cost_to_go: p,
        first_gain,
    })
}

/// `(V, π)` at `x0`.
fn state_value<T: Scalar>(stages: &[[T; PARAMETER_DIMENSION]], x0: T) -> Result<(T, T)> {
    let sol = riccati(stages)?;
    let half = constant::<T>(0.5);
    Ok((half * sol.cost_to_go[0] * x0 * x0, -sol.first_gain * x0))
}

/// `Q` at `(x0, u0)`: first stage cost plus the optimal cost from the successor.
fn action_value<T: Scalar>(stages: &[[T; PARAMETER_DIMENSION]], x0: T, u0: T) -> Result<T> {
    let sol = riccati(stages)?;
    let half = constant::<T>(0.5);
    let [a, b, q, r] = stages[0];
    let next = a * x0 + b * u0;
    Ok(half * (q * x0 * x0 + r * u0 * u0) + half * sol.cost_to_go[1] * next * next)
}

pub struct LinearQuadraticOracle {
    horizon: usize,
    nominal: [f64; PARAMETER_DIMENSION],
    stages: Vec<[f64; PARAMETER_DIMENSION]>,
    value: f64,
    action_value: f64,
    policy: f64,
    value_gradient: Vec<f64>,
    action_value_gradient: Vec<f64>,
    policy_gradient: Vec<f64>,
}

impl LinearQuadraticOracle {
    pub fn new(horizon: usize, nominal: &[f64]) -> Result<Self> {
        if horizon == 0 {
            bail!("Horizon must be at least one stage.");
        }
        let nominal = as_parameter(nominal)?;
        Ok(Self {
            horizon,
            nominal,
            stages: vec![nominal; horizon + 1],
            value: f64::NAN,
            action_value: f64::NAN,
            policy: f64::NAN,
            value_gradient: vec![f64::NAN; PARAMETER_DIMENSION],
            action_value_gradient: vec![f64::NAN; PARAMETER_DIMENSION],
            policy_gradient: vec![f64::NAN; PARAMETER_DIMENSION],
        })
    }

    /// Stage parameters with component `j` of every stage seeded.
    fn seeded(&self, j: usize) -> Vec<[Dual; PARAMETER_DIMENSION]> {
        self.stages
            .iter()
            .map(|stage| {
                let mut out = [Dual::constant(0.0); PARAMETER_DIMENSION];
                seed_unit(stage, j, &mut out);
                out
            })
            .collect()
    }
}

fn as_parameter(p: &[f64]) -> Result<[f64; PARAMETER_DIMENSION]> {
    match p {
        [a, b, q, r] => Ok([*a, *b, *q, *r]),
        _ => bail!(
            "Expected {} parameters [a, b, q, r], got {}.",
            PARAMETER_DIMENSION,
            p.len()
        ),
    }
}

fn scalar_state(x: &[f64], what: &str) -> Result<f64> {
    match x {
        [v] => Ok(*v),
        _ => bail!("{} must be one-dimensional, got {} entries.", what, x.len()),
    }
}

impl SensitivityOracle for LinearQuadraticOracle {
    fn horizon(&self) -> usize {
        self.horizon
    }

    fn set_parameter(&mut self, stage: usize, parameter: &[f64]) -> Result<()> {
        if stage > self.horizon {
            bail!("Stage {} is beyond the horizon {}.", stage, self.horizon);
        }
        self.stages[stage] = as_parameter(parameter)?;
        Ok(())
    }

    fn solve_action_value(&mut self, x0: &[f64], u0: &[f64]) -> Result<()> {
        let x0 = scalar_state(x0, "Initial state")?;
        let u0 = scalar_state(u0, "Initial action")?;

        let q = action_value(&self.stages, x0, u0)?;
        let mut grad = vec![0.0; PARAMETER_DIMENSION];
        for (j, slot) in grad.iter_mut().enumerate() {
            *slot = action_value(&self.seeded(j), Dual::constant(x0), Dual::constant(u0))?.eps;
        }

        self.action_value = q;
        self.action_value_gradient = grad;
        // The first action is pinned to u0.
        self.policy = u0;
        self.policy_gradient = vec![0.0; PARAMETER_DIMENSION];
        Ok(())
    }

    fn solve_state_value(&mut self, x0: &[f64]) -> Result<()> {
        let x0 = scalar_state(x0, "Initial state")?;

        let (v, pi) = state_value(&self.stages, x0)?;
        let mut dv = vec![0.0; PARAMETER_DIMENSION];
        let mut dpi = vec![0.0; PARAMETER_DIMENSION];
        for j in 0..PARAMETER_DIMENSION {
            let (v_dual, pi_dual) = state_value(&self.seeded(j), Dual::constant(x0))?;
            dv[j] = v_dual.eps;
            dpi[j] = pi_dual.eps;
        }

        self.value = v;
        self.policy = pi;
        self.value_gradient = dv;
        self.policy_gradient = dpi;
        Ok(())
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn action_value(&self) -> f64 {
        self.action_value
    }

    fn policy(&self) -> f64 {
        self.policy
    }

    fn value_gradient(&self) -> Vec<f64> {
        self.value_gradient.clone()
    }

    fn action_value_gradient(&self) -> Vec<f64> {
        self.action_value_gradient.clone()
    }

    fn policy_gradient(&self) -> Vec<f64> {
        self.policy_gradient.clone()
    }

    fn parameters(&self) -> Vec<f64> {
        self.nominal.to_vec()
    }
}
