//! Two-state evaporation process model.
//!
//! State `x = [X2, P2]` (product composition, operating pressure), input
//! `u = [P100, F200]` (steam pressure, cooling water flow). The algebraic part maps
//! `(x, u)` to temperatures, heat duties and flows; the differential part is a pair
//! of mass/energy balances built on top of it.

use crate::autodiff::{seed_unit, Dual};
use crate::error::{Result, SimError};
use crate::traits::{constant, ControlledSystem, Scalar};
use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ProcessState = [f64; 2];
pub type ProcessAction = [f64; 2];

/// Initial state used by a fresh environment session.
pub const INITIAL_STATE: ProcessState = [40.0, 60.0];

/// Physical constants of the evaporator. Serialized under the conventional symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessParameters {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
    pub g: f64,
    pub h: f64,
    /// Liquid holdup.
    #[serde(rename = "M")]
    pub mass: f64,
    /// Vapour capacitance.
    #[serde(rename = "C")]
    pub capacitance: f64,
    #[serde(rename = "U_A2")]
    pub ua2: f64,
    #[serde(rename = "C_p")]
    pub cp: f64,
    pub lam: f64,
    pub lam_s: f64,
    #[serde(rename = "F_1")]
    pub f1: f64,
    #[serde(rename = "X_1")]
    pub x1: f64,
    #[serde(rename = "F_3")]
    pub f3: f64,
    #[serde(rename = "T_1")]
    pub t1: f64,
    #[serde(rename = "T_200")]
    pub t200: f64,
}

impl Default for ProcessParameters {
    fn default() -> Self {
        Self {
            a: 0.5616,
            b: 0.3126,
            c: 48.43,
            d: 0.507,
            e: 55.0,
            f: 0.1538,
            g: 90.0,
            h: 0.16,
            mass: 20.0,
            capacitance: 4.0,
            ua2: 6.84,
            cp: 0.07,
            lam: 38.5,
            lam_s: 36.6,
            f1: 10.0,
            x1: 5.0,
            f3: 50.0,
            t1: 40.0,
            t200: 25.0,
        }
    }
}

impl ProcessParameters {
    pub const KEYS: [&'static str; 19] = [
        "a", "b", "c", "d", "e", "f", "g", "h", "M", "C", "U_A2", "C_p", "lam", "lam_s", "F_1",
        "X_1", "F_3", "T_1", "T_200",
    ];

    /// Builds the parameter set from a name → value table.
    /// Every key in [`Self::KEYS`] must be present and no other key is accepted.
    pub fn from_map(values: &HashMap<String, f64>) -> Result<Self> {
        if let Some(missing) = Self::KEYS.iter().find(|key| !values.contains_key(**key)) {
            return Err(SimError::configuration(format!(
                "Missing process parameter \"{missing}\"."
            )));
        }
        let mut params = Self::default();
        for (key, value) in values {
            let slot = params.field_mut(key).ok_or_else(|| {
                SimError::configuration(format!("Unknown process parameter \"{key}\"."))
            })?;
            *slot = *value;
        }
        Ok(params)
    }

    pub fn to_map(&self) -> HashMap<String, f64> {
        Self::KEYS
            .iter()
            .filter_map(|key| self.get(key).map(|v| (key.to_string(), v)))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        let value = match key {
            "a" => self.a,
            "b" => self.b,
            "c" => self.c,
            "d" => self.d,
            "e" => self.e,
            "f" => self.f,
            "g" => self.g,
            "h" => self.h,
            "M" => self.mass,
            "C" => self.capacitance,
            "U_A2" => self.ua2,
            "C_p" => self.cp,
            "lam" => self.lam,
            "lam_s" => self.lam_s,
            "F_1" => self.f1,
            "X_1" => self.x1,
            "F_3" => self.f3,
            "T_1" => self.t1,
            "T_200" => self.t200,
            _ => return None,
        };
        Some(value)
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut f64> {
        let slot = match key {
            "a" => &mut self.a,
            "b" => &mut self.b,
            "c" => &mut self.c,
            "d" => &mut self.d,
            "e" => &mut self.e,
            "f" => &mut self.f,
            "g" => &mut self.g,
            "h" => &mut self.h,
            "M" => &mut self.mass,
            "C" => &mut self.capacitance,
            "U_A2" => &mut self.ua2,
            "C_p" => &mut self.cp,
            "lam" => &mut self.lam,
            "lam_s" => &mut self.lam_s,
            "F_1" => &mut self.f1,
            "X_1" => &mut self.x1,
            "F_3" => &mut self.f3,
            "T_1" => &mut self.t1,
            "T_200" => &mut self.t200,
            _ => return None,
        };
        Some(slot)
    }
}

/// Instantaneous quantities derived from `(x, u, params)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgebraicVariables<T = f64> {
    #[serde(rename = "T_2")]
    pub t2: T,
    #[serde(rename = "T_3")]
    pub t3: T,
    #[serde(rename = "T_100")]
    pub t100: T,
    #[serde(rename = "U_A1")]
    pub ua1: T,
    #[serde(rename = "Q_100")]
    pub q100: T,
    #[serde(rename = "F_100")]
    pub f100: T,
    #[serde(rename = "F_4")]
    pub f4: T,
    #[serde(rename = "Q_200")]
    pub q200: T,
    #[serde(rename = "F_5")]
    pub f5: T,
    #[serde(rename = "F_2")]
    pub f2: T,
}

impl AlgebraicVariables<f64> {
    pub const KEYS: [&'static str; 10] = [
        "T_2", "T_3", "T_100", "U_A1", "Q_100", "F_100", "F_4", "Q_200", "F_5", "F_2",
    ];

    pub fn get(&self, key: &str) -> Option<f64> {
        let value = match key {
            "T_2" => self.t2,
            "T_3" => self.t3,
            "T_100" => self.t100,
            "U_A1" => self.ua1,
            "Q_100" => self.q100,
            "F_100" => self.f100,
            "F_4" => self.f4,
            "Q_200" => self.q200,
            "F_5" => self.f5,
            "F_2" => self.f2,
            _ => return None,
        };
        Some(value)
    }
}

/// The algebraic model, unchecked. Callers guarantee `F200 > 0`.
fn algebraic<T: Scalar>(p: &ProcessParameters, x: &[T], u: &[T]) -> AlgebraicVariables<T> {
    let k = constant::<T>;
    let (x2, p2) = (x[0], x[1]);
    let (p100, f200) = (u[0], u[1]);

    let t2 = k(p.a) * p2 + k(p.b) * x2 + k(p.c);
    let t3 = k(p.d) * p2 + k(p.e);
    let t100 = k(p.f) * p100 + k(p.g);
    let ua1 = k(p.h * (p.f1 + p.f3));

    let q100 = ua1 * (t100 - t2);
    let f100 = q100 / k(p.lam_s);
    let f4 = (q100 - k(p.f1 * p.cp) * (t2 - k(p.t1))) / k(p.lam);
    let q200 = k(p.ua2) * (t3 - k(p.t200)) / (T::one() + k(p.ua2) / (k(2.0 * p.cp) * f200));

    let f5 = q200 / k(p.lam);
    let f2 = k(p.f1) - f4;

    AlgebraicVariables {
        t2,
        t3,
        t100,
        ua1,
        q100,
        f100,
        f4,
        q200,
        f5,
        f2,
    }
}

fn derivative<T: Scalar>(p: &ProcessParameters, x: &[T], u: &[T], out: &mut [T]) {
    let k = constant::<T>;
    let alg = algebraic(p, x, u);
    out[0] = (k(p.f1 * p.x1) - alg.f2 * x[0]) / k(p.mass);
    out[1] = (alg.f4 - alg.f5) / k(p.capacitance);
}

fn check_coolant_flow<T: Scalar>(f200: T) -> Result<()> {
    if !(f200 > T::zero()) || !f200.is_finite() {
        return Err(SimError::precondition(format!(
            "Coolant flow F200 must be strictly positive and finite, got {:?}.",
            f200
        )));
    }
    Ok(())
}

pub fn compute_algebraic_variables(
    state: &ProcessState,
    action: &ProcessAction,
    params: &ProcessParameters,
) -> Result<AlgebraicVariables> {
    check_coolant_flow(action[1])?;
    Ok(algebraic(params, state, action))
}

/// `[dX2/dt, dP2/dt]` at `(state, action)`.
pub fn compute_derivative(
    state: &ProcessState,
    action: &ProcessAction,
    params: &ProcessParameters,
) -> Result<ProcessState> {
    check_coolant_flow(action[1])?;
    let mut out = [0.0; 2];
    derivative(params, state, action, &mut out);
    Ok(out)
}

/// Operating cost rate: product and recycle flow, steam and cooling water.
pub fn economic_cost(
    state: &ProcessState,
    action: &ProcessAction,
    params: &ProcessParameters,
) -> Result<f64> {
    let alg = compute_algebraic_variables(state, action, params)?;
    Ok(10.09 * (alg.f2 + params.f3) + 600.0 * alg.f100 + 0.6 * action[1])
}

/// Jacobians of the vector field at an operating point, `dx/dt ≈ A δx + B δu`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Linearization {
    pub derivative: ProcessState,
    pub a: Matrix2<f64>,
    pub b: Matrix2<f64>,
}

/// The evaporator as a [`ControlledSystem`]; parameters are fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaporationModel {
    pub params: ProcessParameters,
}

impl EvaporationModel {
    pub fn new(params: ProcessParameters) -> Self {
        Self { params }
    }

    pub fn linearize(&self, state: &ProcessState, action: &ProcessAction) -> Result<Linearization> {
        check_coolant_flow(action[1])?;

        let point = [state[0], state[1], action[0], action[1]];
        let mut seeded = [Dual::constant(0.0); 4];
        let mut out = [Dual::constant(0.0); 2];
        let mut a = Matrix2::zeros();
        let mut b = Matrix2::zeros();
        let mut value = [0.0; 2];

        for j in 0..4 {
            seed_unit(&point, j, &mut seeded);
            derivative(&self.params, &seeded[..2], &seeded[2..], &mut out);
            for i in 0..2 {
                if j < 2 {
                    a[(i, j)] = out[i].eps;
                } else {
                    b[(i, j - 2)] = out[i].eps;
                }
                value[i] = out[i].val;
            }
        }

        Ok(Linearization {
            derivative: value,
            a,
            b,
        })
    }
}

impl<T: Scalar> ControlledSystem<T> for EvaporationModel {
    fn state_dimension(&self) -> usize {
        2
    }

    fn input_dimension(&self) -> usize {
        2
    }

    fn check_input(&self, u: &[T]) -> Result<()> {
        check_coolant_flow(u[1])
    }

    fn apply(&self, x: &[T], u: &[T], out: &mut [T]) {
        derivative(&self.params, x, u, out);
    }
}
