//! Sensitivity-based approximation of value functions along a parameter sweep.
//!
//! An optimal-control oracle is re-parameterized at every sample of a sweep and
//! queried for the action-value `Q`, the state value `V` and the first policy action
//! `π`, together with their gradients with respect to the parameters. From those the
//! first-order approximation
//!
//! ```text
//! approx[0] = true[0]
//! approx[i] = approx[i-1] + grad[i] · (p[i] - p[i-1])
//! ```
//!
//! is built, using the gradient at the destination sample `i`. Subsampling the sweep
//! by a stride shows how the approximation degrades as the parameter step grows.

use crate::error::{ensure_dimension, Result, SimError};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// External solver that can be re-parameterized and queried for values and
/// parameter sensitivities.
///
/// The oracle is stateful: every query reflects the most recent parameter injection
/// and solve. Callers must inject parameters into all stages before solving.
pub trait SensitivityOracle {
    /// Index of the last stage; parameters go to stages `0..=horizon()`.
    fn horizon(&self) -> usize;

    fn set_parameter(&mut self, stage: usize, parameter: &[f64]) -> anyhow::Result<()>;

    /// Solve with both the initial state and the first action fixed.
    fn solve_action_value(&mut self, x0: &[f64], u0: &[f64]) -> anyhow::Result<()>;

    /// Solve with only the initial state fixed.
    fn solve_state_value(&mut self, x0: &[f64]) -> anyhow::Result<()>;

    fn value(&self) -> f64;
    fn action_value(&self) -> f64;
    fn policy(&self) -> f64;
    fn value_gradient(&self) -> Vec<f64>;
    fn action_value_gradient(&self) -> Vec<f64>;
    fn policy_gradient(&self) -> Vec<f64>;

    /// Nominal parameter vector of the oracle.
    fn parameters(&self) -> Vec<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Functional {
    #[serde(rename = "V")]
    Value,
    #[serde(rename = "Q")]
    ActionValue,
    #[serde(rename = "pi")]
    Policy,
}

impl Functional {
    pub const ALL: [Functional; 3] = [Functional::Value, Functional::ActionValue, Functional::Policy];

    pub fn label(self) -> &'static str {
        match self {
            Functional::Value => "V",
            Functional::ActionValue => "Q",
            Functional::Policy => "pi",
        }
    }
}

/// What to do when the oracle fails at a sweep index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop and report the failing index.
    #[default]
    Abort,
    /// Mark the index as failed and keep going.
    SkipAndContinue,
}

/// `p[i] = p_min + (p_max - p_min) * i / n_steps` for `i` in `0..n_steps`.
pub fn generate_parameter_sweep(
    p_min: &[f64],
    p_max: &[f64],
    n_steps: usize,
) -> Result<Vec<DVector<f64>>> {
    if n_steps == 0 {
        return Err(SimError::precondition(
            "Parameter sweep requires at least one step.",
        ));
    }
    ensure_dimension("Parameter bound", p_min.len(), p_max.len())?;

    let sweep = (0..n_steps)
        .map(|i| {
            DVector::from_iterator(
                p_min.len(),
                p_min
                    .iter()
                    .zip(p_max)
                    .map(|(lo, hi)| lo + (hi - lo) * i as f64 / n_steps as f64),
            )
        })
        .collect();
    Ok(sweep)
}

/// Varies component `index` of `p_nominal` from `lower_scale` to `upper_scale` times
/// its nominal value, leaving the other components fixed.
pub fn single_parameter_sweep(
    p_nominal: &[f64],
    index: usize,
    lower_scale: f64,
    upper_scale: f64,
    n_steps: usize,
) -> Result<Vec<DVector<f64>>> {
    if index >= p_nominal.len() {
        return Err(SimError::precondition(format!(
            "Parameter index {index} out of range for dimension {}.",
            p_nominal.len()
        )));
    }
    let mut p_min = p_nominal.to_vec();
    let mut p_max = p_nominal.to_vec();
    p_min[index] = lower_scale * p_nominal[index];
    p_max[index] = upper_scale * p_nominal[index];
    generate_parameter_sweep(&p_min, &p_max, n_steps)
}

/// True values of one functional and their gradients, one row per sweep sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalTrace {
    pub values: Vec<f64>,
    pub gradients: DMatrix<f64>,
}

impl FunctionalTrace {
    fn with_capacity(n: usize, dim: usize) -> Self {
        Self {
            values: vec![f64::NAN; n],
            gradients: DMatrix::from_element(n, dim, f64::NAN),
        }
    }

    fn record(&mut self, i: usize, value: f64, gradient: &[f64]) {
        self.values[i] = value;
        for (j, g) in gradient.iter().enumerate() {
            self.gradients[(i, j)] = *g;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleStatus {
    Solved,
    /// Values and gradients at this index are undefined.
    Failed { reason: String },
}

/// Oracle output over a whole sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivitySweep {
    pub parameters: Vec<DVector<f64>>,
    pub status: Vec<SampleStatus>,
    pub value: FunctionalTrace,
    pub action_value: FunctionalTrace,
    pub policy: FunctionalTrace,
}

/// One functional's approximation at one stride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approximation {
    pub functional: Functional,
    pub stride: usize,
    /// Sweep indices that entered the recurrence.
    pub indices: Vec<usize>,
    pub truth: Vec<f64>,
    pub approx: Vec<f64>,
    /// Indices selected by the stride but dropped because the oracle failed there.
    pub skipped: Vec<usize>,
}

impl Approximation {
    /// NaN when any truth or approximation entry is NaN.
    pub fn max_abs_error(&self) -> f64 {
        if self.truth.iter().chain(&self.approx).any(|v| v.is_nan()) {
            return f64::NAN;
        }
        self.truth
            .iter()
            .zip(&self.approx)
            .map(|(t, a)| (t - a).abs())
            .fold(0.0, f64::max)
    }
}

struct Sample {
    q: f64,
    dq: Vec<f64>,
    v: f64,
    dv: Vec<f64>,
    pi: f64,
    dpi: Vec<f64>,
}

impl Sample {
    fn check_finite(&self) -> std::result::Result<(), String> {
        let outputs = [
            ("Q", self.q, self.dq.as_slice()),
            ("V", self.v, self.dv.as_slice()),
            ("pi", self.pi, self.dpi.as_slice()),
        ];
        for (label, value, gradient) in outputs {
            if !value.is_finite() {
                return Err(format!("Oracle returned non-finite {label} = {value}."));
            }
            if gradient.iter().any(|g| !g.is_finite()) {
                return Err(format!("Oracle returned a non-finite d{label}/dp."));
            }
        }
        Ok(())
    }
}

/// Parameter injection followed by the Q solve, the V solve and the policy read.
/// The order is fixed: the policy is only read after the state-value solve.
fn query_oracle<O>(oracle: &mut O, p: &[f64], x0: &[f64], u0: &[f64]) -> anyhow::Result<Sample>
where
    O: SensitivityOracle + ?Sized,
{
    for stage in 0..=oracle.horizon() {
        oracle.set_parameter(stage, p)?;
    }

    oracle.solve_action_value(x0, u0)?;
    let q = oracle.action_value();
    let dq = oracle.action_value_gradient();

    oracle.solve_state_value(x0)?;
    let v = oracle.value();
    let dv = oracle.value_gradient();

    let pi = oracle.policy();
    let dpi = oracle.policy_gradient();

    Ok(Sample {
        q,
        dq,
        v,
        dv,
        pi,
        dpi,
    })
}

/// Evaluates the oracle at every sweep sample, strictly in order.
pub fn evaluate_oracle_sequence<O>(
    oracle: &mut O,
    parameters: &[DVector<f64>],
    x0: &[f64],
    u0: &[f64],
    policy: FailurePolicy,
) -> Result<SensitivitySweep>
where
    O: SensitivityOracle + ?Sized,
{
    let n = parameters.len();
    let dim = parameters.first().map_or(0, |p| p.len());
    for p in parameters {
        ensure_dimension("Parameter", dim, p.len())?;
    }

    info!(samples = n, dimension = dim, "evaluating oracle over parameter sweep");

    let mut sweep = SensitivitySweep {
        parameters: parameters.to_vec(),
        status: Vec::with_capacity(n),
        value: FunctionalTrace::with_capacity(n, dim),
        action_value: FunctionalTrace::with_capacity(n, dim),
        policy: FunctionalTrace::with_capacity(n, dim),
    };

    for (i, p) in parameters.iter().enumerate() {
        let checked = match query_oracle(&mut *oracle, p.as_slice(), x0, u0) {
            Ok(sample) => {
                ensure_dimension("dQ/dp", dim, sample.dq.len())?;
                ensure_dimension("dV/dp", dim, sample.dv.len())?;
                ensure_dimension("dpi/dp", dim, sample.dpi.len())?;
                sample.check_finite().map(|()| sample)
            }
            Err(err) => Err(format!("{err:#}")),
        };
        let sample = match checked {
            Ok(sample) => sample,
            Err(reason) => match policy {
                FailurePolicy::Abort => {
                    return Err(SimError::OracleFailure { index: i, reason });
                }
                FailurePolicy::SkipAndContinue => {
                    warn!(index = i, %reason, "oracle failed, skipping sample");
                    sweep.status.push(SampleStatus::Failed { reason });
                    continue;
                }
            },
        };

        sweep.action_value.record(i, sample.q, &sample.dq);
        sweep.value.record(i, sample.v, &sample.dv);
        sweep.policy.record(i, sample.pi, &sample.dpi);
        sweep.status.push(SampleStatus::Solved);
        debug!(index = i, v = sample.v, q = sample.q, pi = sample.pi, "oracle sample");
    }

    info!(failed = sweep.failed_indices().len(), "parameter sweep finished");
    Ok(sweep)
}

/// First-order approximation anchored at `true_values[0]`, stepping with the
/// gradient at the destination sample.
pub fn build_first_order_approximation(
    true_values: &[f64],
    gradients: &DMatrix<f64>,
    parameters: &[DVector<f64>],
) -> Result<Vec<f64>> {
    let n = true_values.len();
    ensure_dimension("Gradient sequence", n, gradients.nrows())?;
    ensure_dimension("Parameter sequence", n, parameters.len())?;
    if n == 0 {
        return Ok(Vec::new());
    }
    for p in parameters {
        ensure_dimension("Gradient", p.len(), gradients.ncols())?;
    }

    let mut approx = Vec::with_capacity(n);
    approx.push(true_values[0]);
    for i in 1..n {
        let delta = &parameters[i] - &parameters[i - 1];
        let step = gradients.row(i).tr_dot(&delta);
        approx.push(approx[i - 1] + step);
    }
    Ok(approx)
}

impl SensitivitySweep {
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn trace(&self, functional: Functional) -> &FunctionalTrace {
        match functional {
            Functional::Value => &self.value,
            Functional::ActionValue => &self.action_value,
            Functional::Policy => &self.policy,
        }
    }

    /// True value at `index`, `None` where the oracle failed.
    pub fn true_value(&self, functional: Functional, index: usize) -> Option<f64> {
        match self.status.get(index)? {
            SampleStatus::Solved => Some(self.trace(functional).values[index]),
            SampleStatus::Failed { .. } => None,
        }
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.status
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, SampleStatus::Failed { .. }))
            .map(|(i, _)| i)
            .collect()
    }

    /// Approximation over every `stride`-th sample. Failed samples are left out and
    /// the recurrence continues from the last solved one.
    pub fn approximate(&self, functional: Functional, stride: usize) -> Result<Approximation> {
        if stride == 0 {
            return Err(SimError::precondition("Stride must be at least 1."));
        }

        let trace = self.trace(functional);
        let (indices, skipped): (Vec<usize>, Vec<usize>) = (0..self.len())
            .step_by(stride)
            .partition(|&i| matches!(self.status[i], SampleStatus::Solved));

        let truth: Vec<f64> = indices.iter().map(|&i| trace.values[i]).collect();
        let gradients = trace.gradients.select_rows(indices.iter());
        let parameters: Vec<DVector<f64>> =
            indices.iter().map(|&i| self.parameters[i].clone()).collect();
        let approx = build_first_order_approximation(&truth, &gradients, &parameters)?;

        Ok(Approximation {
            functional,
            stride,
            indices,
            truth,
            approx,
            skipped,
        })
    }

    /// Every functional at every stride, stride-major.
    pub fn compare_strides(&self, strides: &[usize]) -> Result<Vec<Approximation>> {
        let mut out = Vec::with_capacity(strides.len() * Functional::ALL.len());
        for &stride in strides {
            for functional in Functional::ALL {
                let approximation = self.approximate(functional, stride)?;
                debug!(
                    functional = functional.label(),
                    stride,
                    max_abs_error = approximation.max_abs_error(),
                    "approximation built"
                );
                out.push(approximation);
            }
        }
        Ok(out)
    }
}

/// Derivative of uniformly spaced samples: central differences inside, one-sided
/// differences at both ends.
pub fn finite_difference_gradient(values: &[f64], spacing: f64) -> Result<Vec<f64>> {
    let n = values.len();
    if n < 2 {
        return Err(SimError::precondition(
            "Finite differences need at least two samples.",
        ));
    }
    if !(spacing != 0.0) || !spacing.is_finite() {
        return Err(SimError::precondition(format!(
            "Sample spacing must be finite and non-zero, got {spacing}."
        )));
    }

    let mut out = vec![0.0; n];
    out[0] = (values[1] - values[0]) / spacing;
    out[n - 1] = (values[n - 1] - values[n - 2]) / spacing;
    for i in 1..n - 1 {
        out[i] = (values[i + 1] - values[i - 1]) / (2.0 * spacing);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    /// `V = (w·p)²`, `Q = V + w·p u0`, `π = w·p`, each with an exact gradient.
    /// Optionally fails when solving at a chosen call.
    struct ClosedFormOracle {
        w: Vec<f64>,
        horizon: usize,
        stages: Vec<Option<Vec<f64>>>,
        log: Vec<String>,
        fail_on_solve: Option<usize>,
        nan_on_solve: Option<usize>,
        solves: usize,
        v: f64,
        q: f64,
        pi: f64,
        s: f64,
        gradient_len: usize,
    }

    impl ClosedFormOracle {
        fn new(w: Vec<f64>, horizon: usize) -> Self {
            let gradient_len = w.len();
            Self {
                w,
                horizon,
                stages: vec![None; horizon + 1],
                log: Vec::new(),
                fail_on_solve: None,
                nan_on_solve: None,
                solves: 0,
                v: f64::NAN,
                q: f64::NAN,
                pi: f64::NAN,
                s: f64::NAN,
                gradient_len,
            }
        }

        fn shared_parameter(&self) -> anyhow::Result<Vec<f64>> {
            let first = self.stages[0].clone();
            if first.is_none() || self.stages.iter().any(|s| *s != first) {
                bail!("stages were not all parameterized identically");
            }
            Ok(first.unwrap_or_default())
        }

        fn solve(&mut self) -> anyhow::Result<()> {
            self.solves += 1;
            if self.fail_on_solve == Some(self.solves) {
                bail!("QP did not converge");
            }
            let p = self.shared_parameter()?;
            self.s = self.w.iter().zip(&p).map(|(w, p)| w * p).sum();
            if self.nan_on_solve == Some(self.solves) {
                self.s = f64::NAN;
            }
            Ok(())
        }

        fn scaled(&self, k: f64) -> Vec<f64> {
            let mut g: Vec<f64> = self.w.iter().map(|w| k * w).collect();
            g.resize(self.gradient_len, 0.0);
            g
        }
    }

    impl SensitivityOracle for ClosedFormOracle {
        fn horizon(&self) -> usize {
            self.horizon
        }

        fn set_parameter(&mut self, stage: usize, parameter: &[f64]) -> anyhow::Result<()> {
            self.log.push(format!("set:{stage}"));
            self.stages[stage] = Some(parameter.to_vec());
            Ok(())
        }

        fn solve_action_value(&mut self, _x0: &[f64], u0: &[f64]) -> anyhow::Result<()> {
            self.log.push("solve_q".to_string());
            self.solve()?;
            self.q = self.s * self.s + self.s * u0[0];
            self.pi = u0[0];
            Ok(())
        }

        fn solve_state_value(&mut self, _x0: &[f64]) -> anyhow::Result<()> {
            self.log.push("solve_v".to_string());
            self.solve()?;
            self.v = self.s * self.s;
            self.pi = self.s;
            Ok(())
        }

        fn value(&self) -> f64 {
            self.v
        }
        fn action_value(&self) -> f64 {
            self.q
        }
        fn policy(&self) -> f64 {
            self.pi
        }
        fn value_gradient(&self) -> Vec<f64> {
            self.scaled(2.0 * self.s)
        }
        fn action_value_gradient(&self) -> Vec<f64> {
            // u0 is fixed at 0.5 in these tests.
            self.scaled(2.0 * self.s + 0.5)
        }
        fn policy_gradient(&self) -> Vec<f64> {
            self.scaled(1.0)
        }
        fn parameters(&self) -> Vec<f64> {
            vec![0.0; self.w.len()]
        }
    }

    fn line_sweep() -> Vec<DVector<f64>> {
        generate_parameter_sweep(&[0.0, 0.0], &[1.0, 2.0], 100).unwrap()
    }

    fn evaluated(oracle: &mut ClosedFormOracle, policy: FailurePolicy) -> Result<SensitivitySweep> {
        evaluate_oracle_sequence(oracle, &line_sweep(), &[1.0], &[0.5], policy)
    }

    #[test]
    fn sweep_is_linear_and_starts_at_p_min() {
        let sweep = generate_parameter_sweep(&[1.0, -2.0, 0.5], &[3.0, 2.0, 0.5], 8).unwrap();
        assert_eq!(sweep.len(), 8);
        assert_eq!(sweep[0].as_slice(), &[1.0, -2.0, 0.5]);
        let step = &sweep[1] - &sweep[0];
        for i in 1..sweep.len() {
            let delta = &sweep[i] - &sweep[i - 1];
            assert!((delta - &step).amax() < 1e-12);
        }
        assert!((sweep[7][0] - (1.0 + 2.0 * 7.0 / 8.0)).abs() < 1e-15);
    }

    #[test]
    fn sweep_rejects_degenerate_inputs() {
        assert_err_contains(generate_parameter_sweep(&[0.0], &[1.0], 0), "at least one step");
        assert_err_contains(
            generate_parameter_sweep(&[0.0], &[1.0, 2.0], 4),
            "dimension mismatch",
        );
        assert_err_contains(single_parameter_sweep(&[1.0], 3, 0.9, 1.1, 5), "out of range");
    }

    #[test]
    fn single_parameter_sweep_moves_one_component() {
        let sweep = single_parameter_sweep(&[2.0, 5.0], 1, 0.9, 1.1, 10).unwrap();
        assert_eq!(sweep.len(), 10);
        for p in &sweep {
            assert_eq!(p[0], 2.0);
        }
        assert!((sweep[0][1] - 4.5).abs() < 1e-15);
        assert!((sweep[9][1] - (4.5 + 1.0 * 9.0 / 10.0)).abs() < 1e-12);
    }

    #[test]
    fn oracle_is_driven_in_documented_order() {
        let mut oracle = ClosedFormOracle::new(vec![1.0, 1.0], 2);
        let sweep = vec![DVector::from_vec(vec![0.1, 0.2]), DVector::from_vec(vec![0.3, 0.4])];
        let result =
            evaluate_oracle_sequence(&mut oracle, &sweep, &[1.0], &[0.5], FailurePolicy::Abort)
                .unwrap();

        let per_sample = ["set:0", "set:1", "set:2", "solve_q", "solve_v"];
        let expected: Vec<&str> = per_sample.iter().chain(per_sample.iter()).copied().collect();
        assert_eq!(oracle.log, expected);

        // The policy is read after the state-value solve, not the action-value solve.
        assert!((result.policy.values[1] - 0.7).abs() < 1e-15);
        assert!((result.value.values[1] - 0.49).abs() < 1e-15);
        assert!((result.action_value.values[1] - (0.49 + 0.35)).abs() < 1e-15);
        assert_eq!(result.value.gradients.nrows(), 2);
        assert_eq!(result.value.gradients.ncols(), 2);
    }

    #[test]
    fn approximation_is_anchored_and_follows_the_recurrence() {
        let mut oracle = ClosedFormOracle::new(vec![1.0, 1.0], 3);
        let sweep = evaluated(&mut oracle, FailurePolicy::Abort).unwrap();

        for functional in Functional::ALL {
            let trace = sweep.trace(functional);
            let approx =
                build_first_order_approximation(&trace.values, &trace.gradients, &sweep.parameters)
                    .unwrap();
            assert_eq!(approx[0], trace.values[0]);
            for i in 1..approx.len() {
                let delta = &sweep.parameters[i] - &sweep.parameters[i - 1];
                let expected = trace.gradients.row(i).transpose().dot(&delta);
                assert!((approx[i] - approx[i - 1] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn linear_functional_is_reproduced_exactly() {
        let mut oracle = ClosedFormOracle::new(vec![1.0, 1.0], 1);
        let sweep = evaluated(&mut oracle, FailurePolicy::Abort).unwrap();
        for stride in [1, 2, 3] {
            let approx = sweep.approximate(Functional::Policy, stride).unwrap();
            assert!(approx.max_abs_error() < 1e-12);
        }
    }

    #[test]
    fn coarser_stride_degrades_quadratic_value() {
        let mut oracle = ClosedFormOracle::new(vec![1.0, 1.0], 1);
        let sweep = evaluated(&mut oracle, FailurePolicy::Abort).unwrap();
        let family = sweep.compare_strides(&[3, 2, 1]).unwrap();
        assert_eq!(family.len(), 9);

        let error = |stride: usize| {
            family
                .iter()
                .find(|a| a.stride == stride && a.functional == Functional::Value)
                .map(|a| a.max_abs_error())
                .unwrap()
        };

        // Each destination-gradient step on s² overshoots by exactly h², h = 0.03·stride.
        assert!((error(1) - 99.0 * 0.03 * 0.03).abs() < 1e-9);
        assert!((error(3) - 33.0 * 0.09 * 0.09).abs() < 1e-9);
        assert!(error(3) >= error(2));
        assert!(error(2) >= error(1));

        let strided = family
            .iter()
            .find(|a| a.stride == 3 && a.functional == Functional::Value)
            .unwrap();
        assert_eq!(strided.indices.len(), 34);
        assert_eq!(strided.indices[1], 3);
        assert_eq!(strided.approx[0], strided.truth[0]);
    }

    #[test]
    fn abort_policy_reports_failing_index() {
        let mut oracle = ClosedFormOracle::new(vec![1.0, 1.0], 1);
        // Two solves per sample, so the 9th solve is the Q solve of sample 4.
        oracle.fail_on_solve = Some(9);
        let err = evaluated(&mut oracle, FailurePolicy::Abort).expect_err("oracle failure");
        match err {
            SimError::OracleFailure { index, reason } => {
                assert_eq!(index, 4);
                assert!(reason.contains("did not converge"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn skip_policy_marks_failures_and_bridges_them() {
        let mut oracle = ClosedFormOracle::new(vec![1.0, 1.0], 1);
        oracle.fail_on_solve = Some(9);
        let sweep = evaluated(&mut oracle, FailurePolicy::SkipAndContinue).unwrap();

        assert_eq!(sweep.failed_indices(), vec![4]);
        assert_eq!(sweep.true_value(Functional::Value, 4), None);
        assert!(sweep.true_value(Functional::Value, 5).is_some());

        let approx = sweep.approximate(Functional::Policy, 2).unwrap();
        assert_eq!(approx.skipped, vec![4]);
        assert!(!approx.indices.contains(&4));
        assert_eq!(approx.indices[2], 6);
        assert!(approx.max_abs_error() < 1e-12);
    }

    #[test]
    fn non_finite_output_is_an_oracle_failure() {
        let mut oracle = ClosedFormOracle::new(vec![1.0, 1.0], 1);
        oracle.nan_on_solve = Some(9);
        let err = evaluated(&mut oracle, FailurePolicy::Abort).expect_err("NaN must not be recorded");
        match err {
            SimError::OracleFailure { index, reason } => {
                assert_eq!(index, 4);
                assert!(reason.contains("non-finite Q"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let mut oracle = ClosedFormOracle::new(vec![1.0, 1.0], 1);
        oracle.nan_on_solve = Some(10);
        let sweep = evaluated(&mut oracle, FailurePolicy::SkipAndContinue).unwrap();
        assert_eq!(sweep.failed_indices(), vec![4]);
        assert_eq!(sweep.true_value(Functional::Value, 4), None);
        let approx = sweep.approximate(Functional::Value, 1).unwrap();
        assert_eq!(approx.skipped, vec![4]);
        assert!(approx.max_abs_error().is_finite());
    }

    #[test]
    fn nan_entries_surface_in_max_error() {
        let approx = Approximation {
            functional: Functional::Value,
            stride: 1,
            indices: vec![0, 1, 2],
            truth: vec![1.0, 2.0, 3.0],
            approx: vec![1.0, f64::NAN, 3.5],
            skipped: Vec::new(),
        };
        assert!(approx.max_abs_error().is_nan());

        let clean = Approximation {
            approx: vec![1.0, 2.25, 3.5],
            ..approx
        };
        assert!((clean.max_abs_error() - 0.5).abs() < 1e-15);
    }

    #[test]
    fn gradient_dimension_mismatch_is_fatal() {
        let mut oracle = ClosedFormOracle::new(vec![1.0, 1.0], 1);
        oracle.gradient_len = 3;
        assert_err_contains(
            evaluated(&mut oracle, FailurePolicy::SkipAndContinue),
            "dimension mismatch",
        );

        let parameters = line_sweep();
        let gradients = DMatrix::zeros(parameters.len(), 3);
        let values = vec![0.0; parameters.len()];
        assert_err_contains(
            build_first_order_approximation(&values, &gradients, &parameters),
            "Gradient dimension mismatch",
        );
        assert_err_contains(
            build_first_order_approximation(&values[1..], &gradients, &parameters),
            "Gradient sequence",
        );
    }

    #[test]
    fn zero_stride_is_rejected() {
        let mut oracle = ClosedFormOracle::new(vec![1.0, 1.0], 1);
        let sweep = evaluated(&mut oracle, FailurePolicy::Abort).unwrap();
        assert_err_contains(sweep.approximate(Functional::Value, 0), "Stride");
    }

    #[test]
    fn empty_inputs_give_empty_approximation() {
        let approx = build_first_order_approximation(&[], &DMatrix::zeros(0, 2), &[]).unwrap();
        assert!(approx.is_empty());
    }

    #[test]
    fn finite_differences_are_exact_for_quadratics_inside() {
        let h = 0.1;
        let values: Vec<f64> = (0..6).map(|i| (i as f64 * h).powi(2)).collect();
        let grad = finite_difference_gradient(&values, h).unwrap();
        for i in 1..5 {
            assert!((grad[i] - 2.0 * i as f64 * h).abs() < 1e-12);
        }
        assert!((grad[0] - 0.1).abs() < 1e-12);
        assert!((grad[5] - 0.9).abs() < 1e-12);
        assert_err_contains(finite_difference_gradient(&[1.0], h), "two samples");
        assert_err_contains(finite_difference_gradient(&values, 0.0), "spacing");
    }
}
