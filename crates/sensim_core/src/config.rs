//! Serde-backed settings for the analysis driver, plus a JSON loader shared with
//! [`EnvironmentConfig`](crate::environment::EnvironmentConfig).

use crate::error::{Result, SimError};
use crate::sensitivity::{generate_parameter_sweep, FailurePolicy};
use nalgebra::DVector;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameter sweep from `lower_scale·p_nom` to `upper_scale·p_nom`, evaluated with the
/// synthetic LQ oracle and compared at several strides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub horizon: usize,
    pub nominal_parameters: Vec<f64>,
    pub lower_scale: f64,
    pub upper_scale: f64,
    pub steps: usize,
    pub strides: Vec<usize>,
    pub initial_state: Vec<f64>,
    pub initial_action: Vec<f64>,
    pub failure_policy: FailurePolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            horizon: 20,
            nominal_parameters: vec![0.9, 0.5, 1.0, 0.1],
            lower_scale: 1.0,
            upper_scale: 3.0,
            steps: 100,
            strides: vec![3, 2, 1],
            initial_state: vec![1.0],
            initial_action: vec![-0.5],
            failure_policy: FailurePolicy::Abort,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(SimError::configuration("horizon must be at least 1."));
        }
        if self.steps == 0 {
            return Err(SimError::configuration("steps must be at least 1."));
        }
        if self.strides.is_empty() || self.strides.contains(&0) {
            return Err(SimError::configuration(
                "strides must be a non-empty list of positive integers.",
            ));
        }
        if self.nominal_parameters.is_empty() {
            return Err(SimError::configuration("nominal_parameters is empty."));
        }
        Ok(())
    }

    pub fn sweep(&self) -> Result<Vec<DVector<f64>>> {
        let scaled = |k: f64| -> Vec<f64> {
            self.nominal_parameters.iter().map(|p| k * p).collect()
        };
        generate_parameter_sweep(
            &scaled(self.lower_scale),
            &scaled(self.upper_scale),
            self.steps,
        )
    }
}

/// Reads a JSON document into `T`. Absent fields take their defaults where `T` allows.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|err| {
        SimError::configuration(format!("Failed to read {}: {err}", path.display()))
    })?;
    parse_json(&text)
        .map_err(|err| SimError::configuration(format!("{}: {err}", path.display())))
}

pub fn parse_json<T: DeserializeOwned>(text: &str) -> std::result::Result<T, serde_json::Error> {
    serde_json::from_str(text)
}
