//! Gym-style session around the evaporation model.
//!
//! A session is either unstarted or ready. `reset` puts it in the ready state at a
//! fixed initial condition; `step` validates the action against the configured box,
//! advances the state by one RK4 step and reports a reward chosen by [`RewardMode`].

use crate::error::{ensure_dimension, Result, SimError};
use crate::process::{
    compute_algebraic_variables, economic_cost, AlgebraicVariables, EvaporationModel,
    ProcessAction, ProcessParameters, ProcessState, INITIAL_STATE,
};
use crate::solvers::RK4;
use crate::traits::Steppable;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Axis-aligned box `[low, high]`, bounds inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSpace {
    low: Vec<f64>,
    high: Vec<f64>,
}

impl BoxSpace {
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> Result<Self> {
        let space = Self { low, high };
        space.validate()?;
        Ok(space)
    }

    pub fn validate(&self) -> Result<()> {
        if self.low.len() != self.high.len() {
            return Err(SimError::configuration(format!(
                "Box bounds have different lengths ({} vs {}).",
                self.low.len(),
                self.high.len()
            )));
        }
        for (i, (lo, hi)) in self.low.iter().zip(&self.high).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(SimError::configuration(format!(
                    "Malformed box bound at index {i}: [{lo}, {hi}]."
                )));
            }
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.low.len()
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == self.dimension()
            && x
                .iter()
                .zip(self.low.iter().zip(&self.high))
                .all(|(v, (lo, hi))| lo <= v && v <= hi)
    }
}

/// What `step` reports as reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardMode {
    /// Constant zero, leaving reward shaping to the caller.
    #[default]
    Zero,
    /// [`economic_cost`] at the post-step state and the applied action.
    EconomicCost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub action_space: BoxSpace,
    pub observation_space: BoxSpace,
    pub params: ProcessParameters,
    pub step_size: f64,
    pub reward: RewardMode,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            action_space: BoxSpace {
                low: vec![100.0, 100.0],
                high: vec![400.0, 400.0],
            },
            observation_space: BoxSpace {
                low: vec![25.0, 40.0],
                high: vec![100.0, 80.0],
            },
            params: ProcessParameters::default(),
            step_size: 1.0,
            reward: RewardMode::Zero,
        }
    }
}

impl EnvironmentConfig {
    pub fn validate(&self) -> Result<()> {
        self.action_space.validate()?;
        self.observation_space.validate()?;
        if self.action_space.dimension() != 2 || self.observation_space.dimension() != 2 {
            return Err(SimError::configuration(
                "Action and observation spaces must be two-dimensional.",
            ));
        }
        if self.action_space.low[1] <= 0.0 {
            return Err(SimError::configuration(format!(
                "Coolant flow lower bound must be positive, got {}.",
                self.action_space.low[1]
            )));
        }
        if !(self.step_size > 0.0) || !self.step_size.is_finite() {
            return Err(SimError::configuration(format!(
                "step_size must be positive, got {}.",
                self.step_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetOptions {
    /// Overrides [`INITIAL_STATE`].
    pub initial_state: Option<ProcessState>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Steps taken since the last reset.
    pub steps: usize,
    /// Simulated time since the last reset.
    pub time: f64,
    pub within_observation_bounds: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub observation: ProcessState,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Session {
    Unstarted,
    Ready {
        state: ProcessState,
        steps: usize,
        time: f64,
    },
}

pub struct EvaporationEnv {
    config: EnvironmentConfig,
    model: EvaporationModel,
    stepper: RK4<f64>,
    session: Session,
    algebraic: Option<AlgebraicVariables>,
    seed: Option<u64>,
}

impl EvaporationEnv {
    pub fn new(config: EnvironmentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model: EvaporationModel::new(config.params),
            config,
            stepper: RK4::new(2),
            session: Session::Unstarted,
            algebraic: None,
            seed: None,
        })
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn action_space(&self) -> &BoxSpace {
        &self.config.action_space
    }

    pub fn observation_space(&self) -> &BoxSpace {
        &self.config.observation_space
    }

    /// Seed passed to the most recent `reset`. The dynamics are deterministic; the
    /// seed is only recorded.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Current state, `None` before the first reset.
    pub fn state(&self) -> Option<ProcessState> {
        match self.session {
            Session::Unstarted => None,
            Session::Ready { state, .. } => Some(state),
        }
    }

    /// Algebraic variables at the latest post-step state.
    pub fn algebraic_variables(&self) -> Option<&AlgebraicVariables> {
        self.algebraic.as_ref()
    }

    /// Looks up an algebraic variable from the latest snapshot, then a model parameter.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.algebraic
            .as_ref()
            .and_then(|alg| alg.get(key))
            .or_else(|| self.config.params.get(key))
    }

    /// Starts a new episode. An initial-state override must be finite.
    pub fn reset(
        &mut self,
        seed: Option<u64>,
        options: Option<ResetOptions>,
    ) -> Result<(ProcessState, StepInfo)> {
        let state = options
            .and_then(|o| o.initial_state)
            .unwrap_or(INITIAL_STATE);
        if state.iter().any(|x| !x.is_finite()) {
            return Err(SimError::precondition(format!(
                "Initial state must be finite, got {state:?}."
            )));
        }
        if seed.is_some() {
            self.seed = seed;
        }
        self.session = Session::Ready {
            state,
            steps: 0,
            time: 0.0,
        };
        self.algebraic = None;
        info!(?state, ?seed, "environment reset");

        let info = StepInfo {
            steps: 0,
            time: 0.0,
            within_observation_bounds: self.config.observation_space.contains(&state),
        };
        Ok((state, info))
    }

    pub fn step(&mut self, action: &[f64]) -> Result<Step> {
        let Session::Ready { state, steps, time } = self.session else {
            return Err(SimError::precondition(
                "Environment not reset: call reset before step.",
            ));
        };
        ensure_dimension("Action", 2, action.len())?;
        if !self.config.action_space.contains(action) {
            return Err(SimError::precondition(format!(
                "Invalid action {action:?}: outside [{:?}, {:?}].",
                self.config.action_space.low, self.config.action_space.high
            )));
        }
        let action: ProcessAction = [action[0], action[1]];

        let mut next = state;
        self.stepper
            .step(&self.model, &mut next, &action, self.config.step_size)?;
        let algebraic = compute_algebraic_variables(&next, &action, &self.config.params)?;

        let reward = match self.config.reward {
            RewardMode::Zero => 0.0,
            RewardMode::EconomicCost => economic_cost(&next, &action, &self.config.params)?,
        };

        let steps = steps + 1;
        let time = time + self.config.step_size;
        self.session = Session::Ready {
            state: next,
            steps,
            time,
        };
        self.algebraic = Some(algebraic);
        debug!(steps, ?action, state = ?next, reward, "environment step");

        Ok(Step {
            observation: next,
            reward,
            terminated: false,
            truncated: false,
            info: StepInfo {
                steps,
                time,
                within_observation_bounds: self.config.observation_space.contains(&next),
            },
        })
    }
}
