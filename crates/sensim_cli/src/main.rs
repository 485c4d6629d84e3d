// Thin harness around the sensim_core library.
// Results go to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sensim_core::config::{load_json, AnalysisConfig};
use sensim_core::environment::{EnvironmentConfig, EvaporationEnv, ResetOptions};
use sensim_core::oracle::LinearQuadraticOracle;
use sensim_core::process::{AlgebraicVariables, ProcessState};
use sensim_core::sensitivity::{evaluate_oracle_sequence, Approximation, Functional};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sensim", about = "Evaporation process simulation and value sensitivity analysis")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the evaporation environment under a constant action.
    Simulate {
        /// JSON environment config; defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of environment steps.
        #[arg(long, default_value_t = 10)]
        steps: usize,

        /// Steam pressure P100 and coolant flow F200.
        #[arg(long, value_delimiter = ',', num_args = 2, default_values_t = [100.0, 100.0])]
        action: Vec<f64>,

        /// Initial [X2, P2] instead of the default reset state.
        #[arg(long, value_delimiter = ',', num_args = 2)]
        initial_state: Option<Vec<f64>>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Sweep the LQ oracle's parameters and compare first-order approximations.
    Sensitivity {
        /// JSON analysis config; defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only report the maximum error per functional and stride.
        #[arg(long)]
        summary: bool,
    },
}

#[derive(Serialize)]
struct SimulationRecord {
    step: usize,
    time: f64,
    state: ProcessState,
    reward: f64,
    algebraic: Option<AlgebraicVariables>,
}

#[derive(Serialize)]
struct StrideSummary {
    functional: Functional,
    stride: usize,
    samples: usize,
    max_abs_error: f64,
}

#[derive(Serialize)]
#[serde(untagged)]
enum SensitivityReport {
    Summary {
        failed: Vec<usize>,
        strides: Vec<StrideSummary>,
    },
    Full {
        failed: Vec<usize>,
        approximations: Vec<Approximation>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Simulate {
            config,
            steps,
            action,
            initial_state,
            seed,
        } => simulate(config, steps, &action, initial_state, seed),
        Command::Sensitivity { config, summary } => sensitivity(config, summary),
    }
}

fn simulate(
    config: Option<PathBuf>,
    steps: usize,
    action: &[f64],
    initial_state: Option<Vec<f64>>,
    seed: Option<u64>,
) -> Result<()> {
    let config: EnvironmentConfig = match config {
        Some(path) => load_json(&path).context("Failed to load environment config")?,
        None => EnvironmentConfig::default(),
    };
    let mut env = EvaporationEnv::new(config)?;

    let options = initial_state.map(|x| ResetOptions {
        initial_state: Some([x[0], x[1]]),
    });
    let (state, _) = env.reset(seed, options)?;

    let mut records = Vec::with_capacity(steps + 1);
    records.push(SimulationRecord {
        step: 0,
        time: 0.0,
        state,
        reward: 0.0,
        algebraic: None,
    });
    for _ in 0..steps {
        let step = env.step(action)?;
        records.push(SimulationRecord {
            step: step.info.steps,
            time: step.info.time,
            state: step.observation,
            reward: step.reward,
            algebraic: env.algebraic_variables().copied(),
        });
    }

    info!(steps, "simulation finished");
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn sensitivity(config: Option<PathBuf>, summary: bool) -> Result<()> {
    let config: AnalysisConfig = match config {
        Some(path) => load_json(&path).context("Failed to load analysis config")?,
        None => AnalysisConfig::default(),
    };
    config.validate()?;

    let mut oracle = LinearQuadraticOracle::new(config.horizon, &config.nominal_parameters)?;
    let sweep = config.sweep()?;
    let result = evaluate_oracle_sequence(
        &mut oracle,
        &sweep,
        &config.initial_state,
        &config.initial_action,
        config.failure_policy,
    )?;
    let approximations = result.compare_strides(&config.strides)?;

    for a in &approximations {
        info!(
            functional = a.functional.label(),
            stride = a.stride,
            max_abs_error = a.max_abs_error(),
            "stride comparison"
        );
    }

    let failed = result.failed_indices();
    let report = if summary {
        SensitivityReport::Summary {
            failed,
            strides: approximations
                .iter()
                .map(|a| StrideSummary {
                    functional: a.functional,
                    stride: a.stride,
                    samples: a.indices.len(),
                    max_abs_error: a.max_abs_error(),
                })
                .collect(),
        }
    } else {
        SensitivityReport::Full {
            failed,
            approximations,
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
