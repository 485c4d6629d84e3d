pub mod autodiff;
pub mod config;
pub mod environment;
pub mod error;
pub mod oracle;
pub mod process;
pub mod sensitivity;
pub mod solvers;
/// The `sensim_core` crate simulates a two-state evaporation process and studies
/// sensitivity-based approximations of an optimal controller's value functions.
///
/// Key components:
/// - **Traits**: `Scalar` (numeric type abstraction), `ControlledSystem` (ODE with input), `Steppable` (Solvers).
/// - **Process**: Algebraic and differential evaporator model, economic cost, linearization.
/// - **Solvers**: Fixed-step RK4 with zero-order hold on the input.
/// - **Environment**: Reset/step session with a box-constrained action space.
/// - **Sensitivity**: Oracle-driven parameter sweeps and first-order value approximations.
/// - **Autodiff**: Dual numbers for Jacobians and parameter gradients.
pub mod traits;
