pub mod error;
pub mod input;
pub mod integrate;
pub mod model;
pub mod reduction;
pub mod sensitivity;
pub mod solvers;
pub mod stepper;
/// The `llint_core` crate integrates nonlinear MIMO state-space models forward in time
/// with a local-linearization exponential integrator. It is meant to be called repeatedly
/// as the forward model of an estimation loop, once per parameter vector.
///
/// Key components:
/// - **Traits**: `StateEquation` / `OutputEquation` (model callbacks), `Stepper` (time steppers).
/// - **Model**: `ModelSpec` with optional fields, resolved once into a `ModelAdapter`.
/// - **Sensitivity**: Jacobian at the initial state and its first-order sensitivities.
/// - **Reduction**: eigen-reduction of the delay-adjusted Jacobian with degenerate-mode filtering.
/// - **Stepper**: the per-step exponential update in the reduced eigenbasis.
/// - **Integrate**: the driver that assembles state and observation trajectories.
pub mod traits;

pub use error::ModelError;
pub use input::InputSpec;
pub use integrate::{
    integrate, integrate_with, integrate_with_settings, IntegratorSettings, Trajectory,
};
pub use model::{IdentityOutput, ModelAdapter, ModelSpec, ZeroDynamics};
pub use traits::{OutputEquation, StateEquation, Stepper};
