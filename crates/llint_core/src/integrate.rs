use crate::input::InputSpec;
use crate::model::{ModelAdapter, ModelSpec};
use crate::reduction::MODE_THRESHOLD;
use crate::stepper::LocalLinearStep;
use crate::traits::Stepper;
use anyhow::{bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntegratorSettings {
    /// Base step of the central differences used for the Jacobian and its sensitivities.
    pub fd_step: f64,
    /// Modes with |Re(λ)| at or below this value are dropped.
    pub mode_threshold: f64,
    /// Below this |dfdx·dt| the exponential kernel uses its series expansion.
    pub kernel_tolerance: f64,
    /// Singular-value cutoff of the eigenbasis pseudo-inverse; `None` picks
    /// `max(n, k) · σ_max · ε`.
    #[serde(default)]
    pub pinv_tolerance: Option<f64>,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            fd_step: 1e-4,
            mode_threshold: MODE_THRESHOLD,
            kernel_tolerance: 1e-5,
            pinv_tolerance: None,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.fd_step.is_finite() || self.fd_step <= 0.0 {
            bail!("fd_step must be positive.");
        }
        if !self.mode_threshold.is_finite() || self.mode_threshold < 0.0 {
            bail!("mode_threshold must be non-negative.");
        }
        if !self.kernel_tolerance.is_finite() || self.kernel_tolerance <= 0.0 {
            bail!("kernel_tolerance must be positive.");
        }
        if let Some(tol) = self.pinv_tolerance {
            if !tol.is_finite() || tol < 0.0 {
                bail!("pinv_tolerance must be non-negative.");
            }
        }
        Ok(())
    }
}

/// Output of one integration run.
#[derive(Debug, Clone)]
pub struct Trajectory {
    /// Observations, one row per sample (ns x l).
    pub y: DMatrix<f64>,
    /// States, one column per sample (n x ns).
    pub neural: DMatrix<f64>,
    pub dt: f64,
}

impl Trajectory {
    pub fn samples(&self) -> usize {
        self.y.nrows()
    }

    /// Time at the end of each sample: dt, 2dt, ..., ns·dt.
    pub fn times(&self) -> Vec<f64> {
        (1..=self.samples()).map(|i| i as f64 * self.dt).collect()
    }
}

/// Integrates `model` under `input` with the local-linearization scheme and
/// default settings.
pub fn integrate<P: ?Sized>(
    params: &P,
    model: ModelSpec<'_, P>,
    input: impl Into<InputSpec>,
) -> Result<Trajectory> {
    integrate_with_settings(params, model, input, &IntegratorSettings::default())
}

pub fn integrate_with_settings<P: ?Sized>(
    params: &P,
    model: ModelSpec<'_, P>,
    input: impl Into<InputSpec>,
    settings: &IntegratorSettings,
) -> Result<Trajectory> {
    settings.validate()?;
    let input = input.into();
    let model = model.resolve(&input)?;
    let u0 = input.sample(0, model.inputs());
    let mut stepper = LocalLinearStep::new(&model, params, &u0, settings)?;
    debug!(
        retained = stepper.reduction().modes(),
        modes = stepper.reduction().total_modes,
        "Linearized model at initial state"
    );
    integrate_with(params, &model, &input, &mut stepper)
}

/// Runs `stepper` over every sample, recording state and observation after each step.
pub fn integrate_with<P: ?Sized, S: Stepper<P>>(
    params: &P,
    model: &ModelAdapter<'_, P>,
    input: &InputSpec,
    stepper: &mut S,
) -> Result<Trajectory> {
    let dt = input.dt()?;
    let n = model.dimension();
    let m = model.inputs();
    let ns = model.samples();
    if input.rows() > 0 && input.u.ncols() != m {
        bail!(
            "Input dimension mismatch. Expected {} columns, got {}.",
            m,
            input.u.ncols()
        );
    }
    debug!(states = n, inputs = m, samples = ns, dt, "Starting integration");

    let mut state = model.initial_state().clone();
    let mut neural = DMatrix::<f64>::zeros(n, ns);
    let mut observations: Vec<DVector<f64>> = Vec::with_capacity(ns);
    let mut diverged = false;

    for i in 0..ns {
        let u = input.sample(i, m);
        stepper
            .step(model, params, &mut state, &u, dt)
            .with_context(|| format!("Integration failed at step {}.", i + 1))?;
        if !diverged && state.iter().any(|v| !v.is_finite()) {
            warn!(step = i + 1, "State became non-finite");
            diverged = true;
        }
        neural.set_column(i, &state);

        let y = model
            .observe(&state, &u, params)
            .with_context(|| format!("Output equation failed at step {}.", i + 1))?;
        if let Some(first) = observations.first() {
            if first.len() != y.len() {
                bail!(
                    "Observation dimension changed at step {}: expected {}, got {}.",
                    i + 1,
                    first.len(),
                    y.len()
                );
            }
        }
        observations.push(y);
    }

    let l = observations.first().map_or(0, |y| y.len());
    let y = DMatrix::from_fn(l, ns, |r, c| observations[c][r]).transpose();
    debug!(samples = ns, outputs = l, "Integration complete");

    Ok(Trajectory { y, neural, dt })
}
