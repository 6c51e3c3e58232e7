//! Model specification and the adapter that resolves its defaults.
//!
//! A `ModelSpec` mirrors the loosely specified model structures used by
//! estimation pipelines: every field is optional. `ModelSpec::resolve`
//! fills in the defaults once, producing a `ModelAdapter` with a uniform
//! calling convention for motion, delay operator and observation.

use crate::error::ModelError;
use crate::input::InputSpec;
use crate::traits::{OutputEquation, StateEquation};
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

/// State equation of a model without dynamics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroDynamics;

impl<P: ?Sized> StateEquation<P> for ZeroDynamics {
    fn motion(&self, x: &DVector<f64>, _u: &DVector<f64>, _params: &P) -> Result<DVector<f64>> {
        Ok(DVector::zeros(x.len()))
    }
}

/// Output equation that observes the full state.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityOutput;

impl<P: ?Sized> OutputEquation<P> for IdentityOutput {
    fn observe(&self, x: &DVector<f64>, _u: &DVector<f64>, _params: &P) -> Result<DVector<f64>> {
        Ok(x.clone())
    }
}

pub struct ModelSpec<'a, P: ?Sized> {
    /// State dimension.
    pub n: Option<usize>,
    /// Input dimension, used when the input matrix has no rows.
    pub m: Option<usize>,
    /// Initial state.
    pub x: Option<DVector<f64>>,
    pub f: Option<Box<dyn StateEquation<P> + 'a>>,
    pub g: Option<Box<dyn OutputEquation<P> + 'a>>,
    /// Number of samples to integrate.
    pub ns: Option<usize>,
}

impl<'a, P: ?Sized> Default for ModelSpec<'a, P> {
    fn default() -> Self {
        Self {
            n: None,
            m: None,
            x: None,
            f: None,
            g: None,
            ns: None,
        }
    }
}

impl<'a, P: ?Sized> ModelSpec<'a, P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(mut self, n: usize) -> Self {
        self.n = Some(n);
        self
    }

    pub fn with_inputs(mut self, m: usize) -> Self {
        self.m = Some(m);
        self
    }

    pub fn with_initial_state(mut self, x: DVector<f64>) -> Self {
        self.x = Some(x);
        self
    }

    pub fn with_samples(mut self, ns: usize) -> Self {
        self.ns = Some(ns);
        self
    }

    pub fn with_state_equation(mut self, f: impl StateEquation<P> + 'a) -> Self {
        self.f = Some(Box::new(f));
        self
    }

    /// Closure form of `with_state_equation`; the closure signature is inferred.
    pub fn with_motion<F>(self, f: F) -> Self
    where
        F: Fn(&DVector<f64>, &DVector<f64>, &P) -> Result<DVector<f64>> + 'a,
    {
        self.with_state_equation(f)
    }

    pub fn with_output_equation(mut self, g: impl OutputEquation<P> + 'a) -> Self {
        self.g = Some(Box::new(g));
        self
    }

    /// Closure form of `with_output_equation`.
    pub fn with_output<G>(self, g: G) -> Self
    where
        G: Fn(&DVector<f64>, &DVector<f64>, &P) -> Result<DVector<f64>> + 'a,
    {
        self.with_output_equation(g)
    }

    /// Resolves every absent field to its default against the run's input.
    pub fn resolve(self, input: &InputSpec) -> Result<ModelAdapter<'a, P>> {
        let (f, x0): (Box<dyn StateEquation<P> + 'a>, DVector<f64>) = match self.f {
            Some(f) => {
                let x0 = match (self.n, self.x) {
                    (Some(n), Some(x)) if x.len() != n => bail!(
                        "Initial state dimension mismatch. Expected {}, got {}.",
                        n,
                        x.len()
                    ),
                    (_, Some(x)) => x,
                    (Some(n), None) => DVector::zeros(n),
                    (None, None) => DVector::zeros(0),
                };
                (f, x0)
            }
            None => {
                if self.n.unwrap_or(0) > 0 || self.x.as_ref().is_some_and(|x| !x.is_empty()) {
                    debug!("No state equation supplied; state collapses to zero dimensions");
                }
                (Box::new(ZeroDynamics), DVector::zeros(0))
            }
        };
        if x0.iter().any(|v| !v.is_finite()) {
            bail!("Initial state contains non-finite values.");
        }

        let inputs = if input.rows() > 0 {
            let width = input.u.ncols();
            if let Some(m) = self.m.filter(|&m| m != width) {
                bail!(
                    "Input dimension mismatch. Expected {} columns, got {}.",
                    m,
                    width
                );
            }
            width
        } else {
            self.m.unwrap_or(input.u.ncols())
        };

        let g = self
            .g
            .unwrap_or_else(|| Box::new(IdentityOutput) as Box<dyn OutputEquation<P> + 'a>);

        Ok(ModelAdapter {
            f,
            g,
            x0,
            inputs,
            samples: self.ns.unwrap_or(input.rows()),
        })
    }
}

/// A model with all defaults resolved.
pub struct ModelAdapter<'a, P: ?Sized> {
    f: Box<dyn StateEquation<P> + 'a>,
    g: Box<dyn OutputEquation<P> + 'a>,
    x0: DVector<f64>,
    inputs: usize,
    samples: usize,
}

impl<'a, P: ?Sized> ModelAdapter<'a, P> {
    /// State dimension n.
    pub fn dimension(&self) -> usize {
        self.x0.len()
    }

    /// Input dimension m.
    pub fn inputs(&self) -> usize {
        self.inputs
    }

    /// Number of samples ns.
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn initial_state(&self) -> &DVector<f64> {
        &self.x0
    }

    /// dx/dt at (x, u), checked against the state dimension.
    pub fn motion(&self, x: &DVector<f64>, u: &DVector<f64>, params: &P) -> Result<DVector<f64>> {
        let fx = self.f.motion(x, u, params)?;
        if fx.len() != x.len() {
            return Err(ModelError::MotionDimension {
                expected: x.len(),
                got: fx.len(),
            }
            .into());
        }
        Ok(fx)
    }

    /// Delay operator at (x, u); the identity unless the state equation supplies one.
    pub fn delay(&self, x: &DVector<f64>, u: &DVector<f64>, params: &P) -> Result<DMatrix<f64>> {
        let n = x.len();
        match self.f.delay(x, u, params)? {
            Some(d) => {
                check_square("delay operator", &d, n)?;
                Ok(d)
            }
            None => Ok(DMatrix::identity(n, n)),
        }
    }

    /// Analytic Jacobian at (x, u), when the state equation supplies one.
    pub fn analytic_jacobian(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        params: &P,
    ) -> Result<Option<DMatrix<f64>>> {
        let jacobian = self.f.jacobian(x, u, params)?;
        if let Some(j) = &jacobian {
            check_square("analytic Jacobian", j, x.len())?;
        }
        Ok(jacobian)
    }

    /// Observation at (x, u). Falls back to the state when the output
    /// equation reports `ModelError::OutputUnavailable`.
    pub fn observe(&self, x: &DVector<f64>, u: &DVector<f64>, params: &P) -> Result<DVector<f64>> {
        match self.g.observe(x, u, params) {
            Ok(y) => Ok(y),
            Err(err) if ModelError::is_output_unavailable(&err) => {
                warn!(states = x.len(), "Output equation unavailable; recording state");
                Ok(x.clone())
            }
            Err(err) => Err(err),
        }
    }
}

fn check_square(name: &'static str, matrix: &DMatrix<f64>, n: usize) -> Result<()> {
    if matrix.nrows() != n || matrix.ncols() != n {
        return Err(ModelError::OperatorShape {
            name,
            rows: matrix.nrows(),
            cols: matrix.ncols(),
            expected: n,
        }
        .into());
    }
    Ok(())
}
