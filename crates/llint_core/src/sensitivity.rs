//! Jacobian of the state equation at the initial condition, together with its
//! first-order sensitivities to state and input.
//!
//! Sensitivities are central differences of the Jacobian itself. When the model
//! has no analytic Jacobian, each Jacobian is in turn a central difference of
//! the motion, so the sensitivities are nested second-order differences.

use crate::model::ModelAdapter;
use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Central-difference directional derivative provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CentralDifference {
    /// Base step; the step along coordinate z is `step * max(|z|, 1)`.
    pub step: f64,
}

impl Default for CentralDifference {
    fn default() -> Self {
        Self { step: 1e-4 }
    }
}

impl CentralDifference {
    pub fn new(step: f64) -> Self {
        Self { step }
    }

    fn increment(&self, z: f64) -> f64 {
        self.step * if z.is_finite() { z.abs().max(1.0) } else { 1.0 }
    }

    /// Derivative of a matrix-valued function along coordinate `index` of `z`.
    pub fn directional<F>(
        &self,
        z: &DVector<f64>,
        index: usize,
        mut eval: F,
    ) -> Result<DMatrix<f64>>
    where
        F: FnMut(&DVector<f64>) -> Result<DMatrix<f64>>,
    {
        let h = self.increment(z[index]);
        let mut shifted = z.clone();
        shifted[index] = z[index] + h;
        let plus = eval(&shifted)?;
        shifted[index] = z[index] - h;
        let minus = eval(&shifted)?;
        Ok((plus - minus) / (2.0 * h))
    }

    /// Numerical Jacobian df/dx of the model's motion at (x, u).
    pub fn jacobian<P: ?Sized>(
        &self,
        model: &ModelAdapter<'_, P>,
        x: &DVector<f64>,
        u: &DVector<f64>,
        params: &P,
    ) -> Result<DMatrix<f64>> {
        let n = x.len();
        let mut jacobian = DMatrix::zeros(n, n);
        for col in 0..n {
            let column = self.directional(x, col, |xs| {
                let fx = model.motion(xs, u, params)?;
                Ok(DMatrix::from_column_slice(n, 1, fx.as_slice()))
            })?;
            jacobian.set_column(col, &column.column(0));
        }
        Ok(jacobian)
    }
}

/// Linearization of a model at its initial condition.
#[derive(Debug, Clone)]
pub struct Sensitivities {
    /// J = df/dx.
    pub jacobian: DMatrix<f64>,
    /// Delay operator D.
    pub delay: DMatrix<f64>,
    /// dJ/dx_j, one matrix per state dimension.
    pub d_state: Vec<DMatrix<f64>>,
    /// dJ/du_j, one matrix per input dimension.
    pub d_input: Vec<DMatrix<f64>>,
}

impl Sensitivities {
    pub fn empty() -> Self {
        Self {
            jacobian: DMatrix::zeros(0, 0),
            delay: DMatrix::zeros(0, 0),
            d_state: Vec::new(),
            d_input: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.jacobian.nrows()
    }
}

/// Computes J, D, dJ/dx and dJ/du at (x, u).
///
/// An analytic Jacobian, when the model supplies one at (x, u), is used for J
/// and differenced for the sensitivities.
pub fn build_sensitivities<P: ?Sized>(
    model: &ModelAdapter<'_, P>,
    x: &DVector<f64>,
    u: &DVector<f64>,
    params: &P,
    provider: &CentralDifference,
) -> Result<Sensitivities> {
    if x.is_empty() {
        return Ok(Sensitivities::empty());
    }

    let delay = model.delay(x, u, params)?;
    let analytic = model.analytic_jacobian(x, u, params)?;
    let use_analytic = analytic.is_some();
    let jacobian_at = |xs: &DVector<f64>, us: &DVector<f64>| -> Result<DMatrix<f64>> {
        if use_analytic {
            model
                .analytic_jacobian(xs, us, params)?
                .ok_or_else(|| {
                    anyhow!("Analytic Jacobian is unavailable away from the initial state.")
                })
        } else {
            provider.jacobian(model, xs, us, params)
        }
    };

    let jacobian = match analytic {
        Some(j) => j,
        None => provider.jacobian(model, x, u, params)?,
    };

    let d_state = (0..x.len())
        .map(|j| provider.directional(x, j, |xs| jacobian_at(xs, u)))
        .collect::<Result<Vec<_>>>()?;
    let d_input = (0..u.len())
        .map(|j| provider.directional(u, j, |us| jacobian_at(x, us)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Sensitivities {
        jacobian,
        delay,
        d_state,
        d_input,
    })
}
