use crate::model::ModelAdapter;
use crate::traits::Stepper;
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

/// Classic Runge-Kutta 4th Order reference stepper.
///
/// Integrates dx/dt = D·f(x, u) with the delay operator taken at the initial
/// condition, so it follows the same flow as `LocalLinearStep`. Each sample is
/// split into `substeps` RK4 steps.
pub struct Rk4 {
    substeps: usize,
    delay: DMatrix<f64>,
    tmp: DVector<f64>,
}

impl Rk4 {
    pub fn new<P: ?Sized>(
        model: &ModelAdapter<'_, P>,
        params: &P,
        u0: &DVector<f64>,
        substeps: usize,
    ) -> Result<Self> {
        if substeps == 0 {
            bail!("substeps must be at least 1.");
        }
        let x0 = model.initial_state();
        Ok(Self {
            substeps,
            delay: model.delay(x0, u0, params)?,
            tmp: DVector::zeros(x0.len()),
        })
    }

    fn rate<P: ?Sized>(
        &self,
        model: &ModelAdapter<'_, P>,
        params: &P,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        Ok(&self.delay * model.motion(x, u, params)?)
    }
}

impl<P: ?Sized> Stepper<P> for Rk4 {
    fn step(
        &mut self,
        model: &ModelAdapter<'_, P>,
        params: &P,
        state: &mut DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> Result<()> {
        let h = dt / self.substeps as f64;
        let half = 0.5 * h;

        for _ in 0..self.substeps {
            // k1 = f(y)
            let k1 = self.rate(model, params, &*state, u)?;

            // k2 = f(y + h*k1/2)
            self.tmp.copy_from(&*state);
            self.tmp.axpy(half, &k1, 1.0);
            let k2 = self.rate(model, params, &self.tmp, u)?;

            // k3 = f(y + h*k2/2)
            self.tmp.copy_from(&*state);
            self.tmp.axpy(half, &k2, 1.0);
            let k3 = self.rate(model, params, &self.tmp, u)?;

            // k4 = f(y + h*k3)
            self.tmp.copy_from(&*state);
            self.tmp.axpy(h, &k3, 1.0);
            let k4 = self.rate(model, params, &self.tmp, u)?;

            // y_next = y + h/6 * (k1 + 2k2 + 2k3 + k4)
            for i in 0..state.len() {
                state[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
            }
        }
        Ok(())
    }
}
