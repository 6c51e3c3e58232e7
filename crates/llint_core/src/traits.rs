use crate::model::ModelAdapter;
use anyhow::Result;
use nalgebra::{DMatrix, DVector};

/// The state equation dx/dt = f(x, u, P) of a continuous-time model.
///
/// Only `motion` is required. Models that know their Jacobian or carry a
/// delay operator can report them; otherwise the Jacobian is estimated
/// numerically and the delay operator is the identity.
pub trait StateEquation<P: ?Sized> {
    /// Evaluates the time derivative at state `x` under input `u`.
    fn motion(&self, x: &DVector<f64>, u: &DVector<f64>, params: &P) -> Result<DVector<f64>>;

    /// Analytic Jacobian df/dx, if available.
    fn jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        _params: &P,
    ) -> Result<Option<DMatrix<f64>>> {
        Ok(None)
    }

    /// Delay operator D premultiplying the Jacobian and the motion.
    /// `None` stands for the identity.
    fn delay(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        _params: &P,
    ) -> Result<Option<DMatrix<f64>>> {
        Ok(None)
    }
}

/// The output equation y = g(x, u, P).
pub trait OutputEquation<P: ?Sized> {
    /// Evaluates the observation. Returning `ModelError::OutputUnavailable`
    /// makes the driver record the state instead.
    fn observe(&self, x: &DVector<f64>, u: &DVector<f64>, params: &P) -> Result<DVector<f64>>;
}

impl<P: ?Sized, F> StateEquation<P> for F
where
    F: Fn(&DVector<f64>, &DVector<f64>, &P) -> Result<DVector<f64>>,
{
    fn motion(&self, x: &DVector<f64>, u: &DVector<f64>, params: &P) -> Result<DVector<f64>> {
        self(x, u, params)
    }
}

impl<P: ?Sized, F> OutputEquation<P> for F
where
    F: Fn(&DVector<f64>, &DVector<f64>, &P) -> Result<DVector<f64>>,
{
    fn observe(&self, x: &DVector<f64>, u: &DVector<f64>, params: &P) -> Result<DVector<f64>> {
        self(x, u, params)
    }
}

/// A scheme that advances a model by one sample.
pub trait Stepper<P: ?Sized> {
    /// Advances `state` by `dt` under the input `u` held over the step.
    fn step(
        &mut self,
        model: &ModelAdapter<'_, P>,
        params: &P,
        state: &mut DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> Result<()>;
}
