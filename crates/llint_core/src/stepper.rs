use crate::integrate::IntegratorSettings;
use crate::model::ModelAdapter;
use crate::reduction::{complexify, reduce, EigenReduction};
use crate::sensitivity::{build_sensitivities, CentralDifference};
use crate::traits::Stepper;
use anyhow::{Context, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use tracing::trace;

/// Per-mode exponential-integrator kernel (e^(λ·dt) - 1) / λ.
///
/// Below `tolerance` on |λ·dt| the kernel is evaluated by its Taylor series,
/// which equals `dt` at λ = 0.
pub fn exponential_kernel(rate: Complex<f64>, dt: f64, tolerance: f64) -> Complex<f64> {
    let w = rate * dt;
    if w.norm() < tolerance {
        dt * (1.0 + w * (0.5 + w / 6.0))
    } else {
        (w.exp() - 1.0) / rate
    }
}

/// Local-linearization step in a fixed reduced eigenbasis.
///
/// The Jacobian, its sensitivities and the eigenbasis are computed once from
/// the initial condition. Each step rebuilds the per-mode rates from the
/// deviation to the initial state and the current input, then applies the
/// exponential update mode by mode.
pub struct LocalLinearStep {
    origin: DVector<f64>,
    reduction: EigenReduction,
    /// iV·D, projecting the motion onto the retained modes.
    projector: DMatrix<Complex<f64>>,
    kernel_tolerance: f64,
    rates: DVector<Complex<f64>>,
    deviation: DVector<f64>,
    motion: DVector<Complex<f64>>,
    modal: DVector<Complex<f64>>,
    update: DVector<Complex<f64>>,
}

impl LocalLinearStep {
    /// Linearizes `model` at its initial state under input `u0`.
    pub fn new<P: ?Sized>(
        model: &ModelAdapter<'_, P>,
        params: &P,
        u0: &DVector<f64>,
        settings: &IntegratorSettings,
    ) -> Result<Self> {
        let origin = model.initial_state().clone();
        let provider = CentralDifference::new(settings.fd_step);
        let sensitivities = build_sensitivities(model, &origin, u0, params, &provider)
            .context("Failed to estimate the Jacobian and its sensitivities.")?;
        let reduction = reduce(
            &sensitivities,
            settings.mode_threshold,
            settings.pinv_tolerance,
        )
        .context("Failed to reduce the Jacobian to its eigenbasis.")?;

        let projector = if reduction.modes() == 0 {
            DMatrix::zeros(0, origin.len())
        } else {
            &reduction.inverse * complexify(&sensitivities.delay)
        };
        let n = origin.len();
        let k = reduction.modes();
        let rates = reduction.eigenvalues.clone();

        Ok(Self {
            origin,
            reduction,
            projector,
            kernel_tolerance: settings.kernel_tolerance,
            rates,
            deviation: DVector::zeros(n),
            motion: DVector::zeros(n),
            modal: DVector::zeros(k),
            update: DVector::zeros(n),
        })
    }

    pub fn reduction(&self) -> &EigenReduction {
        &self.reduction
    }

    /// Current per-mode rates dfdx = J + Σ dJdx_j·Δx_j + Σ dJdu_j·u_j.
    fn update_rates(&mut self, u: &DVector<f64>) {
        let one = Complex::new(1.0, 0.0);
        self.rates.copy_from(&self.reduction.eigenvalues);
        for (sens, dx) in self.reduction.d_state.iter().zip(self.deviation.iter()) {
            self.rates.axpy(Complex::new(*dx, 0.0), sens, one);
        }
        for (sens, uj) in self.reduction.d_input.iter().zip(u.iter()) {
            self.rates.axpy(Complex::new(*uj, 0.0), sens, one);
        }
    }
}

impl<P: ?Sized> Stepper<P> for LocalLinearStep {
    fn step(
        &mut self,
        model: &ModelAdapter<'_, P>,
        params: &P,
        state: &mut DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> Result<()> {
        self.deviation.copy_from(&*state);
        self.deviation -= &self.origin;
        let fx = model.motion(state, u, params)?;
        if self.reduction.modes() == 0 {
            return Ok(());
        }

        self.update_rates(u);
        trace!(
            min_rate = self
                .rates
                .iter()
                .map(|r| r.norm() * dt)
                .fold(f64::INFINITY, f64::min),
            "Local mode rates"
        );

        let one = Complex::new(1.0, 0.0);
        let zero = Complex::new(0.0, 0.0);
        for (target, value) in self.motion.iter_mut().zip(fx.iter()) {
            *target = Complex::new(*value, 0.0);
        }
        self.modal.gemv(one, &self.projector, &self.motion, zero);
        for (mode, rate) in self.modal.iter_mut().zip(self.rates.iter()) {
            *mode *= exponential_kernel(*rate, dt, self.kernel_tolerance);
        }
        self.update.gemv(one, &self.reduction.vectors, &self.modal, zero);
        for (x, d) in state.iter_mut().zip(self.update.iter()) {
            *x += d.re;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{exponential_kernel, LocalLinearStep};
    use crate::input::InputSpec;
    use crate::integrate::IntegratorSettings;
    use crate::model::ModelSpec;
    use crate::traits::Stepper;
    use nalgebra::{DMatrix, DVector};
    use num_complex::Complex;

    #[test]
    fn kernel_limit_is_dt_at_zero_rate() {
        let k = exponential_kernel(Complex::new(0.0, 0.0), 0.25, 1e-5);
        assert_eq!(k, Complex::new(0.25, 0.0));
    }

    #[test]
    fn kernel_series_agrees_with_closed_form() {
        let dt = 0.5;
        let rate = Complex::new(1e-4, -2e-5);
        let series = exponential_kernel(rate, dt, 1e-3);
        let closed = exponential_kernel(rate, dt, 1e-9);
        assert!(series.re.is_finite() && closed.re.is_finite());
        assert!((series - closed).norm() < 1e-10);
        assert!((series.re - dt).abs() < 1e-4);
    }

    #[test]
    fn kernel_matches_closed_form_for_complex_rate() {
        let rate = Complex::new(-0.5, 2.0);
        let dt = 0.3;
        let k = exponential_kernel(rate, dt, 1e-5);
        let expected = ((rate * dt).exp() - 1.0) / rate;
        assert!((k - expected).norm() < 1e-15);
    }

    #[test]
    fn kernel_handles_tiny_nonzero_rates_without_cancellation() {
        let rate = Complex::new(-1e-12, 0.0);
        let k = exponential_kernel(rate, 1.0, 1e-5);
        assert!((k.re - (1.0 - 0.5e-12)).abs() < 1e-15);
        assert!(k.re < 1.0);
    }

    #[test]
    fn step_advances_scalar_decay_exactly() {
        let a = 0.7;
        let model = ModelSpec::<f64>::new()
            .with_initial_state(DVector::from_vec(vec![2.0]))
            .with_motion(|x, _u, rate| Ok(x * -*rate))
            .resolve(&InputSpec::default())
            .expect("model should resolve");
        let u0 = DVector::zeros(0);
        let mut stepper = LocalLinearStep::new(&model, &a, &u0, &IntegratorSettings::default())
            .expect("stepper should build");
        assert_eq!(stepper.reduction().modes(), 1);

        let mut state = model.initial_state().clone();
        stepper
            .step(&model, &a, &mut state, &u0, 0.4)
            .expect("step should succeed");
        assert!((state[0] - 2.0 * (-a * 0.4f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn repeated_steps_reuse_work_vectors() {
        let a = DMatrix::from_row_slice(2, 2, &[-1.0, 0.5, 0.0, -3.0]);
        let flow = a.clone();
        let model = ModelSpec::<()>::new()
            .with_initial_state(DVector::from_vec(vec![1.0, 1.0]))
            .with_motion(move |x, _u, _p| Ok(&flow * x))
            .resolve(&InputSpec::default())
            .expect("model should resolve");
        let u0 = DVector::zeros(0);
        let mut stepper = LocalLinearStep::new(&model, &(), &u0, &IntegratorSettings::default())
            .expect("stepper should build");
        assert_eq!(stepper.modal.len(), 2);
        assert_eq!(stepper.update.len(), 2);

        let dt = 0.25;
        let mut state = model.initial_state().clone();
        for step in 1..=4 {
            stepper
                .step(&model, &(), &mut state, &u0, dt)
                .expect("step should succeed");
            let expected = (&a * (step as f64 * dt)).exp() * model.initial_state();
            assert!((&state - &expected).norm() < 1e-7, "step {step}");
        }
        assert_eq!(stepper.deviation.len(), 2);
        assert_eq!(stepper.motion.len(), 2);
    }

    #[test]
    fn input_sensitivity_shifts_the_rate() {
        // dx/dt = -u x: the rate at input u is -u, linearized around u0 = 1.
        let model = ModelSpec::<()>::new()
            .with_initial_state(DVector::from_vec(vec![1.0]))
            .with_motion(|x, u, _p| Ok(x * -u[0]))
            .resolve(&InputSpec::new(DMatrix::from_row_slice(1, 1, &[1.0])))
            .expect("model should resolve");
        let u0 = DVector::from_vec(vec![1.0]);
        let mut stepper = LocalLinearStep::new(&model, &(), &u0, &IntegratorSettings::default())
            .expect("stepper should build");

        let reduction = stepper.reduction();
        assert!((reduction.eigenvalues[0].re + 1.0).abs() < 1e-7);
        assert!((reduction.d_input[0][0].re + 1.0).abs() < 1e-5);

        // Rates are J + dJdu·u = -1 - u, so at u = 1 the mode decays at rate 2.
        let mut state = model.initial_state().clone();
        stepper
            .step(&model, &(), &mut state, &u0, 0.5)
            .expect("step should succeed");
        let expected = 1.0 + ((-2.0f64 * 0.5).exp() - 1.0) / -2.0 * -1.0;
        assert!((state[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn frozen_modes_leave_state_unchanged() {
        let model = ModelSpec::<()>::new()
            .with_initial_state(DVector::from_vec(vec![3.0, -1.0]))
            .with_motion(|x, _u, _p| Ok(DVector::zeros(x.len())))
            .resolve(&InputSpec::default())
            .expect("model should resolve");
        let u0 = DVector::zeros(0);
        let mut stepper = LocalLinearStep::new(&model, &(), &u0, &IntegratorSettings::default())
            .expect("stepper should build");
        assert_eq!(stepper.reduction().modes(), 0);

        let mut state = model.initial_state().clone();
        for _ in 0..3 {
            stepper
                .step(&model, &(), &mut state, &u0, 1.0)
                .expect("step should succeed");
        }
        assert_eq!(state.as_slice(), &[3.0, -1.0]);
    }
}
