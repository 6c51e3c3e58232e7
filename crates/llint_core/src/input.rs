use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

/// Input waveform for one run: one row of `u` per sample, plus the sample interval.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub u: DMatrix<f64>,
    pub dt: Option<f64>,
}

impl InputSpec {
    pub fn new(u: DMatrix<f64>) -> Self {
        Self { u, dt: None }
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = Some(dt);
        self
    }

    /// Number of input rows (samples).
    pub fn rows(&self) -> usize {
        self.u.nrows()
    }

    /// Sample interval, defaulting to 1.
    pub fn dt(&self) -> Result<f64> {
        let dt = self.dt.unwrap_or(1.0);
        if !dt.is_finite() || dt <= 0.0 {
            bail!("Step size dt must be positive and finite, got {}.", dt);
        }
        Ok(dt)
    }

    /// Input held over sample `index`. Past the last row the last row is held;
    /// with no rows at all the input is zero of width `inputs`.
    pub fn sample(&self, index: usize, inputs: usize) -> DVector<f64> {
        match self.u.nrows() {
            0 => DVector::zeros(inputs),
            rows => self.u.row(index.min(rows - 1)).transpose(),
        }
    }
}

impl Default for InputSpec {
    fn default() -> Self {
        Self::new(DMatrix::zeros(0, 0))
    }
}

impl From<DMatrix<f64>> for InputSpec {
    fn from(u: DMatrix<f64>) -> Self {
        Self::new(u)
    }
}

#[cfg(test)]
mod tests {
    use super::InputSpec;
    use nalgebra::DMatrix;

    #[test]
    fn raw_matrix_defaults_to_unit_step() {
        let input: InputSpec = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]).into();
        assert_eq!(input.dt().expect("dt should resolve"), 1.0);
        assert_eq!(input.rows(), 2);
    }

    #[test]
    fn dt_must_be_positive() {
        let input = InputSpec::default().with_dt(0.0);
        let err = input.dt().expect_err("expected dt error");
        assert!(format!("{err}").contains("dt must be positive"));

        let input = InputSpec::default().with_dt(f64::NAN);
        assert!(input.dt().is_err());
    }

    #[test]
    fn sample_holds_last_row_past_the_end() {
        let input = InputSpec::new(DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(input.sample(0, 2).as_slice(), &[1.0, 2.0]);
        assert_eq!(input.sample(1, 2).as_slice(), &[3.0, 4.0]);
        assert_eq!(input.sample(7, 2).as_slice(), &[3.0, 4.0]);
    }

    #[test]
    fn sample_without_rows_is_zero() {
        let input = InputSpec::default();
        let u = input.sample(3, 2);
        assert_eq!(u.len(), 2);
        assert!(u.iter().all(|v| *v == 0.0));
    }
}
