//! Typed failures raised at the model boundary.
//!
//! Public operations return `anyhow::Result`; these variants travel inside the
//! `anyhow::Error` and can be recovered with `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Returned by an output equation that cannot produce an observation.
    /// The driver records the state vector instead.
    #[error("output equation could not be resolved")]
    OutputUnavailable,

    #[error("state equation returned {got} derivatives, expected {expected}")]
    MotionDimension { expected: usize, got: usize },

    #[error("{name} must be {expected}x{expected}, got {rows}x{cols}")]
    OperatorShape {
        name: &'static str,
        rows: usize,
        cols: usize,
        expected: usize,
    },
}

impl ModelError {
    /// True when `err` carries `ModelError::OutputUnavailable`.
    pub fn is_output_unavailable(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::OutputUnavailable)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ModelError;
    use anyhow::anyhow;

    #[test]
    fn output_unavailable_survives_anyhow_round_trip() {
        let err: anyhow::Error = ModelError::OutputUnavailable.into();
        assert!(ModelError::is_output_unavailable(&err));

        let wrapped = err.context("evaluating observation");
        assert!(ModelError::is_output_unavailable(&wrapped));
    }

    #[test]
    fn other_errors_are_not_output_unavailable() {
        let err = anyhow!("boom");
        assert!(!ModelError::is_output_unavailable(&err));

        let err: anyhow::Error = ModelError::MotionDimension { expected: 2, got: 1 }.into();
        assert!(!ModelError::is_output_unavailable(&err));
        assert_eq!(
            format!("{err}"),
            "state equation returned 1 derivatives, expected 2"
        );
    }
}
