//! Eigen-reduction of the delay-adjusted Jacobian.
//!
//! The Jacobian D·J is diagonalized once. Modes whose eigenvalue has a
//! negligible real part are dropped, and the state and input sensitivities are
//! projected onto the retained modes keeping only their diagonal (within-mode)
//! part. Cross-mode coupling of the sensitivities is not represented.

use crate::sensitivity::Sensitivities;
use anyhow::{anyhow, bail, Result};
use nalgebra::linalg::SVD;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use tracing::{debug, warn};

/// Default real-part cutoff for retained modes, exp(-16).
pub const MODE_THRESHOLD: f64 = 1.125_351_747_192_591e-7;

/// Fixed reduced eigenbasis of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenReduction {
    /// Retained eigenvectors V (n x k), unit-normalized columns.
    pub vectors: DMatrix<Complex<f64>>,
    /// Retained eigenvalues, the diagonal of S.
    pub eigenvalues: DVector<Complex<f64>>,
    /// Pseudo-inverse iV of `vectors` (k x n).
    pub inverse: DMatrix<Complex<f64>>,
    /// diag(iV·D·dJ/dx_j·V) for every state dimension j.
    pub d_state: Vec<DVector<Complex<f64>>>,
    /// diag(iV·D·dJ/du_j·V) for every input dimension j.
    pub d_input: Vec<DVector<Complex<f64>>>,
    /// Number of modes before filtering.
    pub total_modes: usize,
}

impl EigenReduction {
    fn without_modes(n: usize, state_terms: usize, input_terms: usize) -> Self {
        Self {
            vectors: DMatrix::zeros(n, 0),
            eigenvalues: DVector::zeros(0),
            inverse: DMatrix::zeros(0, n),
            d_state: vec![DVector::zeros(0); state_terms],
            d_input: vec![DVector::zeros(0); input_terms],
            total_modes: n,
        }
    }

    /// Number of retained modes k.
    pub fn modes(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn dimension(&self) -> usize {
        self.vectors.nrows()
    }
}

/// Reduces D·J to its retained eigenmodes and projects the sensitivities.
///
/// `pinv_tolerance` overrides the singular-value cutoff of the pseudo-inverse;
/// the default is `max(n, k) · σ_max · ε`.
pub fn reduce(
    sensitivities: &Sensitivities,
    mode_threshold: f64,
    pinv_tolerance: Option<f64>,
) -> Result<EigenReduction> {
    let n = sensitivities.dimension();
    let state_terms = sensitivities.d_state.len();
    let input_terms = sensitivities.d_input.len();
    if n == 0 {
        return Ok(EigenReduction::without_modes(0, state_terms, input_terms));
    }

    let adjusted = &sensitivities.delay * &sensitivities.jacobian;
    if adjusted.iter().any(|v| !v.is_finite()) {
        bail!("Delay-adjusted Jacobian contains non-finite entries.");
    }

    let retained: Vec<(Complex<f64>, DVector<Complex<f64>>)> = compute_eigenpairs(&adjusted)?
        .into_iter()
        .filter(|(lambda, _)| lambda.re.abs() > mode_threshold)
        .collect();
    let k = retained.len();
    debug!(modes = n, retained = k, "Reduced Jacobian eigenbasis");

    if k == 0 {
        warn!(modes = n, "All Jacobian modes are negligible; dynamics are frozen");
        return Ok(EigenReduction::without_modes(n, state_terms, input_terms));
    }

    let mut vectors: DMatrix<Complex<f64>> = DMatrix::zeros(n, k);
    let mut eigenvalues: DVector<Complex<f64>> = DVector::zeros(k);
    for (col, (lambda, vector)) in retained.iter().enumerate() {
        eigenvalues[col] = *lambda;
        vectors.set_column(col, vector);
    }
    let inverse = pseudo_inverse(&vectors, pinv_tolerance)?;

    let left = &inverse * complexify(&sensitivities.delay);
    let project = |matrix: &DMatrix<f64>| (&left * complexify(matrix) * &vectors).diagonal();
    let d_state = sensitivities.d_state.iter().map(project).collect();
    let d_input = sensitivities.d_input.iter().map(project).collect();

    Ok(EigenReduction {
        vectors,
        eigenvalues,
        inverse,
        d_state,
        d_input,
        total_modes: n,
    })
}

pub(crate) fn complexify(matrix: &DMatrix<f64>) -> DMatrix<Complex<f64>> {
    matrix.map(|v| Complex::new(v, 0.0))
}

/// Eigenpairs of a real square matrix in the eigensolver's order.
///
/// Each eigenvector is a null vector of (A - λI) from its SVD. Repeated
/// eigenvalues take successive null vectors while the null space has room,
/// so a diagonalizable matrix gets a full basis.
pub fn compute_eigenpairs(
    matrix: &DMatrix<f64>,
) -> Result<Vec<(Complex<f64>, DVector<Complex<f64>>)>> {
    let dim = matrix.nrows();
    if dim == 0 {
        return Ok(Vec::new());
    }
    let eigenvalues = matrix.complex_eigenvalues();
    let complex_matrix = complexify(matrix);
    let scale = matrix.amax().max(1.0);

    let mut pairs: Vec<(Complex<f64>, DVector<Complex<f64>>)> = Vec::with_capacity(dim);
    for idx in 0..dim {
        let lambda = eigenvalues[idx];

        let mut shifted = complex_matrix.clone();
        for i in 0..dim {
            shifted[(i, i)] -= lambda;
        }

        let svd = SVD::new(shifted, true, true);
        let v_t = svd
            .v_t
            .as_ref()
            .ok_or_else(|| anyhow!("Failed to compute eigenvector for eigenvalue index {}", idx))?;

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| {
            svd.singular_values[a]
                .partial_cmp(&svd.singular_values[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let cluster_tol = 1e-6 * (1.0 + lambda.norm());
        let mut rank = pairs
            .iter()
            .filter(|(prev, _)| (prev - lambda).norm() <= cluster_tol)
            .count();
        let null_tol = 1e-8 * scale;
        if rank >= order.len() || svd.singular_values[order[rank]] > null_tol {
            rank = 0;
        }

        let row = v_t.row(order[rank]);
        let mut vector: DVector<Complex<f64>> = row.map(|c| c.conj()).transpose();
        normalize_complex_vector(&mut vector);
        pairs.push((lambda, vector));
    }
    Ok(pairs)
}

/// Moore-Penrose pseudo-inverse through the SVD.
pub fn pseudo_inverse(
    matrix: &DMatrix<Complex<f64>>,
    tolerance: Option<f64>,
) -> Result<DMatrix<Complex<f64>>> {
    let svd = SVD::new(matrix.clone(), true, true);
    let sigma_max = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    let tolerance = tolerance.unwrap_or_else(|| {
        matrix.nrows().max(matrix.ncols()) as f64 * sigma_max * f64::EPSILON
    });
    svd.pseudo_inverse(tolerance)
        .map_err(|e| anyhow!("Pseudo-inverse of the eigenvector basis failed: {}", e))
}

fn normalize_complex_vector(vec: &mut DVector<Complex<f64>>) {
    let norm = vec.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    if norm > 0.0 {
        for entry in vec.iter_mut() {
            *entry /= norm;
        }
    }
}
