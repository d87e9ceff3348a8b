//! Column standardization used by the linear classifier.
//!
//! The scaler is fitted once on the training matrix and stored inside the
//! fitted model, so inference and attribution see the same transformation.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::math::Array2;

/// Simple standard scaler (per-column mean/std).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Scaler {
    /// Minimum stddev to avoid division by zero when transforming.
    const MIN_STD: f64 = 1e-12;

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Standardize a single row.
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// Fit a `Scaler` from an `Array2<f64>` where rows are samples and
/// columns are features.
pub fn fit_scaler(x: &Array2<f64>) -> Result<Scaler> {
    let (nrows, ncols) = x.shape();
    if nrows == 0 || ncols == 0 {
        return Err(PipelineError::InvalidInput(
            "cannot fit a scaler on an empty matrix".into(),
        ));
    }

    let mean = x.column_means();
    let mut var = vec![0.0f64; ncols];
    for row in x.rows() {
        for c in 0..ncols {
            let d = row[c] - mean[c];
            var[c] += d * d;
        }
    }
    let nrows_f = nrows as f64;
    for v in var.iter_mut() {
        // constant columns keep unit scale
        let sd = (*v / nrows_f).sqrt();
        *v = if sd < Scaler::MIN_STD { 1.0 } else { sd };
    }

    Ok(Scaler { mean, std: var })
}

/// Transform all rows using the provided `Scaler` and return a new `Array2<f64>`.
pub fn transform_all(x: &Array2<f64>, sc: &Scaler) -> Result<Array2<f64>> {
    let (nrows, ncols) = x.shape();
    if ncols != sc.n_features() {
        return Err(PipelineError::InvalidInput(format!(
            "scaler expects {} features, got {}",
            sc.n_features(),
            ncols
        )));
    }
    let mut out = Vec::with_capacity(nrows * ncols);
    for row in x.rows() {
        out.extend(sc.transform_row(row));
    }
    Array2::from_shape_vec((nrows, ncols), out)
        .map_err(|e| PipelineError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_column_is_centered_not_scaled() {
        let x = Array2::from_shape_vec((3, 2), vec![1.0, 5.0, 2.0, 5.0, 3.0, 5.0]).unwrap();
        let sc = fit_scaler(&x).unwrap();
        assert_eq!(sc.std[1], 1.0);

        let z = transform_all(&x, &sc).unwrap();
        assert!((z[(0, 0)] + z[(2, 0)]).abs() < 1e-12);
        assert_eq!(z[(1, 1)], 0.0);
    }

    #[test]
    fn empty_matrix_is_rejected() {
        let x: Array2<f64> = Array2::zeros(0, 3);
        assert!(fit_scaler(&x).is_err());
    }
}
