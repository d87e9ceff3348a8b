use crate::error::{PipelineError, Result};
use crate::math::{argmax, Array2};
use crate::models::ensemble::TreeEnsemble;

/// Maps raw model outputs to class probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// One log-odds margin for the positive class of a binary target.
    Logistic,
    /// One margin per class.
    Softmax,
    /// Outputs already are class probabilities.
    Identity,
}

impl Link {
    pub fn to_proba(&self, raw: &[f64], n_classes: usize) -> Vec<f64> {
        match self {
            Link::Logistic => {
                let p = sigmoid(raw[0]);
                vec![1.0 - p, p]
            }
            Link::Softmax => softmax(raw),
            Link::Identity => {
                let clipped: Vec<f64> = raw.iter().map(|p| p.clamp(0.0, 1.0)).collect();
                let total: f64 = clipped.iter().sum();
                if total > 0.0 {
                    clipped.iter().map(|p| p / total).collect()
                } else {
                    vec![1.0 / n_classes as f64; n_classes]
                }
            }
        }
    }
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

pub fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = z.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exp.iter().sum();
    exp.iter().map(|e| e / total).collect()
}

/// Contract shared by every classifier in the registry.
///
/// Labels are class indices `0..n_classes`. Fitted models are read-only and
/// shared across threads, hence the `Send + Sync` bound.
pub trait ClassifierModel: Send + Sync {
    /// Fit on `x`/`y`; `sample_weight` has one entry per row.
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        sample_weight: &[f64],
    ) -> Result<()>;

    fn is_fitted(&self) -> bool;

    fn n_classes(&self) -> usize;

    fn n_features(&self) -> usize;

    /// Number of raw outputs (1 for a binary margin).
    fn n_outputs(&self) -> usize;

    fn link(&self) -> Link;

    /// Raw outputs (margins or probabilities, see [`Link`]) for one row.
    fn predict_raw_row(&self, row: &[f64]) -> Result<Vec<f64>>;

    /// Optional human readable name for the model
    fn name(&self) -> &str {
        "classifier"
    }

    /// Fitted tree structure, for models that have one.
    fn tree_ensemble(&self) -> Option<&TreeEnsemble> {
        None
    }

    fn predict_raw(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let rows = x
            .rows()
            .map(|row| self.predict_raw_row(row))
            .collect::<Result<Vec<_>>>()?;
        Array2::from_rows(rows, self.n_outputs())
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))
    }

    fn predict_proba_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        let raw = self.predict_raw_row(row)?;
        Ok(self.link().to_proba(&raw, self.n_classes()))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let rows = x
            .rows()
            .map(|row| self.predict_proba_row(row))
            .collect::<Result<Vec<_>>>()?;
        Array2::from_rows(rows, self.n_classes())
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))
    }

    /// Most probable class per row.
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba.rows().map(|p| argmax(p).unwrap_or(0)).collect())
    }
}

/// Shared guard for `predict_raw_row` implementations.
pub(crate) fn check_row(fitted: bool, expected: usize, row: &[f64]) -> Result<()> {
    if !fitted {
        return Err(PipelineError::NotFitted);
    }
    if row.len() != expected {
        return Err(PipelineError::InvalidInput(format!(
            "expected {} features, got {}",
            expected,
            row.len()
        )));
    }
    Ok(())
}

/// Validate training inputs and return the number of rows.
pub(crate) fn check_training_set(
    x: &Array2<f64>,
    y: &[usize],
    n_classes: usize,
    sample_weight: &[f64],
) -> Result<usize> {
    let n = x.nrows();
    if n == 0 || x.ncols() == 0 {
        return Err(PipelineError::Training("empty training matrix".into()));
    }
    if y.len() != n || sample_weight.len() != n {
        return Err(PipelineError::Training(format!(
            "{} rows but {} labels and {} weights",
            n,
            y.len(),
            sample_weight.len()
        )));
    }
    if n_classes < 2 {
        return Err(PipelineError::Training(
            "at least two classes are required".into(),
        ));
    }
    if let Some(bad) = y.iter().find(|&&c| c >= n_classes) {
        return Err(PipelineError::Training(format!(
            "label {} outside 0..{}",
            bad, n_classes
        )));
    }
    if !x.is_finite() {
        return Err(PipelineError::Training(
            "training matrix contains non-finite values".into(),
        ));
    }
    if sample_weight.iter().any(|w| !w.is_finite() || *w <= 0.0) {
        return Err(PipelineError::Training(
            "sample weights must be positive and finite".into(),
        ));
    }
    Ok(n)
}
