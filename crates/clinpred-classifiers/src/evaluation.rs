//! Classification metrics and the evaluation table shown next to each model.
//!
//! Log-loss and accuracy are reported on both partitions; precision, recall
//! and F1 on the test partition only. Binary targets score the positive class
//! (index 1); more classes use support-weighted averages. A ratio with a zero
//! denominator counts as 0.
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::data_handling::{DatasetStore, PartitionedDataset};
use crate::error::{PipelineError, Result};
use crate::math::{argmax, Array2};
use crate::models::classifier_trait::ClassifierModel;
use crate::trainer::{FittedModel, Portion};

/// Probabilities are clipped to `[EPS, 1 - EPS]` before taking logs.
pub const LOG_LOSS_EPS: f64 = 1e-15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    LogLoss,
    Accuracy,
    Precision,
    Recall,
    F1,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::LogLoss => "LogLoss",
            Metric::Accuracy => "Accuracy",
            Metric::Precision => "Precision",
            Metric::Recall => "Recall",
            Metric::F1 => "F1",
        };
        f.pad(name)
    }
}

impl Metric {
    /// Plain-language reading of a score for the dashboard table.
    pub fn interpret(&self, value: f64) -> String {
        let pct = format!("{:.0}", value * 100.0);
        match self {
            Metric::LogLoss => "This measures how well the model's predicted probabilities match the actual outcomes. A lower value indicates better performance.".to_string(),
            Metric::Accuracy => format!(
                "Accuracy: This tells us that the model correctly predicted the outcome about {}% of the time.",
                pct
            ),
            Metric::Precision => format!(
                "Precision: This indicates that when the model predicted a certain class, it was correct about {}% of the time.",
                pct
            ),
            Metric::Recall => format!(
                "Recall: This measures the model's ability to correctly identify all the relevant instances. The model successfully identified about {}% of the actual instances of a class.",
                pct
            ),
            Metric::F1 => "F1 Score: This is a balance between precision and recall.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub metric: Metric,
    pub train: Option<f64>,
    pub test: f64,
    pub interpretation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub model_id: String,
    pub dataset_id: String,
    pub n_train: usize,
    pub n_test: usize,
    pub rows: Vec<MetricRow>,
    pub elapsed: Duration,
}

impl EvaluationRecord {
    pub fn get(&self, metric: Metric) -> Option<&MetricRow> {
        self.rows.iter().find(|r| r.metric == metric)
    }
}

fn check_lengths(a: usize, b: usize, what: &str) -> Result<()> {
    if a != b {
        return Err(PipelineError::InvalidInput(format!(
            "{}: {} labels but {} predictions",
            what, a, b
        )));
    }
    if a == 0 {
        return Err(PipelineError::InvalidInput(format!("{}: no samples", what)));
    }
    Ok(())
}

/// Mean negative log-likelihood of the true class.
pub fn log_loss(y_true: &[usize], proba: &Array2<f64>) -> Result<f64> {
    check_lengths(y_true.len(), proba.nrows(), "log_loss")?;
    let mut total = 0.0;
    for (row, &c) in proba.rows().zip(y_true) {
        let p = row
            .get(c)
            .copied()
            .ok_or_else(|| PipelineError::InvalidInput(format!("label {} has no probability column", c)))?;
        total -= p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS).ln();
    }
    Ok(total / y_true.len() as f64)
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> Result<f64> {
    check_lengths(y_true.len(), y_pred.len(), "accuracy")?;
    let hits = y_true.iter().zip(y_pred).filter(|(a, b)| a == b).count();
    Ok(hits as f64 / y_true.len() as f64)
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Precision, recall and F1: positive class for two classes, support-weighted otherwise.
pub fn precision_recall_f1(
    y_true: &[usize],
    y_pred: &[usize],
    n_classes: usize,
) -> Result<(f64, f64, f64)> {
    check_lengths(y_true.len(), y_pred.len(), "precision_recall_f1")?;
    if let Some(bad) = y_true.iter().chain(y_pred).find(|&&c| c >= n_classes) {
        return Err(PipelineError::InvalidInput(format!(
            "label {} outside 0..{}",
            bad, n_classes
        )));
    }

    let mut tp = vec![0.0; n_classes];
    let mut predicted = vec![0.0; n_classes];
    let mut support = vec![0.0; n_classes];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        support[t] += 1.0;
        predicted[p] += 1.0;
        if t == p {
            tp[t] += 1.0;
        }
    }
    let per_class = |k: usize| {
        let precision = ratio(tp[k], predicted[k]);
        let recall = ratio(tp[k], support[k]);
        let f1 = ratio(2.0 * precision * recall, precision + recall);
        (precision, recall, f1)
    };

    if n_classes == 2 {
        return Ok(per_class(1));
    }
    let n = y_true.len() as f64;
    let mut out = (0.0, 0.0, 0.0);
    for k in 0..n_classes {
        let (p, r, f) = per_class(k);
        let w = support[k] / n;
        out.0 += w * p;
        out.1 += w * r;
        out.2 += w * f;
    }
    Ok(out)
}

/// Evaluate a cached model against the partition of `dataset_id`. Never refits.
///
/// Only a model fitted on the train portion of that same dataset is accepted;
/// anything else has already seen the test rows.
pub fn evaluate(fitted: &FittedModel, store: &DatasetStore, dataset_id: &str) -> Result<EvaluationRecord> {
    if fitted.dataset_id != dataset_id {
        return Err(PipelineError::InvalidInput(format!(
            "{} was fitted on `{}`, not `{}`",
            fitted.variant.id, fitted.dataset_id, dataset_id
        )));
    }
    if fitted.portion != Portion::Train {
        return Err(PipelineError::InvalidInput(format!(
            "{} was fitted on the full `{}` dataset and cannot be scored on its test partition",
            fitted.variant.id, dataset_id
        )));
    }
    let data = store.get(dataset_id)?;
    evaluate_classifier(fitted.model.as_ref(), &fitted.variant.id, &data)
}

/// Evaluate any classifier; fails with `NotFitted` for an unfitted one.
pub fn evaluate_classifier(
    model: &dyn ClassifierModel,
    model_id: &str,
    data: &PartitionedDataset,
) -> Result<EvaluationRecord> {
    if !model.is_fitted() {
        return Err(PipelineError::NotFitted);
    }
    let start = Instant::now();
    let n_classes = data.full.n_classes();

    let train_proba = model.predict_proba(&data.train.x)?;
    let test_proba = model.predict_proba(&data.test.x)?;
    let train_pred: Vec<usize> = train_proba.rows().map(|p| argmax(p).unwrap_or(0)).collect();
    let test_pred: Vec<usize> = test_proba.rows().map(|p| argmax(p).unwrap_or(0)).collect();
    let y_train = data.train.y.as_slice();
    let y_test = data.test.y.as_slice();

    let train_loss = log_loss(y_train, &train_proba)?;
    let test_loss = log_loss(y_test, &test_proba)?;
    let train_acc = accuracy(y_train, &train_pred)?;
    let test_acc = accuracy(y_test, &test_pred)?;
    let (precision, recall, f1) = precision_recall_f1(y_test, &test_pred, n_classes)?;

    let row = |metric: Metric, train: Option<f64>, test: f64| MetricRow {
        metric,
        train,
        test,
        interpretation: metric.interpret(test),
    };
    let rows = vec![
        row(Metric::LogLoss, Some(train_loss), test_loss),
        row(Metric::Accuracy, Some(train_acc), test_acc),
        row(Metric::Precision, None, precision),
        row(Metric::Recall, None, recall),
        row(Metric::F1, None, f1),
    ];
    log::info!(
        "{} on `{}`: test accuracy {:.4}, test log-loss {:.4}",
        model_id,
        data.id,
        test_acc,
        test_loss
    );

    Ok(EvaluationRecord {
        model_id: model_id.to_string(),
        dataset_id: data.id.clone(),
        n_train: data.train.n_samples(),
        n_test: data.test.n_samples(),
        rows,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_loss_clips_certain_mistakes() {
        let proba = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 0.5, 0.5]).unwrap();
        let loss = log_loss(&[1, 0], &proba).unwrap();
        let expected = (-(LOG_LOSS_EPS.ln()) + -(0.5f64.ln())) / 2.0;
        assert!((loss - expected).abs() < 1e-9);
        assert!(loss.is_finite());
    }

    #[test]
    fn binary_scores_use_positive_class() {
        let y_true = [0, 1, 1, 0, 1];
        let y_pred = [0, 1, 0, 1, 1];
        let (p, r, f) = precision_recall_f1(&y_true, &y_pred, 2).unwrap();
        assert!((p - 2.0 / 3.0).abs() < 1e-12);
        assert!((r - 2.0 / 3.0).abs() < 1e-12);
        assert!((f - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(accuracy(&y_true, &y_pred).unwrap(), 0.6);
    }

    #[test]
    fn multiclass_scores_are_support_weighted() {
        let y_true = [0, 0, 1, 2];
        let y_pred = [0, 1, 1, 1];
        let (p, r, _) = precision_recall_f1(&y_true, &y_pred, 3).unwrap();
        // class 0: p=1 r=.5; class 1: p=1/3 r=1; class 2: p=0 (undefined) r=0
        assert!((p - (0.5 * 1.0 + 0.25 / 3.0)).abs() < 1e-12);
        assert!((r - (0.5 * 0.5 + 0.25)).abs() < 1e-12);
    }

    #[test]
    fn length_mismatch_is_invalid_input() {
        assert!(matches!(
            accuracy(&[0, 1], &[0]),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn interpretation_reports_percentages() {
        assert!(Metric::Accuracy.interpret(0.8712).contains("about 87%"));
    }
}
