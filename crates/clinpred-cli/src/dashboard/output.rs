use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use clinpred_classifiers::evaluation::EvaluationRecord;
use clinpred_classifiers::explain::AttributionArtifact;
use clinpred_classifiers::inference::InferenceResponse;

use crate::dashboard::util::write_text;

#[derive(Debug, Clone, Serialize)]
pub struct PredictionReport {
    pub prediction: InferenceResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<AttributionArtifact>,
}

pub fn write_json<T: Serialize>(value: &T, path: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    write_text(path, &text)?;
    if let Some(p) = path {
        log::info!("[clinpred] Wrote {}", p.display());
    }
    Ok(())
}

/// One line per metric, for the log.
pub fn evaluation_summary(record: &EvaluationRecord) -> String {
    let mut lines = vec![format!(
        "{} on {} ({} train / {} test rows)",
        record.model_id, record.dataset_id, record.n_train, record.n_test
    )];
    for row in &record.rows {
        let train = row
            .train
            .map(|v| format!("{:.4}", v))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!("  {:<10} train {:>8}  test {:.4}", row.metric, train, row.test));
    }
    lines.join("\n")
}
