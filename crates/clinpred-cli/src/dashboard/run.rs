use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use clinpred_classifiers::config::{catalog, VariantSpec};
use clinpred_classifiers::data_handling::DatasetStore;
use clinpred_classifiers::evaluation::EvaluationRecord;
use clinpred_classifiers::explain::{AttributionArtifact, ExplainVariant};
use clinpred_classifiers::features::{FeaturePipeline, RawRecord};
use clinpred_classifiers::inference::InferenceService;
use clinpred_classifiers::io::read_dataset;
use clinpred_classifiers::session::{Dashboard, Event, SessionContext};
use clinpred_classifiers::trainer::Trainer;

use crate::dashboard::config::DashboardConfig;
use crate::dashboard::output::{evaluation_summary, PredictionReport};

/// Dataset id derived from the data file name.
pub fn dataset_id(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset")
        .to_string()
}

/// Read the dataset, register it and wire up a dashboard over it.
pub fn open_dashboard(config: &DashboardConfig) -> Result<Dashboard> {
    let schema = config.feature_schema()?;
    let pipeline = Arc::new(FeaturePipeline::new(schema).context("Invalid feature schema")?);
    let dataset = read_dataset(&config.dataset, &pipeline)?;
    dataset.log_input_data_summary();

    let id = dataset_id(&config.dataset);
    let store = Arc::new(DatasetStore::new());
    store.register(&id, dataset)?;
    let trainer = Arc::new(Trainer::new(store));
    let inference = InferenceService::new(Arc::clone(&trainer), pipeline, &id);
    let dashboard = Dashboard::new(trainer, inference, config.explain_options())
        .with_default_model(&config.default_model)?;
    Ok(dashboard)
}

pub fn run_variants() -> Vec<VariantSpec> {
    catalog()
}

pub fn run_evaluate(config: &DashboardConfig) -> Result<EvaluationRecord> {
    let dashboard = open_dashboard(config)?;
    let ctx = dashboard.handle(SessionContext::default(), Event::Evaluate)?;
    let record = ctx.evaluation.ok_or_else(|| anyhow!("No evaluation was produced"))?;
    log::info!("{}", evaluation_summary(&record));
    Ok(record)
}

pub fn run_explain(config: &DashboardConfig, variant: ExplainVariant) -> Result<AttributionArtifact> {
    let dashboard = open_dashboard(config)?;
    log::info!(
        "[clinpred] Explaining {} with the {} view",
        config.default_model,
        variant
    );
    let ctx = dashboard.handle(SessionContext::default(), Event::Explain(variant))?;
    ctx.explanation
        .ok_or_else(|| anyhow!("No explanation was produced"))
}

pub fn run_predict(
    config: &DashboardConfig,
    record: RawRecord,
    waterfall: bool,
) -> Result<PredictionReport> {
    let dashboard = open_dashboard(config)?;
    let event = if waterfall {
        Event::SubmitAndExplain(record)
    } else {
        Event::Submit(record)
    };
    let ctx = dashboard.handle(SessionContext::default(), event)?;
    if let Some(notice) = ctx.notice {
        bail!("Invalid record: {}", notice);
    }
    let prediction = ctx
        .prediction
        .ok_or_else(|| anyhow!("No prediction was produced"))?;
    let explanation = ctx.prediction_explanation;
    Ok(PredictionReport {
        prediction,
        explanation,
    })
}
