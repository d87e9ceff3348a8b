//! Single-record prediction against the model fitted on the full dataset.
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::explain::{explain, AttributionArtifact, ExplainOptions, ExplainVariant};
use crate::features::{FeaturePipeline, RawRecord};
use crate::math::{argmax, Array2};
use crate::trainer::Trainer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub label: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub model_id: String,
    pub label: String,
    pub class_index: usize,
    pub probabilities: Vec<ClassProbability>,
    /// Model columns the record was transformed into.
    pub features: Vec<f64>,
    pub elapsed: Duration,
}

impl InferenceResponse {
    pub fn probability_of(&self, label: &str) -> Option<f64> {
        self.probabilities
            .iter()
            .find(|p| p.label == label)
            .map(|p| p.probability)
    }
}

pub struct InferenceService {
    trainer: Arc<Trainer>,
    pipeline: Arc<FeaturePipeline>,
    dataset_id: String,
}

impl InferenceService {
    pub fn new(trainer: Arc<Trainer>, pipeline: Arc<FeaturePipeline>, dataset_id: &str) -> Self {
        InferenceService {
            trainer,
            pipeline,
            dataset_id: dataset_id.to_string(),
        }
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    /// Validate and classify one raw record.
    ///
    /// The record is checked before the trainer is consulted, so a rejected
    /// record never triggers (or caches) a fit.
    pub fn predict(&self, model_id: &str, record: &RawRecord) -> Result<InferenceResponse> {
        let start = Instant::now();
        let features = self.pipeline.transform(record)?;
        let fitted = self.trainer.train_full(model_id, &self.dataset_id)?;
        if fitted.feature_names.as_slice() != self.pipeline.feature_names() {
            return Err(PipelineError::InvalidInput(format!(
                "dataset `{}` was not built with schema `{}`",
                self.dataset_id,
                self.pipeline.schema().name
            )));
        }

        let proba = checked_probabilities(&fitted.variant.id, fitted.model.predict_proba_row(&features)?)?;
        let class_index = argmax(&proba)
            .ok_or_else(|| PipelineError::InvalidInput("model returned no probabilities".into()))?;
        let probabilities = fitted
            .class_labels
            .iter()
            .zip(&proba)
            .map(|(label, &probability)| ClassProbability {
                label: label.clone(),
                probability,
            })
            .collect();
        let label = fitted.class_labels[class_index].clone();
        log::info!("{} predicted `{}` ({:.3})", fitted.variant.id, label, proba[class_index]);

        Ok(InferenceResponse {
            model_id: fitted.variant.id.clone(),
            label,
            class_index,
            probabilities,
            features,
            elapsed: start.elapsed(),
        })
    }

    /// Waterfall attribution for a previously predicted record.
    pub fn explain_prediction(
        &self,
        response: &InferenceResponse,
        options: &ExplainOptions,
    ) -> Result<AttributionArtifact> {
        let fitted = self.trainer.train_full(&response.model_id, &self.dataset_id)?;
        let row = Array2::from_shape_vec((1, response.features.len()), response.features.clone())
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        explain(&fitted, &row, ExplainVariant::Waterfall { instance: 0 }, options)
    }
}

/// A class label is only reported when every probability is finite.
fn checked_probabilities(model_id: &str, proba: Vec<f64>) -> Result<Vec<f64>> {
    if proba.iter().all(|p| p.is_finite()) {
        Ok(proba)
    } else {
        log::warn!("{} returned non-finite probabilities {:?}", model_id, proba);
        Err(PipelineError::InvalidInput(format!(
            "{} returned non-finite probabilities for this record",
            model_id
        )))
    }
}
