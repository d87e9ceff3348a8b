//! Dashboard session state and the event handler that drives it.
//!
//! A dashboard rerun is `handle(context, event) -> context`: the caller owns
//! the [`SessionContext`] and the only shared state is the trainer cache, so
//! replaying the same event against the same context gives the same result.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{resolve, VARIANT_IDS};
use crate::error::{PipelineError, Result};
use crate::evaluation::{evaluate, EvaluationRecord};
use crate::explain::{explain, AttributionArtifact, ExplainOptions, ExplainVariant};
use crate::features::RawRecord;
use crate::inference::{InferenceResponse, InferenceService};
use crate::trainer::Trainer;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Registry id of the selected model; `None` means the dashboard default.
    pub selected_model: Option<String>,
    pub evaluation: Option<EvaluationRecord>,
    pub explanation: Option<AttributionArtifact>,
    pub prediction: Option<InferenceResponse>,
    /// Waterfall of the submitted record, when it was requested.
    pub prediction_explanation: Option<AttributionArtifact>,
    /// Corrective message for the user after rejected input.
    pub notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SelectModel(String),
    Evaluate,
    Explain(ExplainVariant),
    Submit(RawRecord),
    /// Predict and attach the waterfall of that single prediction.
    SubmitAndExplain(RawRecord),
    ClearCache,
}

pub struct Dashboard {
    trainer: Arc<Trainer>,
    inference: InferenceService,
    dataset_id: String,
    default_model: String,
    options: ExplainOptions,
}

impl Dashboard {
    pub fn new(trainer: Arc<Trainer>, inference: InferenceService, options: ExplainOptions) -> Self {
        let dataset_id = inference.dataset_id().to_string();
        Dashboard {
            trainer,
            inference,
            dataset_id,
            default_model: VARIANT_IDS[0].to_string(),
            options,
        }
    }

    pub fn with_default_model(mut self, model_id: &str) -> Result<Self> {
        self.default_model = resolve(model_id)?.id;
        Ok(self)
    }

    pub fn trainer(&self) -> &Arc<Trainer> {
        &self.trainer
    }

    pub fn inference(&self) -> &InferenceService {
        &self.inference
    }

    pub fn options(&self) -> &ExplainOptions {
        &self.options
    }

    fn model_id<'a>(&'a self, ctx: &'a SessionContext) -> &'a str {
        ctx.selected_model.as_deref().unwrap_or(&self.default_model)
    }

    /// Apply one UI event. Validation failures become a notice on the
    /// returned context; every other error is returned to the caller.
    pub fn handle(&self, mut ctx: SessionContext, event: Event) -> Result<SessionContext> {
        self.apply(&mut ctx, event)?;
        Ok(ctx)
    }

    /// [`Dashboard::handle`] on a borrowed context. On error the context is
    /// left exactly as it was.
    pub fn handle_in_place(&self, ctx: &mut SessionContext, event: Event) -> Result<()> {
        let mut next = ctx.clone();
        self.apply(&mut next, event)?;
        *ctx = next;
        Ok(())
    }

    fn apply(&self, ctx: &mut SessionContext, event: Event) -> Result<()> {
        ctx.notice = None;
        match event {
            Event::SelectModel(model_id) => {
                let id = resolve(&model_id)?.id;
                if self.model_id(ctx) != id {
                    log::info!("selected model {}", id);
                    ctx.evaluation = None;
                    ctx.explanation = None;
                    ctx.prediction = None;
                    ctx.prediction_explanation = None;
                }
                ctx.selected_model = Some(id);
            }
            Event::Evaluate => {
                let fitted = self.trainer.train(self.model_id(ctx), &self.dataset_id)?;
                ctx.evaluation = Some(evaluate(&fitted, self.trainer.store(), &self.dataset_id)?);
            }
            Event::Explain(variant) => {
                let fitted = self.trainer.train(self.model_id(ctx), &self.dataset_id)?;
                let data = self.trainer.store().get(&self.dataset_id)?;
                ctx.explanation = Some(explain(&fitted, &data.test.x, variant, &self.options)?);
            }
            Event::Submit(record) => self.submit(ctx, &record, false)?,
            Event::SubmitAndExplain(record) => self.submit(ctx, &record, true)?,
            Event::ClearCache => self.trainer.clear(),
        }
        Ok(())
    }

    fn submit(&self, ctx: &mut SessionContext, record: &RawRecord, with_waterfall: bool) -> Result<()> {
        ctx.prediction = None;
        ctx.prediction_explanation = None;
        match self.inference.predict(self.model_id(ctx), record) {
            Ok(response) => {
                if with_waterfall {
                    let waterfall = self.inference.explain_prediction(&response, &self.options)?;
                    ctx.prediction_explanation = Some(waterfall);
                }
                ctx.prediction = Some(response);
            }
            Err(PipelineError::Validation(e)) => {
                log::warn!("rejected record: {}", e);
                ctx.notice = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
