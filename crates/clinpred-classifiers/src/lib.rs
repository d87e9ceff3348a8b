//! clinpred-classifiers: cached model training, evaluation and Shapley
//! explanations for tabular clinical-outcome dashboards.
//!
//! Raw patient records go through a declarative [`features::FeaturePipeline`],
//! models come from a fixed registry ([`config`]) and are fitted at most once
//! per dataset by the memoizing [`trainer::Trainer`]. Fitted models are
//! evaluated ([`evaluation`]), explained ([`explain`]) and queried for single
//! records ([`inference`]); [`session`] ties these together behind one
//! event handler.
pub mod config;
pub mod data_handling;
pub mod error;
pub mod evaluation;
pub mod explain;
pub mod features;
pub mod inference;
pub mod io;
pub mod math;
pub mod models;
pub mod preprocessing;
pub mod session;
pub mod trainer;

pub use error::{PipelineError, Result, ValidationError};
