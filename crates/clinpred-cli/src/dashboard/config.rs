use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};

use clinpred_classifiers::config::{resolve, VARIANT_IDS};
use clinpred_classifiers::explain::ExplainOptions;
use clinpred_classifiers::features::FeatureSchema;

use crate::dashboard::util::validate_data_file;

/// Either a built-in schema name or a full inline schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaSource {
    Preset(String),
    Inline(FeatureSchema),
}

impl Default for SchemaSource {
    fn default() -> Self {
        SchemaSource::Preset("cirrhosis".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Labelled training table (csv or tsv).
    pub dataset: String,
    pub schema: SchemaSource,
    /// Overrides the schema's target column name.
    pub target_column: Option<String>,
    pub default_model: String,
    pub top_n: Option<usize>,
    pub allow_model_agnostic: bool,
    pub permutations: usize,
    pub output: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        let options = ExplainOptions::default();
        DashboardConfig {
            dataset: String::new(),
            schema: SchemaSource::default(),
            target_column: None,
            default_model: VARIANT_IDS[0].to_string(),
            top_n: None,
            allow_model_agnostic: options.allow_model_agnostic,
            permutations: options.permutations,
            output: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<DashboardConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config file: {:?}", path))
}

impl DashboardConfig {
    /// Load the config file and apply command-line overrides.
    pub fn from_arguments(config_path: &PathBuf, matches: &ArgMatches) -> Result<Self> {
        let mut config = load_config(config_path)?;

        if let Some(data) = matches.get_one::<String>("data") {
            config.dataset = data.clone();
        }
        validate_data_file(&config.dataset)?;

        if let Some(model) = matches.get_one::<String>("model") {
            config.default_model = model.clone();
        }
        resolve(&config.default_model)?;

        if let Some(output) = matches.get_one::<String>("output") {
            config.output = Some(output.clone());
        }
        if let Some(top_n) = matches.get_one::<usize>("top_n") {
            config.top_n = Some(*top_n);
        }
        if matches.get_flag("allow_model_agnostic") {
            config.allow_model_agnostic = true;
        }
        Ok(config)
    }

    pub fn feature_schema(&self) -> Result<FeatureSchema> {
        let mut schema = match &self.schema {
            SchemaSource::Preset(name) => FeatureSchema::preset(name)
                .ok_or_else(|| anyhow!("Unknown schema preset: {}", name))?,
            SchemaSource::Inline(schema) => schema.clone(),
        };
        if let Some(column) = &self.target_column {
            schema.target.column = column.clone();
        }
        Ok(schema)
    }

    pub fn explain_options(&self) -> ExplainOptions {
        ExplainOptions {
            top_n: self.top_n,
            allow_model_agnostic: self.allow_model_agnostic,
            permutations: self.permutations,
            ..ExplainOptions::default()
        }
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref().map(Path::new)
    }
}
