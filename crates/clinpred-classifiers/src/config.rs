//! Model registry: the closed catalog of classifier variants and their
//! hyper-parameters.
//!
//! Nothing here performs I/O or holds mutable state. A variant is looked up
//! by id with [`resolve`]; the trainer only ever sees the returned
//! [`VariantSpec`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Seed shared by every catalog variant, matching the dashboards' `random_state`.
pub const DEFAULT_SEED: u64 = 42;

/// Leaf-wise gradient boosting (GBDT-A).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct LightGbmParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub min_child_samples: usize,
    pub min_child_weight: f64,
    pub bagging_fraction: f64,
    pub bagging_freq: usize,
    pub feature_fraction: f64,
    pub lambda_l2: f64,
}

/// Depth-wise, regularized gradient boosting (GBDT-B).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct XGBoostParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub gamma: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Gini,
    Entropy,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Fraction of features considered at each split.
    pub max_features: f64,
    pub bootstrap: bool,
    pub criterion: Criterion,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct LogisticParams {
    /// Inverse regularization strength.
    pub c: f64,
    pub max_iter: usize,
    pub tol: f64,
}

/// Supported model families and their hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "family", content = "params", rename_all = "snake_case")]
pub enum ModelType {
    LightGbm(LightGbmParams),
    XGBoost(XGBoostParams),
    RandomForest(RandomForestParams),
    LogisticRegression(LogisticParams),
}

impl ModelType {
    pub fn family(&self) -> &'static str {
        match self {
            ModelType::LightGbm(_) => "gbdt-leafwise",
            ModelType::XGBoost(_) => "gbdt-depthwise",
            ModelType::RandomForest(_) => "random-forest",
            ModelType::LogisticRegression(_) => "logistic-regression",
        }
    }

    pub fn is_tree_based(&self) -> bool {
        !matches!(self, ModelType::LogisticRegression(_))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeighting {
    #[default]
    None,
    /// `1 / proportion(class)` over the labels the model is fitted on.
    InverseFrequency,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VariantSpec {
    pub id: String,
    pub display_name: String,
    pub model_type: ModelType,
    pub class_weighting: ClassWeighting,
    pub seed: u64,
}

impl VariantSpec {
    /// BLAKE3 digest (hex) of the canonical JSON form of this spec.
    pub fn fingerprint(&self) -> String {
        // struct fields serialize in declaration order, so the encoding is stable
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

impl fmt::Display for VariantSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.model_type.family())
    }
}

/// Catalog ids in display order.
pub const VARIANT_IDS: [&str; 4] = [
    "lightgbm",
    "xgboost",
    "random_forest",
    "logistic_regression",
];

fn normalize(id: &str) -> String {
    id.chars()
        .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Look up a catalog variant by id or one of the dashboard aliases.
pub fn resolve(model_id: &str) -> Result<VariantSpec, PipelineError> {
    let spec = match normalize(model_id).as_str() {
        "lightgbm" | "lighgbm" | "lgbm" | "lgb" => lightgbm(),
        "xgboost" | "xgb" => xgboost(),
        "randomforest" | "rf" => random_forest(),
        "logisticregression" | "lr" | "logreg" => logistic_regression(),
        _ => return Err(PipelineError::UnknownVariant(model_id.to_string())),
    };
    Ok(spec)
}

/// Every catalog variant in display order.
pub fn catalog() -> Vec<VariantSpec> {
    vec![lightgbm(), xgboost(), random_forest(), logistic_regression()]
}

fn lightgbm() -> VariantSpec {
    VariantSpec {
        id: "lightgbm".into(),
        display_name: "LightGBM".into(),
        model_type: ModelType::LightGbm(LightGbmParams {
            n_estimators: 100,
            learning_rate: 0.04702757643730806,
            num_leaves: 92,
            min_child_samples: 94,
            min_child_weight: 1e-3,
            bagging_fraction: 0.8147515753137136,
            bagging_freq: 3,
            feature_fraction: 0.7146909188772861,
            lambda_l2: 0.0,
        }),
        class_weighting: ClassWeighting::InverseFrequency,
        seed: DEFAULT_SEED,
    }
}

fn xgboost() -> VariantSpec {
    VariantSpec {
        id: "xgboost".into(),
        display_name: "XGBoost".into(),
        model_type: ModelType::XGBoost(XGBoostParams {
            n_estimators: 100,
            learning_rate: 0.08834858264808022,
            max_depth: 5,
            min_child_weight: 6.0,
            subsample: 0.8764008144523939,
            colsample_bytree: 0.7000005136716684,
            gamma: 0.00018161095420293524,
            reg_lambda: 6.098912138616464e-07,
            reg_alpha: 8.653528554492958e-05,
        }),
        class_weighting: ClassWeighting::None,
        seed: DEFAULT_SEED,
    }
}

fn random_forest() -> VariantSpec {
    VariantSpec {
        id: "random_forest".into(),
        display_name: "Random Forest".into(),
        model_type: ModelType::RandomForest(RandomForestParams {
            n_estimators: 718,
            max_depth: Some(24),
            min_samples_split: 2,
            min_samples_leaf: 10,
            max_features: 0.2800980471014083,
            bootstrap: false,
            criterion: Criterion::Entropy,
        }),
        class_weighting: ClassWeighting::InverseFrequency,
        seed: DEFAULT_SEED,
    }
}

fn logistic_regression() -> VariantSpec {
    VariantSpec {
        id: "logistic_regression".into(),
        display_name: "Logistic Regression".into(),
        model_type: ModelType::LogisticRegression(LogisticParams {
            c: 0.3422978316089267,
            max_iter: 500,
            tol: 1e-4,
        }),
        class_weighting: ClassWeighting::None,
        seed: DEFAULT_SEED,
    }
}

impl FromStr for VariantSpec {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        resolve(s)
    }
}
