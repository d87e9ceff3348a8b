use crate::config::{ModelType, VariantSpec};
use crate::models::classifier_trait::ClassifierModel;
use crate::models::gbdt::{BoostingConfig, GradientBoostingClassifier};
use crate::models::logistic::LogisticRegressionClassifier;
use crate::models::random_forest::RandomForestClassifier;

/// Build an unfitted classifier for a registry variant.
pub fn build_model(spec: &VariantSpec) -> Box<dyn ClassifierModel> {
    match &spec.model_type {
        ModelType::LightGbm(p) => Box::new(GradientBoostingClassifier::new(
            &spec.id,
            BoostingConfig::from(p),
            spec.seed,
        )),
        ModelType::XGBoost(p) => Box::new(GradientBoostingClassifier::new(
            &spec.id,
            BoostingConfig::from(p),
            spec.seed,
        )),
        ModelType::RandomForest(p) => Box::new(RandomForestClassifier::new(p.clone(), spec.seed)),
        ModelType::LogisticRegression(p) => Box::new(LogisticRegressionClassifier::new(p.clone())),
    }
}
