use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use crate::config::{LightGbmParams, XGBoostParams};
use crate::error::Result;
use crate::math::Array2;
use crate::models::classifier_trait::{check_row, check_training_set, sigmoid, softmax, ClassifierModel, Link};
use crate::models::ensemble::{TreeEnsemble, TreeOutput};
use crate::models::tree::{Growth, Objective, TreeBuilder, TreeParams};

const MIN_HESSIAN: f64 = 1e-16;
const PRIOR_CLIP: f64 = 1e-6;

/// Settings shared by both boosting flavours.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostingConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
    pub lambda: f64,
    pub alpha: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
    /// Fraction of rows drawn for a bag.
    pub row_subsample: f64,
    /// Redraw the bag every `bagging_freq` rounds; 0 disables bagging.
    pub bagging_freq: usize,
    /// Fraction of features a tree may use.
    pub col_subsample: f64,
}

impl From<&LightGbmParams> for BoostingConfig {
    fn from(p: &LightGbmParams) -> Self {
        BoostingConfig {
            n_estimators: p.n_estimators,
            learning_rate: p.learning_rate,
            tree: TreeParams {
                growth: Growth::LeafWise {
                    max_leaves: p.num_leaves.max(2),
                },
                max_depth: None,
                min_samples_split: 2,
                min_samples_leaf: p.min_child_samples,
                max_features: None,
            },
            lambda: p.lambda_l2,
            alpha: 0.0,
            gamma: 0.0,
            min_child_weight: p.min_child_weight,
            row_subsample: p.bagging_fraction,
            bagging_freq: p.bagging_freq,
            col_subsample: p.feature_fraction,
        }
    }
}

impl From<&XGBoostParams> for BoostingConfig {
    fn from(p: &XGBoostParams) -> Self {
        BoostingConfig {
            n_estimators: p.n_estimators,
            learning_rate: p.learning_rate,
            tree: TreeParams {
                growth: Growth::DepthWise,
                max_depth: Some(p.max_depth),
                min_samples_split: 2,
                min_samples_leaf: 1,
                max_features: None,
            },
            lambda: p.reg_lambda,
            alpha: p.reg_alpha,
            gamma: p.gamma,
            min_child_weight: p.min_child_weight,
            row_subsample: p.subsample,
            bagging_freq: 1,
            col_subsample: p.colsample_bytree,
        }
    }
}

/// Gradient-boosted trees with a logistic (binary) or softmax (multi-class) loss.
///
/// Binary targets get a single log-odds margin; K > 2 classes get one margin
/// per class. The learning rate is folded into the leaf values, so the
/// fitted [`TreeEnsemble`] is a plain sum of trees.
pub struct GradientBoostingClassifier {
    name: String,
    config: BoostingConfig,
    seed: u64,
    ensemble: Option<TreeEnsemble>,
    n_classes: usize,
}

impl GradientBoostingClassifier {
    pub fn new(name: &str, config: BoostingConfig, seed: u64) -> Self {
        GradientBoostingClassifier {
            name: name.to_string(),
            config,
            seed,
            ensemble: None,
            n_classes: 0,
        }
    }

    fn n_margins(n_classes: usize) -> usize {
        if n_classes == 2 {
            1
        } else {
            n_classes
        }
    }

    /// Initial margins from the weighted class priors.
    fn base_score(y: &[usize], n_classes: usize, w: &[f64]) -> Vec<f64> {
        let total: f64 = w.iter().sum();
        let mut prior = vec![0.0; n_classes];
        for (&c, &wi) in y.iter().zip(w) {
            prior[c] += wi / total;
        }
        if n_classes == 2 {
            let p = prior[1].clamp(PRIOR_CLIP, 1.0 - PRIOR_CLIP);
            vec![(p / (1.0 - p)).ln()]
        } else {
            prior.iter().map(|p| p.max(PRIOR_CLIP).ln()).collect()
        }
    }

    fn draw_rows(&self, n: usize, rng: &mut StdRng) -> Vec<usize> {
        let frac = self.config.row_subsample;
        if frac >= 1.0 || frac <= 0.0 || self.config.bagging_freq == 0 {
            return (0..n).collect();
        }
        let k = ((n as f64 * frac).round() as usize).clamp(1, n);
        let mut rows = sample(rng, n, k).into_vec();
        rows.sort_unstable();
        rows
    }

    fn draw_features(&self, n_features: usize, rng: &mut StdRng) -> Vec<usize> {
        let frac = self.config.col_subsample;
        if frac >= 1.0 || frac <= 0.0 {
            return (0..n_features).collect();
        }
        let k = ((n_features as f64 * frac).round() as usize).clamp(1, n_features);
        let mut cols = sample(rng, n_features, k).into_vec();
        cols.sort_unstable();
        cols
    }
}

impl ClassifierModel for GradientBoostingClassifier {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        sample_weight: &[f64],
    ) -> Result<()> {
        let n = check_training_set(x, y, n_classes, sample_weight)?;
        let n_features = x.ncols();
        let k_out = Self::n_margins(n_classes);

        let base = Self::base_score(y, n_classes, sample_weight);
        let mut ensemble = TreeEnsemble::new(n_features, base.clone());
        let mut raw: Vec<Vec<f64>> = vec![base; n];
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut rows: Vec<usize> = (0..n).collect();
        let mut grad = vec![vec![0.0; n]; k_out];
        let mut hess = vec![vec![0.0; n]; k_out];

        for round in 0..self.config.n_estimators {
            if self.config.bagging_freq > 0 && round % self.config.bagging_freq == 0 {
                rows = self.draw_rows(n, &mut rng);
            }
            let features = self.draw_features(n_features, &mut rng);

            for i in 0..n {
                let w = sample_weight[i];
                if k_out == 1 {
                    let p = sigmoid(raw[i][0]);
                    let target = if y[i] == 1 { 1.0 } else { 0.0 };
                    grad[0][i] = w * (p - target);
                    hess[0][i] = w * (p * (1.0 - p)).max(MIN_HESSIAN);
                } else {
                    let p = softmax(&raw[i]);
                    for k in 0..k_out {
                        let target = if y[i] == k { 1.0 } else { 0.0 };
                        grad[k][i] = w * (p[k] - target);
                        hess[k][i] = w * (p[k] * (1.0 - p[k])).max(MIN_HESSIAN);
                    }
                }
            }

            for k in 0..k_out {
                let objective = Objective::Gradient {
                    grad: &grad[k],
                    hess: &hess[k],
                    lambda: self.config.lambda,
                    alpha: self.config.alpha,
                    gamma: self.config.gamma,
                    min_child_weight: self.config.min_child_weight,
                    shrinkage: self.config.learning_rate,
                };
                let tree = TreeBuilder::new(x, objective, &self.config.tree).build(
                    rows.clone(),
                    &features,
                    &mut rng,
                );
                for (i, r) in raw.iter_mut().enumerate() {
                    r[k] += tree.predict(x.row_slice(i))[0];
                }
                ensemble.push(tree, TreeOutput::Single(k), 1.0);
            }
        }

        log::debug!(
            "{}: fitted {} trees on {} rows x {} features ({} classes)",
            self.name,
            ensemble.trees.len(),
            n,
            n_features,
            n_classes
        );
        self.n_classes = n_classes;
        self.ensemble = Some(ensemble);
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.ensemble.is_some()
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn n_features(&self) -> usize {
        self.ensemble.as_ref().map_or(0, |e| e.n_features)
    }

    fn n_outputs(&self) -> usize {
        Self::n_margins(self.n_classes)
    }

    fn link(&self) -> Link {
        if self.n_classes == 2 {
            Link::Logistic
        } else {
            Link::Softmax
        }
    }

    fn predict_raw_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        check_row(self.ensemble.is_some(), self.n_features(), row)?;
        Ok(self
            .ensemble
            .as_ref()
            .map(|e| e.raw_output(row))
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tree_ensemble(&self) -> Option<&TreeEnsemble> {
        self.ensemble.as_ref()
    }
}
