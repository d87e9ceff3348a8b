use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::RandomForestParams;
use crate::error::Result;
use crate::math::Array2;
use crate::models::classifier_trait::{check_row, check_training_set, ClassifierModel, Link};
use crate::models::ensemble::{TreeEnsemble, TreeOutput};
use crate::models::tree::{derive_seed, Growth, Objective, Tree, TreeBuilder, TreeParams};

/// Bagged impurity trees whose leaves hold class distributions.
///
/// Raw output is the averaged class probability vector. Trees are grown in
/// parallel; tree `i` draws from its own RNG seeded by `(seed, i)`.
pub struct RandomForestClassifier {
    params: RandomForestParams,
    seed: u64,
    ensemble: Option<TreeEnsemble>,
    n_classes: usize,
}

impl RandomForestClassifier {
    pub fn new(params: RandomForestParams, seed: u64) -> Self {
        RandomForestClassifier {
            params,
            seed,
            ensemble: None,
            n_classes: 0,
        }
    }

    fn tree_params(&self, n_features: usize) -> TreeParams {
        let k = (self.params.max_features * n_features as f64) as usize;
        TreeParams {
            growth: Growth::DepthWise,
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: Some(k.clamp(1, n_features)),
        }
    }

    fn grow(
        &self,
        index: usize,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        sample_weight: &[f64],
        tree_params: &TreeParams,
    ) -> Tree {
        let n = x.nrows();
        let mut rng = StdRng::seed_from_u64(derive_seed(self.seed, index));
        let rows: Vec<usize> = if self.params.bootstrap {
            let mut rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            rows.sort_unstable();
            rows
        } else {
            (0..n).collect()
        };
        let features: Vec<usize> = (0..x.ncols()).collect();
        let objective = Objective::Impurity {
            labels: y,
            weights: sample_weight,
            n_classes,
            criterion: self.params.criterion,
        };
        TreeBuilder::new(x, objective, tree_params).build(rows, &features, &mut rng)
    }
}

impl ClassifierModel for RandomForestClassifier {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        sample_weight: &[f64],
    ) -> Result<()> {
        let n = check_training_set(x, y, n_classes, sample_weight)?;
        let n_trees = self.params.n_estimators.max(1);
        let tree_params = self.tree_params(x.ncols());

        let trees: Vec<Tree> = (0..n_trees)
            .into_par_iter()
            .map(|i| self.grow(i, x, y, n_classes, sample_weight, &tree_params))
            .collect();

        let mut ensemble = TreeEnsemble::new(x.ncols(), vec![0.0; n_classes]);
        let weight = 1.0 / n_trees as f64;
        for tree in trees {
            ensemble.push(tree, TreeOutput::All, weight);
        }

        log::debug!(
            "random forest: {} trees on {} rows, mean leaves {:.1}",
            n_trees,
            n,
            ensemble.trees.iter().map(|t| t.tree.n_leaves()).sum::<usize>() as f64 / n_trees as f64
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
        self.n_classes
    }

    fn link(&self) -> Link {
        Link::Identity
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
        "random_forest"
    }

    fn tree_ensemble(&self) -> Option<&TreeEnsemble> {
        self.ensemble.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Criterion;

    fn params(n_estimators: usize, bootstrap: bool) -> RandomForestParams {
        RandomForestParams {
            n_estimators,
            max_depth: Some(4),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: 0.5,
            bootstrap,
            criterion: Criterion::Entropy,
        }
    }

    fn blobs() -> (Array2<f64>, Vec<usize>) {
        let mut data = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let c = i % 2;
            data.push(c as f64 * 3.0 + (i % 5) as f64 * 0.1);
            data.push((i % 7) as f64);
            y.push(c);
        }
        (Array2::from_shape_vec((40, 2), data).unwrap(), y)
    }

    #[test]
    fn forest_probabilities_sum_to_one() {
        let (x, y) = blobs();
        let mut rf = RandomForestClassifier::new(params(25, true), 7);
        rf.fit(&x, &y, 2, &vec![1.0; 40]).unwrap();

        let proba = rf.predict_proba(&x).unwrap();
        for row in proba.rows() {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        assert_eq!(rf.predict(&x).unwrap(), y);
    }

    #[test]
    fn parallel_fit_is_deterministic() {
        let (x, y) = blobs();
        let mut a = RandomForestClassifier::new(params(16, true), 3);
        let mut b = RandomForestClassifier::new(params(16, true), 3);
        a.fit(&x, &y, 2, &vec![1.0; 40]).unwrap();
        b.fit(&x, &y, 2, &vec![1.0; 40]).unwrap();
        assert_eq!(a.tree_ensemble(), b.tree_ensemble());
    }
}
