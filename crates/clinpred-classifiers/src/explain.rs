//! Shapley-value feature attribution and the four dashboard views built on it.
//!
//! Tree ensembles are explained exactly with path-dependent TreeSHAP: the
//! baseline is the cover-weighted expectation of each tree, i.e. the data the
//! model was fitted on. Other models are only explained when the caller opts
//! into the sampling estimator, which replaces features one at a time in a
//! random order starting from the fitted-data feature means.
//!
//! Attributions live in raw model-output space (log-odds margins for boosted
//! trees and logistic regression, class probabilities for the forest), so for
//! every instance `baseline + Σφ = raw output`.
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::math::Array2;
use crate::models::classifier_trait::ClassifierModel;
use crate::models::ensemble::{TreeEnsemble, TreeOutput};
use crate::models::tree::{derive_seed, Tree};
use crate::trainer::FittedModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum ExplainVariant {
    Ranking,
    Distribution,
    DecisionPath,
    Waterfall { instance: usize },
}

impl FromStr for ExplainVariant {
    type Err = PipelineError;

    /// Parses `ranking`, `distribution`, `decision-path` or `waterfall` (instance 0).
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "ranking" | "summary" => Ok(ExplainVariant::Ranking),
            "distribution" | "beeswarm" => Ok(ExplainVariant::Distribution),
            "decision_path" | "decision" => Ok(ExplainVariant::DecisionPath),
            "waterfall" => Ok(ExplainVariant::Waterfall { instance: 0 }),
            other => Err(PipelineError::InvalidInput(format!(
                "unknown explanation variant `{}`",
                other
            ))),
        }
    }
}

impl fmt::Display for ExplainVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplainVariant::Ranking => write!(f, "ranking"),
            ExplainVariant::Distribution => write!(f, "distribution"),
            ExplainVariant::DecisionPath => write!(f, "decision-path"),
            ExplainVariant::Waterfall { instance } => write!(f, "waterfall[{}]", instance),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainOptions {
    /// Keep only the N most important features in rankings and distributions.
    pub top_n: Option<usize>,
    /// Permit the sampling estimator for models without tree structure.
    pub allow_model_agnostic: bool,
    /// Raw output to explain; defaults to the positive / second class.
    pub output: Option<usize>,
    /// Permutations per instance for the sampling estimator.
    pub permutations: usize,
    pub seed: u64,
}

impl Default for ExplainOptions {
    fn default() -> Self {
        ExplainOptions {
            top_n: None,
            allow_model_agnostic: false,
            output: None,
            permutations: 64,
            seed: 42,
        }
    }
}

/// Attributions for a set of instances, for every raw output.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapValues {
    pub feature_names: Vec<String>,
    /// Expected raw output per output index.
    pub base_values: Vec<f64>,
    /// `values[k]` is `n_instances x n_features` for output `k`.
    pub values: Vec<Array2<f64>>,
    /// Raw model output per instance and output.
    pub outputs: Array2<f64>,
    /// The explained instances.
    pub data: Array2<f64>,
}

impl ShapValues {
    pub fn n_outputs(&self) -> usize {
        self.base_values.len()
    }

    pub fn n_instances(&self) -> usize {
        self.data.nrows()
    }

    /// Mean |φ| per feature over instances, averaged over `outputs`.
    pub fn mean_abs(&self, outputs: &[usize]) -> Vec<f64> {
        let n_features = self.feature_names.len();
        let mut acc = vec![0.0; n_features];
        let n = self.n_instances().max(1) as f64;
        for &k in outputs {
            for row in self.values[k].rows() {
                for (a, v) in acc.iter_mut().zip(row) {
                    *a += v.abs() / n;
                }
            }
        }
        let m = outputs.len().max(1) as f64;
        acc.iter_mut().for_each(|a| *a /= m);
        acc
    }
}

/// Feature indices sorted by descending importance; ties keep column order.
fn rank(importance: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..importance.len()).collect();
    order.sort_by(|&a, &b| {
        importance[b]
            .partial_cmp(&importance[a])
            .unwrap_or(Ordering::Equal)
    });
    order
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub mean_abs_shap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionPoint {
    pub value: f64,
    pub shap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDistribution {
    pub feature: String,
    pub points: Vec<DistributionPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionStep {
    pub feature: String,
    pub contribution: f64,
    pub cumulative: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPath {
    pub instance: usize,
    pub baseline: f64,
    pub steps: Vec<DecisionStep>,
    pub output: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub feature: String,
    pub value: f64,
    pub shap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributionArtifact {
    Ranking {
        features: Vec<FeatureImportance>,
    },
    Distribution {
        output: usize,
        features: Vec<FeatureDistribution>,
    },
    DecisionPath {
        output: usize,
        paths: Vec<DecisionPath>,
    },
    Waterfall {
        output: usize,
        instance: usize,
        baseline: f64,
        contributions: Vec<Contribution>,
        model_output: f64,
    },
}

/// Build one of the attribution views for `reference` rows.
pub fn explain(
    fitted: &FittedModel,
    reference: &Array2<f64>,
    variant: ExplainVariant,
    options: &ExplainOptions,
) -> Result<AttributionArtifact> {
    let model = fitted.model.as_ref();
    let output = select_output(model, options)?;

    match variant {
        ExplainVariant::Ranking => {
            let shap = shap_values(fitted, reference, options)?;
            let outputs: Vec<usize> = (0..shap.n_outputs()).collect();
            let importance = shap.mean_abs(&outputs);
            let features = truncate(rank(&importance), options.top_n)
                .into_iter()
                .map(|j| FeatureImportance {
                    feature: shap.feature_names[j].clone(),
                    mean_abs_shap: importance[j],
                })
                .collect();
            Ok(AttributionArtifact::Ranking { features })
        }
        ExplainVariant::Distribution => {
            let shap = shap_values(fitted, reference, options)?;
            let order = truncate(rank(&shap.mean_abs(&[output])), options.top_n);
            let values = &shap.values[output];
            let features = order
                .into_iter()
                .map(|j| FeatureDistribution {
                    feature: shap.feature_names[j].clone(),
                    points: (0..shap.n_instances())
                        .map(|i| DistributionPoint {
                            value: shap.data[(i, j)],
                            shap: values[(i, j)],
                        })
                        .collect(),
                })
                .collect();
            Ok(AttributionArtifact::Distribution { output, features })
        }
        ExplainVariant::DecisionPath => {
            let shap = shap_values(fitted, reference, options)?;
            let order = rank(&shap.mean_abs(&[output]));
            let baseline = shap.base_values[output];
            let values = &shap.values[output];
            let paths = (0..shap.n_instances())
                .map(|i| {
                    let mut cumulative = baseline;
                    let steps = order
                        .iter()
                        .map(|&j| {
                            cumulative += values[(i, j)];
                            DecisionStep {
                                feature: shap.feature_names[j].clone(),
                                contribution: values[(i, j)],
                                cumulative,
                            }
                        })
                        .collect();
                    DecisionPath {
                        instance: i,
                        baseline,
                        steps,
                        output: shap.outputs[(i, output)],
                    }
                })
                .collect();
            Ok(AttributionArtifact::DecisionPath { output, paths })
        }
        ExplainVariant::Waterfall { instance } => {
            if instance >= reference.nrows() {
                return Err(PipelineError::InvalidInput(format!(
                    "instance {} out of range for {} rows",
                    instance,
                    reference.nrows()
                )));
            }
            let row = reference.select_rows(&[instance]);
            let shap = shap_values(fitted, &row, options)?;
            let values = shap.values[output].row_slice(0);
            let mut contributions: Vec<Contribution> = values
                .iter()
                .enumerate()
                .map(|(j, &phi)| Contribution {
                    feature: shap.feature_names[j].clone(),
                    value: shap.data[(0, j)],
                    shap: phi,
                })
                .collect();
            // largest magnitude first, stable on ties
            contributions.sort_by(|a, b| b.shap.abs().partial_cmp(&a.shap.abs()).unwrap_or(Ordering::Equal));
            Ok(AttributionArtifact::Waterfall {
                output,
                instance,
                baseline: shap.base_values[output],
                contributions,
                model_output: shap.outputs[(0, output)],
            })
        }
    }
}

fn truncate(order: Vec<usize>, top_n: Option<usize>) -> Vec<usize> {
    match top_n {
        Some(n) => order.into_iter().take(n).collect(),
        None => order,
    }
}

fn select_output(model: &dyn ClassifierModel, options: &ExplainOptions) -> Result<usize> {
    let n_outputs = model.n_outputs();
    let output = options
        .output
        .unwrap_or(if n_outputs > 1 { 1 } else { 0 });
    if output >= n_outputs {
        return Err(PipelineError::InvalidInput(format!(
            "output {} out of range for a model with {} outputs",
            output, n_outputs
        )));
    }
    Ok(output)
}

/// Attributions of every raw output for each row of `data`.
pub fn shap_values(
    fitted: &FittedModel,
    data: &Array2<f64>,
    options: &ExplainOptions,
) -> Result<ShapValues> {
    let model = fitted.model.as_ref();
    if !model.is_fitted() {
        return Err(PipelineError::NotFitted);
    }
    if data.nrows() == 0 {
        return Err(PipelineError::InvalidInput("no instances to explain".into()));
    }
    if data.ncols() != fitted.feature_names.len() {
        return Err(PipelineError::InvalidInput(format!(
            "expected {} features, got {}",
            fitted.feature_names.len(),
            data.ncols()
        )));
    }

    let rows: Vec<(Vec<Vec<f64>>, Vec<f64>)> = match model.tree_ensemble() {
        Some(ensemble) => (0..data.nrows())
            .into_par_iter()
            .map(|i| {
                let x = data.row_slice(i);
                (tree_shap(ensemble, x), ensemble.raw_output(x))
            })
            .collect(),
        None if options.allow_model_agnostic => {
            log::debug!(
                "{}: sampling attributions with {} permutations",
                model.name(),
                options.permutations
            );
            (0..data.nrows())
                .into_par_iter()
                .map(|i| {
                    let mut rng = StdRng::seed_from_u64(derive_seed(options.seed, i));
                    permutation_shap(
                        model,
                        data.row_slice(i),
                        &fitted.background_means,
                        options.permutations.max(1),
                        &mut rng,
                    )
                })
                .collect::<Result<Vec<_>>>()?
        }
        None => return Err(PipelineError::UnsupportedModel(model.name().to_string())),
    };

    let base_values = match model.tree_ensemble() {
        Some(ensemble) => ensemble.expected_value(),
        None => model.predict_raw_row(&fitted.background_means)?,
    };
    assemble(fitted.feature_names.clone(), base_values, rows, data.clone())
}

fn assemble(
    feature_names: Vec<String>,
    base_values: Vec<f64>,
    rows: Vec<(Vec<Vec<f64>>, Vec<f64>)>,
    data: Array2<f64>,
) -> Result<ShapValues> {
    let n = rows.len();
    let n_features = feature_names.len();
    let n_outputs = base_values.len();

    let mut values = vec![Array2::zeros(n, n_features); n_outputs];
    let mut outputs = Array2::zeros(n, n_outputs);
    for (i, (phi, out)) in rows.into_iter().enumerate() {
        if phi.len() != n_outputs || out.len() != n_outputs || phi.iter().any(|p| p.len() != n_features) {
            return Err(PipelineError::InvalidInput(format!(
                "attribution row {} does not match {} outputs x {} features",
                i, n_outputs, n_features
            )));
        }
        for (k, phi_k) in phi.iter().enumerate() {
            values[k].row_slice_mut(i).copy_from_slice(phi_k);
        }
        outputs.row_slice_mut(i).copy_from_slice(&out);
    }

    Ok(ShapValues {
        feature_names,
        base_values,
        values,
        outputs,
        data,
    })
}

/// Sampling estimator: walk random feature orders from `background` to `x`,
/// crediting each feature with the change in raw output when it is switched in.
/// Every order telescopes to `f(x) - f(background)`, so the estimate is exactly additive.
fn permutation_shap(
    model: &dyn ClassifierModel,
    x: &[f64],
    background: &[f64],
    permutations: usize,
    rng: &mut StdRng,
) -> Result<(Vec<Vec<f64>>, Vec<f64>)> {
    let n_features = x.len();
    let base = model.predict_raw_row(background)?;
    let mut phi = vec![vec![0.0; n_features]; base.len()];
    let mut order: Vec<usize> = (0..n_features).collect();
    let scale = 1.0 / permutations as f64;

    for _ in 0..permutations {
        order.shuffle(rng);
        let mut z = background.to_vec();
        let mut prev = base.clone();
        for &j in &order {
            z[j] = x[j];
            let cur = model.predict_raw_row(&z)?;
            for (k, phi_k) in phi.iter_mut().enumerate() {
                phi_k[j] += scale * (cur[k] - prev[k]);
            }
            prev = cur;
        }
    }
    Ok((phi, model.predict_raw_row(x)?))
}

// ---------------------------------------------------------------------------
// Path-dependent TreeSHAP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

/// Exact attributions of one row for every output of the ensemble.
pub fn tree_shap(ensemble: &TreeEnsemble, x: &[f64]) -> Vec<Vec<f64>> {
    let mut phi = vec![vec![0.0; ensemble.n_features]; ensemble.n_outputs];
    for t in &ensemble.trees {
        let mut leaf = |feature: usize, scale: f64, value: &[f64]| match t.output {
            TreeOutput::Single(k) => phi[k][feature] += scale * t.weight * value[0],
            TreeOutput::All => {
                for (phi_k, v) in phi.iter_mut().zip(value) {
                    phi_k[feature] += scale * t.weight * v;
                }
            }
        };
        recurse(&t.tree, x, 0, &[], 0, 1.0, 1.0, None, &mut leaf);
    }
    phi
}

fn extend_path(path: &mut [PathElement], depth: usize, zero: f64, one: f64, feature: Option<usize>) {
    path[depth] = PathElement {
        feature,
        zero_fraction: zero,
        one_fraction: one,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    };
    let d = depth as f64;
    for i in (0..depth).rev() {
        let fi = i as f64;
        path[i + 1].pweight += one * path[i].pweight * (fi + 1.0) / (d + 1.0);
        path[i].pweight = zero * path[i].pweight * (d - fi) / (d + 1.0);
    }
}

fn unwind_path(path: &mut [PathElement], depth: usize, index: usize) {
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let d = depth as f64;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        let fi = i as f64;
        if one != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * (d + 1.0) / ((fi + 1.0) * one);
            next_one_portion = tmp - path[i].pweight * zero * (d - fi) / (d + 1.0);
        } else {
            path[i].pweight = path[i].pweight * (d + 1.0) / (zero * (d - fi));
        }
    }
    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
}

/// Total permutation weight the path would have with element `index` removed.
fn unwound_path_sum(path: &[PathElement], depth: usize, index: usize) -> f64 {
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let d = depth as f64;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        let fi = i as f64;
        if one != 0.0 {
            let tmp = next_one_portion * (d + 1.0) / ((fi + 1.0) * one);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero * ((d - fi) / (d + 1.0));
        } else if zero != 0.0 {
            total += (path[i].pweight / zero) / ((d - fi) / (d + 1.0));
        }
    }
    total
}

#[allow(clippy::too_many_arguments)]
fn recurse<F>(
    tree: &Tree,
    x: &[f64],
    node_idx: usize,
    parent_path: &[PathElement],
    depth: usize,
    zero: f64,
    one: f64,
    feature: Option<usize>,
    leaf: &mut F,
) where
    F: FnMut(usize, f64, &[f64]),
{
    let mut path = Vec::with_capacity(depth + 1);
    path.extend_from_slice(&parent_path[..depth]);
    path.push(PathElement::default());
    extend_path(&mut path, depth, zero, one, feature);

    let node = &tree.nodes[node_idx];
    if node.is_leaf {
        for i in 1..=depth {
            let w = unwound_path_sum(&path, depth, i);
            let el = path[i];
            if let Some(f) = el.feature {
                leaf(f, w * (el.one_fraction - el.zero_fraction), &node.value);
            }
        }
        return;
    }

    let (hot, cold) = if x[node.feature] <= node.threshold {
        (node.left, node.right)
    } else {
        (node.right, node.left)
    };
    let hot_zero = tree.nodes[hot].cover / node.cover;
    let cold_zero = tree.nodes[cold].cover / node.cover;

    let mut incoming_zero = 1.0;
    let mut incoming_one = 1.0;
    let mut depth = depth;
    if let Some(k) = (1..=depth).find(|&k| path[k].feature == Some(node.feature)) {
        incoming_zero = path[k].zero_fraction;
        incoming_one = path[k].one_fraction;
        unwind_path(&mut path, depth, k);
        depth -= 1;
    }

    recurse(
        tree,
        x,
        hot,
        &path,
        depth + 1,
        hot_zero * incoming_zero,
        incoming_one,
        Some(node.feature),
        &mut *leaf,
    );
    recurse(
        tree,
        x,
        cold,
        &path,
        depth + 1,
        cold_zero * incoming_zero,
        0.0,
        Some(node.feature),
        &mut *leaf,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tree::Node;

    fn node(feature: usize, threshold: f64, left: usize, right: usize, cover: f64) -> Node {
        Node {
            feature,
            threshold,
            left,
            right,
            value: vec![0.0],
            cover,
            is_leaf: false,
        }
    }

    fn leaf(value: f64, cover: f64) -> Node {
        Node {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value: vec![value],
            cover,
            is_leaf: true,
        }
    }

    /// f(x) = [x0 > 0.5] * [x1 > 0.5] with uniform covers.
    fn and_tree() -> TreeEnsemble {
        let tree = Tree {
            nodes: vec![
                node(0, 0.5, 1, 2, 4.0),
                leaf(0.0, 2.0),
                node(1, 0.5, 3, 4, 2.0),
                leaf(0.0, 1.0),
                leaf(1.0, 1.0),
            ],
        };
        let mut ensemble = TreeEnsemble::new(2, vec![0.0]);
        ensemble.push(tree, TreeOutput::Single(0), 1.0);
        ensemble
    }

    #[test]
    fn and_function_splits_credit_evenly() {
        let ensemble = and_tree();
        assert_eq!(ensemble.expected_value(), vec![0.25]);
        let phi = tree_shap(&ensemble, &[1.0, 1.0]);
        assert!((phi[0][0] - 0.375).abs() < 1e-12);
        assert!((phi[0][1] - 0.375).abs() < 1e-12);
    }

    #[test]
    fn repeated_feature_on_path_stays_additive() {
        // x0 split twice along one branch
        let tree = Tree {
            nodes: vec![
                node(0, 0.5, 1, 2, 10.0),
                leaf(-1.0, 4.0),
                node(0, 2.0, 3, 4, 6.0),
                node(1, 0.0, 5, 6, 3.0),
                leaf(3.0, 3.0),
                leaf(0.5, 2.0),
                leaf(2.0, 1.0),
            ],
        };
        let mut ensemble = TreeEnsemble::new(2, vec![0.1]);
        ensemble.push(tree, TreeOutput::Single(0), 1.0);
        for x in [[1.0, -1.0], [1.0, 1.0], [3.0, 0.0], [0.0, 5.0]] {
            let phi = tree_shap(&ensemble, &x);
            let total: f64 = ensemble.expected_value()[0] + phi[0].iter().sum::<f64>();
            assert!((total - ensemble.raw_output(&x)[0]).abs() < 1e-12, "x = {:?}", x);
        }
    }

    #[test]
    fn unused_feature_gets_zero() {
        let ensemble = and_tree();
        let mut wide = TreeEnsemble::new(3, vec![0.0]);
        wide.trees = ensemble.trees;
        let phi = tree_shap(&wide, &[1.0, 0.0, 7.0]);
        assert_eq!(phi[0][2], 0.0);
    }

    #[test]
    fn ranking_ties_keep_column_order() {
        assert_eq!(rank(&[0.1, 0.3, 0.1, 0.3]), vec![1, 3, 0, 2]);
    }

    #[test]
    fn variants_parse() {
        assert_eq!("decision-path".parse::<ExplainVariant>().unwrap(), ExplainVariant::DecisionPath);
        assert!("heatmap".parse::<ExplainVariant>().is_err());
    }
}
