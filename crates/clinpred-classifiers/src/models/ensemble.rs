use serde::{Deserialize, Serialize};

use crate::models::tree::Tree;

/// Which raw outputs a tree contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TreeOutput {
    /// A scalar leaf added to one output (boosting).
    Single(usize),
    /// A vector leaf added to every output (forest class distributions).
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleTree {
    pub tree: Tree,
    pub output: TreeOutput,
    pub weight: f64,
}

/// Additive tree model: `raw[k] = base_score[k] + Σ weight * leaf[k]`.
///
/// This is the structure the TreeSHAP explainer walks, so every tree-based
/// classifier exposes its fitted model in this form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub n_features: usize,
    pub n_outputs: usize,
    pub base_score: Vec<f64>,
    pub trees: Vec<EnsembleTree>,
}

impl TreeEnsemble {
    pub fn new(n_features: usize, base_score: Vec<f64>) -> Self {
        Self {
            n_features,
            n_outputs: base_score.len(),
            base_score,
            trees: Vec::new(),
        }
    }

    pub fn push(&mut self, tree: Tree, output: TreeOutput, weight: f64) {
        self.trees.push(EnsembleTree {
            tree,
            output,
            weight,
        });
    }

    /// Raw model output for one row.
    pub fn raw_output(&self, x: &[f64]) -> Vec<f64> {
        let mut out = self.base_score.clone();
        for t in &self.trees {
            let leaf = t.tree.predict(x);
            accumulate(&mut out, t.output, leaf, t.weight);
        }
        out
    }

    /// Expectation of the raw output over the data the trees were fitted on.
    pub fn expected_value(&self) -> Vec<f64> {
        let mut out = self.base_score.clone();
        for t in &self.trees {
            let ev = t.tree.expected_value();
            accumulate(&mut out, t.output, &ev, t.weight);
        }
        out
    }
}

pub(crate) fn accumulate(out: &mut [f64], target: TreeOutput, value: &[f64], weight: f64) {
    match target {
        TreeOutput::Single(k) => out[k] += weight * value[0],
        TreeOutput::All => {
            for (o, v) in out.iter_mut().zip(value) {
                *o += weight * v;
            }
        }
    }
}
