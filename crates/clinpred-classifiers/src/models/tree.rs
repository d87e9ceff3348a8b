//! Binary decision trees shared by the boosted and bagged ensembles.
//!
//! Trees are stored as a flat node vector with the root at index 0. A sample
//! goes to the left child when `x[feature] <= threshold`. Every node keeps
//! its cover (number of fitting rows that reached it), which the TreeSHAP
//! explainer needs.

use std::cmp::Ordering;
use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

use crate::config::Criterion;
use crate::math::Array2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub feature: usize,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    pub value: Vec<f64>,
    pub cover: f64,
    pub is_leaf: bool,
}

impl Node {
    fn leaf(value: Vec<f64>, cover: f64) -> Self {
        Node {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
            cover,
            is_leaf: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn leaf_index(&self, x: &[f64]) -> usize {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            if node.is_leaf {
                return idx;
            }
            idx = if x[node.feature] <= node.threshold {
                node.left
            } else {
                node.right
            };
        }
    }

    pub fn predict(&self, x: &[f64]) -> &[f64] {
        &self.nodes[self.leaf_index(x)].value
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf).count()
    }

    pub fn max_depth(&self) -> usize {
        fn walk(tree: &Tree, idx: usize) -> usize {
            let node = &tree.nodes[idx];
            if node.is_leaf {
                0
            } else {
                1 + walk(tree, node.left).max(walk(tree, node.right))
            }
        }
        walk(self, 0)
    }

    /// Cover-weighted mean of the leaf values.
    pub fn expected_value(&self) -> Vec<f64> {
        let root = self.root();
        let mut out = vec![0.0; root.value.len()];
        if root.cover <= 0.0 {
            return out;
        }
        for leaf in self.nodes.iter().filter(|n| n.is_leaf) {
            for (o, v) in out.iter_mut().zip(&leaf.value) {
                *o += leaf.cover * v;
            }
        }
        out.iter_mut().for_each(|o| *o /= root.cover);
        out
    }
}

/// Order in which candidate leaves are expanded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Growth {
    /// Best-first: always split the leaf with the largest gain.
    LeafWise { max_leaves: usize },
    /// Level by level until `max_depth`.
    DepthWise,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeParams {
    pub growth: Growth,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Number of features drawn at each node; `None` uses all allowed features.
    pub max_features: Option<usize>,
}

/// What a tree is fitted against.
#[derive(Debug, Clone, Copy)]
pub enum Objective<'a> {
    /// Second-order boosting step. Leaf value is `-shrinkage * T(G) / (H + lambda)`.
    Gradient {
        grad: &'a [f64],
        hess: &'a [f64],
        lambda: f64,
        alpha: f64,
        gamma: f64,
        min_child_weight: f64,
        shrinkage: f64,
    },
    /// Weighted class impurity. Leaf value is the class distribution.
    Impurity {
        labels: &'a [usize],
        weights: &'a [f64],
        n_classes: usize,
        criterion: Criterion,
    },
}

/// Running sums for one side of a split.
#[derive(Debug, Clone)]
struct Acc {
    g: f64,
    h: f64,
    hist: Vec<f64>,
    w: f64,
}

impl Acc {
    fn new(objective: &Objective<'_>) -> Self {
        let classes = match objective {
            Objective::Impurity { n_classes, .. } => *n_classes,
            Objective::Gradient { .. } => 0,
        };
        Acc {
            g: 0.0,
            h: 0.0,
            hist: vec![0.0; classes],
            w: 0.0,
        }
    }

    fn add(&mut self, objective: &Objective<'_>, row: usize, sign: f64) {
        match objective {
            Objective::Gradient { grad, hess, .. } => {
                self.g += sign * grad[row];
                self.h += sign * hess[row];
            }
            Objective::Impurity {
                labels, weights, ..
            } => {
                self.hist[labels[row]] += sign * weights[row];
                self.w += sign * weights[row];
            }
        }
    }
}

fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

fn impurity(criterion: Criterion, hist: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    match criterion {
        Criterion::Gini => 1.0 - hist.iter().map(|c| (c / total).powi(2)).sum::<f64>(),
        Criterion::Entropy => -hist
            .iter()
            .filter(|c| **c > 0.0)
            .map(|c| {
                let p = c / total;
                p * p.log2()
            })
            .sum::<f64>(),
    }
}

impl Objective<'_> {
    fn leaf_value(&self, acc: &Acc) -> Vec<f64> {
        match self {
            Objective::Gradient {
                lambda,
                alpha,
                shrinkage,
                ..
            } => {
                let denom = acc.h + lambda;
                let v = if denom > 0.0 {
                    -shrinkage * soft_threshold(acc.g, *alpha) / denom
                } else {
                    0.0
                };
                vec![v]
            }
            Objective::Impurity { .. } => {
                if acc.w > 0.0 {
                    acc.hist.iter().map(|c| (c / acc.w).max(0.0)).collect()
                } else {
                    vec![0.0; acc.hist.len()]
                }
            }
        }
    }

    /// False when the node cannot improve (pure node).
    fn can_split(&self, acc: &Acc) -> bool {
        match self {
            Objective::Gradient { .. } => true,
            Objective::Impurity { criterion, .. } => impurity(*criterion, &acc.hist, acc.w) > 1e-12,
        }
    }

    /// Gain of splitting `total` into `left` and `right`, or `None` if a child violates a constraint.
    fn gain(&self, left: &Acc, right: &Acc, total: &Acc) -> Option<f64> {
        match self {
            Objective::Gradient {
                lambda,
                alpha,
                gamma,
                min_child_weight,
                ..
            } => {
                if left.h < *min_child_weight || right.h < *min_child_weight {
                    return None;
                }
                let score = |a: &Acc| {
                    let t = soft_threshold(a.g, *alpha);
                    t * t / (a.h + lambda)
                };
                let gain = 0.5 * (score(left) + score(right) - score(total)) - gamma;
                if gain > 0.0 {
                    Some(gain)
                } else {
                    None
                }
            }
            Objective::Impurity { criterion, .. } => {
                let parent = total.w * impurity(*criterion, &total.hist, total.w);
                let children = left.w * impurity(*criterion, &left.hist, left.w)
                    + right.w * impurity(*criterion, &right.hist, right.w);
                Some(parent - children)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Candidate {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    split: Option<Split>,
}

/// Fits a single tree on a subset of rows and features.
pub struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    objective: Objective<'a>,
    params: &'a TreeParams,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(x: &'a Array2<f64>, objective: Objective<'a>, params: &'a TreeParams) -> Self {
        Self {
            x,
            objective,
            params,
        }
    }

    /// Grow a tree from `rows` using only `features`. `rows` may contain duplicates (bootstrap).
    pub fn build(&self, rows: Vec<usize>, features: &[usize], rng: &mut StdRng) -> Tree {
        let mut nodes = Vec::new();
        let root = self.make_candidate(&mut nodes, rows, 0, features, rng);

        let mut pending: VecDeque<Candidate> = VecDeque::new();
        pending.push_back(root);
        let mut n_leaves = 1usize;

        while let Some(candidate) = self.next_candidate(&mut pending) {
            if let Growth::LeafWise { max_leaves } = self.params.growth {
                if n_leaves >= max_leaves {
                    break;
                }
            }
            let Some(split) = candidate.split else {
                continue;
            };

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = candidate
                .rows
                .iter()
                .partition(|&&r| self.x[(r, split.feature)] <= split.threshold);
            let depth = candidate.depth + 1;
            let left = self.make_candidate(&mut nodes, left_rows, depth, features, rng);
            let right = self.make_candidate(&mut nodes, right_rows, depth, features, rng);

            let node = &mut nodes[candidate.node];
            node.is_leaf = false;
            node.feature = split.feature;
            node.threshold = split.threshold;
            node.left = left.node;
            node.right = right.node;
            n_leaves += 1;

            pending.push_back(left);
            pending.push_back(right);
        }

        Tree { nodes }
    }

    fn next_candidate(&self, pending: &mut VecDeque<Candidate>) -> Option<Candidate> {
        match self.params.growth {
            Growth::DepthWise => pending.pop_front(),
            Growth::LeafWise { .. } => {
                // largest gain first; earlier candidates win ties
                let mut best: Option<(usize, f64)> = None;
                for (i, c) in pending.iter().enumerate() {
                    if let Some(split) = c.split {
                        if best.map_or(true, |(_, g)| split.gain > g) {
                            best = Some((i, split.gain));
                        }
                    }
                }
                match best {
                    Some((i, _)) => pending.remove(i),
                    None => {
                        pending.clear();
                        None
                    }
                }
            }
        }
    }

    fn make_candidate(
        &self,
        nodes: &mut Vec<Node>,
        rows: Vec<usize>,
        depth: usize,
        features: &[usize],
        rng: &mut StdRng,
    ) -> Candidate {
        let mut total = Acc::new(&self.objective);
        for &r in &rows {
            total.add(&self.objective, r, 1.0);
        }
        let node = nodes.len();
        nodes.push(Node::leaf(self.objective.leaf_value(&total), rows.len() as f64));

        let depth_ok = self.params.max_depth.map_or(true, |d| depth < d);
        let size_ok = rows.len() >= self.params.min_samples_split.max(2)
            && rows.len() >= 2 * self.params.min_samples_leaf.max(1);
        let split = if depth_ok && size_ok && self.objective.can_split(&total) {
            let drawn = self.draw_features(features, rng);
            self.best_split(&rows, &drawn, &total)
        } else {
            None
        };

        Candidate {
            node,
            rows,
            depth,
            split,
        }
    }

    fn draw_features(&self, features: &[usize], rng: &mut StdRng) -> Vec<usize> {
        match self.params.max_features {
            Some(k) if k < features.len() => {
                let mut drawn: Vec<usize> = sample(rng, features.len(), k.max(1))
                    .into_iter()
                    .map(|i| features[i])
                    .collect();
                drawn.sort_unstable();
                drawn
            }
            _ => features.to_vec(),
        }
    }

    fn best_split(&self, rows: &[usize], features: &[usize], total: &Acc) -> Option<Split> {
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<Split> = None;
        let mut order = rows.to_vec();

        for &f in features {
            order.sort_by(|&a, &b| {
                self.x[(a, f)]
                    .partial_cmp(&self.x[(b, f)])
                    .unwrap_or(Ordering::Equal)
            });

            let mut left = Acc::new(&self.objective);
            let mut right = total.clone();
            for i in 0..order.len() - 1 {
                let row = order[i];
                left.add(&self.objective, row, 1.0);
                right.add(&self.objective, row, -1.0);

                let v = self.x[(row, f)];
                let next = self.x[(order[i + 1], f)];
                if v >= next {
                    continue;
                }
                let n_left = i + 1;
                if n_left < min_leaf || order.len() - n_left < min_leaf {
                    continue;
                }
                let Some(gain) = self.objective.gain(&left, &right, total) else {
                    continue;
                };
                if best.map_or(true, |b| gain > b.gain) {
                    let mid = 0.5 * (v + next);
                    let threshold = if mid < next { mid } else { v };
                    best = Some(Split {
                        feature: f,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Seed for the `index`-th member of an ensemble.
pub fn derive_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
