//! Second-order regression tree learner shared by every tree ensemble.
//!
//! Trees are fit to per-row gradient/hessian pairs. Split quality and leaf
//! weights use the regularized second-order formulas:
//!
//! ```text
//! gain   = 0.5 * [G_L²/(H_L + λ) + G_R²/(H_R + λ) - G_P²/(H_P + λ)] - γ
//! weight = -G / (H + λ)
//! ```
//!
//! With `grad = prediction - y`, `hess = 1` and `λ = 0` a leaf holds the mean
//! residual, which makes the same learner a plain CART regressor (variance
//! reduction) for random forests and least-squares boosting.
//!
//! Three growth modes:
//! - [`Growth::DepthWise`]: level by level up to `max_depth` (XGBoost, classic GBM)
//! - [`Growth::LeafWise`]: always split the best leaf, bounded by a leaf budget (LightGBM)
//! - [`Growth::Oblivious`]: one shared split per level, symmetric tree (CatBoost)

use serde::{Deserialize, Serialize};

use super::Matrix;

/// Splits whose gain does not exceed this are treated as noise.
const MIN_SPLIT_GAIN: f64 = 1e-10;

/// Tree growth strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Growth {
    /// Grow every node until depth or sample limits stop it.
    DepthWise,
    /// Repeatedly split the leaf with the highest gain.
    LeafWise {
        /// Maximum number of leaves.
        max_leaves: usize,
    },
    /// Use a single (feature, threshold) per level across all nodes.
    Oblivious,
}

/// Structural and regularization limits for one tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Growth strategy.
    pub growth: Growth,
    /// Maximum depth (`None` = unbounded, except oblivious trees which use 6).
    pub max_depth: Option<usize>,
    /// Minimum rows a node needs before a split is attempted.
    pub min_samples_split: usize,
    /// Minimum rows on each side of a split.
    pub min_samples_leaf: usize,
    /// Minimum hessian sum on each side of a split.
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights.
    pub lambda: f64,
    /// Gain subtracted from every split.
    pub min_gain: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            growth: Growth::DepthWise,
            max_depth: Some(6),
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_child_weight: 0.0,
            lambda: 0.0,
            min_gain: 0.0,
        }
    }
}

const OBLIVIOUS_DEFAULT_DEPTH: usize = 6;

impl TreeParams {
    fn score(&self, stats: Stats) -> f64 {
        let denom = stats.hess + self.lambda;
        if denom <= 0.0 {
            0.0
        } else {
            stats.grad * stats.grad / denom
        }
    }

    fn leaf_weight(&self, stats: Stats) -> f64 {
        let denom = stats.hess + self.lambda;
        if denom <= 0.0 {
            0.0
        } else {
            -stats.grad / denom
        }
    }

    fn gain(&self, left: Stats, right: Stats, parent: Stats) -> f64 {
        0.5 * (self.score(left) + self.score(right) - self.score(parent)) - self.min_gain
    }

    fn admissible(&self, left: Stats, right: Stats) -> bool {
        left.count >= self.min_samples_leaf.max(1)
            && right.count >= self.min_samples_leaf.max(1)
            && left.hess >= self.min_child_weight
            && right.hess >= self.min_child_weight
    }

    fn can_split(&self, depth: usize, rows: usize) -> bool {
        self.max_depth.map_or(true, |max| depth < max) && rows >= self.min_samples_split.max(2)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    grad: f64,
    hess: f64,
    count: usize,
}

impl Stats {
    fn of(rows: &[usize], grad: &[f64], hess: &[f64]) -> Self {
        let mut stats = Self::default();
        for &i in rows {
            stats.add(i, grad, hess);
        }
        stats
    }

    fn add(&mut self, i: usize, grad: &[f64], hess: &[f64]) {
        self.grad += grad[i];
        self.hess += hess[i];
        self.count += 1;
    }

    fn minus(self, other: Self) -> Self {
        Self {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
            count: self.count.saturating_sub(other.count),
        }
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct Fitting<'a> {
    x: &'a Matrix,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a TreeParams,
}

impl Fitting<'_> {
    fn stats(&self, rows: &[usize]) -> Stats {
        Stats::of(rows, self.grad, self.hess)
    }

    fn best_split(&self, rows: &[usize], depth: usize) -> Option<Split> {
        if !self.params.can_split(depth, rows.len()) {
            return None;
        }
        let parent = self.stats(rows);
        let mut order = rows.to_vec();
        let mut best: Option<(usize, f64, f64)> = None;

        for feature in 0..self.x.n_cols() {
            order.sort_by(|&a, &b| self.x.get(a, feature).total_cmp(&self.x.get(b, feature)));
            let mut left = Stats::default();
            for k in 0..order.len() - 1 {
                left.add(order[k], self.grad, self.hess);
                let current = self.x.get(order[k], feature);
                let next = self.x.get(order[k + 1], feature);
                if next <= current {
                    continue;
                }
                let right = parent.minus(left);
                if !self.params.admissible(left, right) {
                    continue;
                }
                let gain = self.params.gain(left, right, parent);
                if gain > MIN_SPLIT_GAIN && best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, midpoint(current, next), gain));
                }
            }
        }

        let (feature, threshold, gain) = best?;
        let (left, right) = rows
            .iter()
            .partition(|&&i| self.x.get(i, feature) <= threshold);
        Some(Split {
            feature,
            threshold,
            gain,
            left,
            right,
        })
    }

    /// Best shared split across all `groups`, scored by summed gain.
    fn best_level_split(&self, groups: &[Vec<usize>]) -> Option<(usize, f64)> {
        let parents: Vec<Stats> = groups.iter().map(|g| self.stats(g)).collect();
        let base: f64 = parents.iter().map(|&p| self.params.score(p)).sum();
        let mut entries: Vec<(usize, usize)> = groups
            .iter()
            .enumerate()
            .flat_map(|(g, rows)| rows.iter().map(move |&r| (r, g)))
            .collect();
        if entries.len() < 2 {
            return None;
        }

        let mut best: Option<(usize, f64, f64)> = None;
        for feature in 0..self.x.n_cols() {
            entries.sort_by(|a, b| self.x.get(a.0, feature).total_cmp(&self.x.get(b.0, feature)));
            let mut left = vec![Stats::default(); groups.len()];
            let mut total = base;
            for k in 0..entries.len() - 1 {
                let (row, g) = entries[k];
                let before = self.params.score(left[g]) + self.params.score(parents[g].minus(left[g]));
                left[g].add(row, self.grad, self.hess);
                let after = self.params.score(left[g]) + self.params.score(parents[g].minus(left[g]));
                total += after - before;

                let current = self.x.get(row, feature);
                let next = self.x.get(entries[k + 1].0, feature);
                if next <= current {
                    continue;
                }
                let gain = 0.5 * (total - base) - self.params.min_gain;
                if gain > MIN_SPLIT_GAIN && best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, midpoint(current, next), gain));
                }
            }
        }
        best.map(|(feature, threshold, _)| (feature, threshold))
    }
}

fn midpoint(lo: f64, hi: f64) -> f64 {
    let mid = lo + (hi - lo) / 2.0;
    if mid < hi {
        mid
    } else {
        lo
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// A fitted regression tree stored as a flat node arena (root at index 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Fit a tree to the gradient statistics of `rows`.
    ///
    /// `rows` may contain duplicates (bootstrap samples).
    #[must_use]
    pub fn fit(x: &Matrix, grad: &[f64], hess: &[f64], rows: &[usize], params: &TreeParams) -> Self {
        let fitting = Fitting {
            x,
            grad,
            hess,
            params,
        };
        let mut tree = Self { nodes: Vec::new() };
        match params.growth {
            Growth::DepthWise => {
                tree.grow_depth_wise(&fitting, rows.to_vec(), 0);
            }
            Growth::LeafWise { max_leaves } => tree.grow_leaf_wise(&fitting, rows, max_leaves),
            Growth::Oblivious => tree.grow_oblivious(&fitting, rows),
        }
        tree
    }

    fn push_leaf(&mut self, value: f64) -> usize {
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    fn grow_depth_wise(&mut self, fitting: &Fitting<'_>, rows: Vec<usize>, depth: usize) -> usize {
        let idx = self.push_leaf(fitting.params.leaf_weight(fitting.stats(&rows)));
        if let Some(split) = fitting.best_split(&rows, depth) {
            let left = self.grow_depth_wise(fitting, split.left, depth + 1);
            let right = self.grow_depth_wise(fitting, split.right, depth + 1);
            self.nodes[idx] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
        }
        idx
    }

    fn grow_leaf_wise(&mut self, fitting: &Fitting<'_>, rows: &[usize], max_leaves: usize) {
        struct Frontier {
            node: usize,
            depth: usize,
            split: Option<Split>,
        }

        let root = self.push_leaf(fitting.params.leaf_weight(fitting.stats(rows)));
        let mut frontier = vec![Frontier {
            node: root,
            depth: 0,
            split: fitting.best_split(rows, 0),
        }];
        let mut leaves = 1;

        while leaves < max_leaves {
            let pick = frontier
                .iter()
                .enumerate()
                .filter_map(|(i, f)| f.split.as_ref().map(|s| (i, s.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i);
            let Some(pick) = pick else { break };
            let chosen = frontier.swap_remove(pick);
            let Some(split) = chosen.split else { break };

            let left = self.push_leaf(fitting.params.leaf_weight(fitting.stats(&split.left)));
            let right = self.push_leaf(fitting.params.leaf_weight(fitting.stats(&split.right)));
            self.nodes[chosen.node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            leaves += 1;

            let depth = chosen.depth + 1;
            for (node, child_rows) in [(left, split.left), (right, split.right)] {
                frontier.push(Frontier {
                    node,
                    depth,
                    split: fitting.best_split(&child_rows, depth),
                });
            }
        }
    }

    fn grow_oblivious(&mut self, fitting: &Fitting<'_>, rows: &[usize]) {
        let max_depth = fitting.params.max_depth.unwrap_or(OBLIVIOUS_DEFAULT_DEPTH);
        let mut groups = vec![rows.to_vec()];
        let mut levels = Vec::new();

        while levels.len() < max_depth {
            let Some((feature, threshold)) = fitting.best_level_split(&groups) else {
                break;
            };
            levels.push((feature, threshold));
            groups = groups
                .into_iter()
                .flat_map(|group| {
                    let (left, right): (Vec<usize>, Vec<usize>) = group
                        .into_iter()
                        .partition(|&i| fitting.x.get(i, feature) <= threshold);
                    [left, right]
                })
                .collect();
        }

        let leaf_values: Vec<f64> = groups
            .iter()
            .map(|g| fitting.params.leaf_weight(fitting.stats(g)))
            .collect();
        self.build_symmetric(&levels, &leaf_values, 0, 0);
    }

    fn build_symmetric(
        &mut self,
        levels: &[(usize, f64)],
        leaf_values: &[f64],
        level: usize,
        prefix: usize,
    ) -> usize {
        if level == levels.len() {
            return self.push_leaf(leaf_values.get(prefix).copied().unwrap_or(0.0));
        }
        let idx = self.push_leaf(0.0);
        let left = self.build_symmetric(levels, leaf_values, level + 1, prefix * 2);
        let right = self.build_symmetric(levels, leaf_values, level + 1, prefix * 2 + 1);
        let (feature, threshold) = levels[level];
        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    /// Predict one row.
    #[must_use]
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        while let Some(node) = self.nodes.get(idx) {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right };
                }
            }
        }
        0.0
    }

    /// Number of leaves.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Depth of the deepest leaf (a lone leaf has depth 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Matrix, Vec<f64>) {
        // y depends on x0 only: 1.0 below 5, 10.0 from 5 upward
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![f64::from(i), f64::from(i % 3)]).collect();
        let y = (0..10).map(|i| if i < 5 { 1.0 } else { 10.0 }).collect();
        (Matrix::from_rows(&rows).unwrap(), y)
    }

    fn cart_stats(y: &[f64]) -> (Vec<f64>, Vec<f64>) {
        (y.iter().map(|v| -v).collect(), vec![1.0; y.len()])
    }

    #[test]
    fn test_cart_finds_step() {
        let (x, y) = step_data();
        let (grad, hess) = cart_stats(&y);
        let rows: Vec<usize> = (0..10).collect();
        let tree = RegressionTree::fit(&x, &grad, &hess, &rows, &TreeParams::default());

        assert_eq!(tree.n_leaves(), 2);
        assert!((tree.predict_row(&[2.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!((tree.predict_row(&[7.0, 0.0]) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let (x, _) = step_data();
        let (grad, hess) = cart_stats(&[3.0; 10]);
        let rows: Vec<usize> = (0..10).collect();
        let tree = RegressionTree::fit(&x, &grad, &hess, &rows, &TreeParams::default());
        assert_eq!(tree.n_leaves(), 1);
        assert!((tree.predict_row(&[0.0, 0.0]) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_depth_respected() {
        let rows: Vec<Vec<f64>> = (0..32).map(|i| vec![f64::from(i)]).collect();
        let x = Matrix::from_rows(&rows).unwrap();
        let y: Vec<f64> = (0..32).map(|i| f64::from(i * i)).collect();
        let (grad, hess) = cart_stats(&y);
        let idx: Vec<usize> = (0..32).collect();
        let params = TreeParams {
            max_depth: Some(3),
            ..TreeParams::default()
        };
        let tree = RegressionTree::fit(&x, &grad, &hess, &idx, &params);
        assert!(tree.depth() <= 3);
        assert!(tree.n_leaves() <= 8);
    }

    #[test]
    fn test_min_samples_leaf_blocks_small_children() {
        let (x, y) = step_data();
        let (grad, hess) = cart_stats(&y);
        let rows: Vec<usize> = (0..10).collect();
        let params = TreeParams {
            min_samples_leaf: 6,
            ..TreeParams::default()
        };
        let tree = RegressionTree::fit(&x, &grad, &hess, &rows, &params);
        assert_eq!(tree.n_leaves(), 1);
    }

    #[test]
    fn test_leaf_wise_leaf_budget() {
        let rows: Vec<Vec<f64>> = (0..64).map(|i| vec![f64::from(i)]).collect();
        let x = Matrix::from_rows(&rows).unwrap();
        let y: Vec<f64> = (0..64).map(|i| f64::from(i).sin() * 10.0).collect();
        let (grad, hess) = cart_stats(&y);
        let idx: Vec<usize> = (0..64).collect();
        let params = TreeParams {
            growth: Growth::LeafWise { max_leaves: 5 },
            max_depth: None,
            ..TreeParams::default()
        };
        let tree = RegressionTree::fit(&x, &grad, &hess, &idx, &params);
        assert_eq!(tree.n_leaves(), 5);
    }

    #[test]
    fn test_oblivious_tree_is_symmetric() {
        let rows: Vec<Vec<f64>> = (0..16)
            .map(|i| vec![f64::from(i % 4), f64::from(i / 4)])
            .collect();
        let x = Matrix::from_rows(&rows).unwrap();
        let y: Vec<f64> = rows.iter().map(|r| r[0] * 2.0 + r[1] * 5.0).collect();
        let (grad, hess) = cart_stats(&y);
        let idx: Vec<usize> = (0..16).collect();
        let params = TreeParams {
            growth: Growth::Oblivious,
            max_depth: Some(2),
            ..TreeParams::default()
        };
        let tree = RegressionTree::fit(&x, &grad, &hess, &idx, &params);
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.n_leaves(), 4);
    }

    #[test]
    fn test_lambda_shrinks_leaves() {
        let (x, y) = step_data();
        let (grad, hess) = cart_stats(&y);
        let rows: Vec<usize> = (0..10).collect();
        let params = TreeParams {
            lambda: 5.0,
            max_depth: Some(0),
            ..TreeParams::default()
        };
        let tree = RegressionTree::fit(&x, &grad, &hess, &rows, &params);
        // sum(y) = 55, hess = 10, weight = 55 / 15
        assert!((tree.predict_row(&[0.0, 0.0]) - 55.0 / 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_tree_serde_roundtrip_predicts_same() {
        let (x, y) = step_data();
        let (grad, hess) = cart_stats(&y);
        let rows: Vec<usize> = (0..10).collect();
        let tree = RegressionTree::fit(&x, &grad, &hess, &rows, &TreeParams::default());
        let json = serde_json::to_string(&tree).unwrap();
        let back: RegressionTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }
}
