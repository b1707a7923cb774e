//! CART (Classification and Regression Tree) builder
//!
//! Exact-greedy regression tree construction on squared error. Leaf values
//! are `Σ r / (n + λ)` over the residuals reaching the leaf; with `λ = 0`
//! this is the plain mean used by the forest.

use assay_ai_core::ensemble::{Node, Tree};

use crate::deterministic::{LcgRng, SplitTieBreaker};

/// Smallest gain that justifies a split.
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all of them.
    pub max_features: Option<usize>,
    /// L2 regularization on leaf values.
    pub reg_lambda: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_samples_leaf: 1,
            max_features: None,
            reg_lambda: 0.0,
        }
    }
}

/// Split candidate with gain and tie-breaker
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
    tie_breaker: SplitTieBreaker,
}

/// Build a regression tree using exact-greedy CART algorithm
pub struct CartBuilder<'a> {
    config: TreeConfig,
    features: &'a [Vec<f64>],
    residuals: &'a [f64],
    feature_count: usize,
}

impl<'a> CartBuilder<'a> {
    pub fn new(features: &'a [Vec<f64>], residuals: &'a [f64], config: TreeConfig) -> Self {
        let feature_count = features.first().map(Vec::len).unwrap_or(0);
        Self {
            config,
            features,
            residuals,
            feature_count,
        }
    }

    /// Build a tree over `indices`, which may repeat rows (bootstrap samples).
    pub fn build(&self, indices: &[usize], rng: &mut LcgRng) -> Tree {
        let mut nodes = Vec::new();
        self.build_node(indices, 0, &mut nodes, 0, rng);
        Tree::new(nodes, 1.0)
    }

    /// Recursively build tree nodes in pre-order; returns the node's index.
    fn build_node(
        &self,
        indices: &[usize],
        depth: usize,
        nodes: &mut Vec<Node>,
        node_id: usize,
        rng: &mut LcgRng,
    ) -> i32 {
        let current_idx = nodes.len() as i32;
        let leaf_value = self.leaf_value(indices);

        if depth >= self.config.max_depth || indices.len() < 2 * self.config.min_samples_leaf.max(1) {
            nodes.push(Node::leaf(current_idx, leaf_value));
            return current_idx;
        }

        let Some(split) = self.find_best_split(indices, node_id, rng) else {
            nodes.push(Node::leaf(current_idx, leaf_value));
            return current_idx;
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.features[i][split.feature_idx] <= split.threshold);

        // Reserve space for current node
        nodes.push(Node::internal(
            current_idx,
            split.feature_idx as i32,
            split.threshold,
            -1,
            -1,
        ));

        let left = self.build_node(&left_indices, depth + 1, nodes, node_id * 2 + 1, rng);
        let right = self.build_node(&right_indices, depth + 1, nodes, node_id * 2 + 2, rng);

        let node = &mut nodes[current_idx as usize];
        node.left = left;
        node.right = right;

        current_idx
    }

    /// Sweep each candidate feature in sorted order, scoring every midpoint
    /// between distinct consecutive values.
    fn find_best_split(
        &self,
        indices: &[usize],
        node_id: usize,
        rng: &mut LcgRng,
    ) -> Option<SplitCandidate> {
        let candidates = match self.config.max_features {
            Some(k) if k < self.feature_count => rng.sample_indices(self.feature_count, k.max(1)),
            _ => (0..self.feature_count).collect(),
        };

        let lambda = self.config.reg_lambda;
        let min_leaf = self.config.min_samples_leaf.max(1);
        let total_sum: f64 = indices.iter().map(|&i| self.residuals[i]).sum();
        let total_n = indices.len();
        let parent_score = score(total_sum, total_n, lambda);

        let mut best: Option<SplitCandidate> = None;
        let mut sorted = indices.to_vec();

        for feature_idx in candidates {
            sorted.sort_by(|&a, &b| self.features[a][feature_idx].total_cmp(&self.features[b][feature_idx]));

            let mut left_sum = 0.0;
            let mut rank = 0usize;
            for pos in 0..total_n - 1 {
                left_sum += self.residuals[sorted[pos]];
                let here = self.features[sorted[pos]][feature_idx];
                let next = self.features[sorted[pos + 1]][feature_idx];
                if here == next {
                    continue;
                }
                rank += 1;

                let n_left = pos + 1;
                let n_right = total_n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }

                let gain = score(left_sum, n_left, lambda)
                    + score(total_sum - left_sum, n_right, lambda)
                    - parent_score;
                if gain <= MIN_SPLIT_GAIN {
                    continue;
                }

                let candidate = SplitCandidate {
                    feature_idx,
                    threshold: here + (next - here) / 2.0,
                    gain,
                    tie_breaker: SplitTieBreaker::new(feature_idx, rank, node_id),
                };
                best = match best {
                    Some(current)
                        if gain < current.gain
                            || (gain == current.gain && candidate.tie_breaker > current.tie_breaker) =>
                    {
                        Some(current)
                    }
                    _ => Some(candidate),
                };
            }
        }

        best
    }

    fn leaf_value(&self, indices: &[usize]) -> f64 {
        let sum: f64 = indices.iter().map(|&i| self.residuals[i]).sum();
        let denom = indices.len() as f64 + self.config.reg_lambda;
        if denom <= 0.0 {
            0.0
        } else {
            sum / denom
        }
    }
}

/// Structure score `G² / (n + λ)`
fn score(sum: f64, n: usize, lambda: f64) -> f64 {
    let denom = n as f64 + lambda;
    if denom <= 0.0 {
        0.0
    } else {
        sum * sum / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_split_separates_step() {
        let features = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        let targets = vec![0.0, 0.0, 10.0, 10.0];
        let config = TreeConfig {
            max_depth: 1,
            ..TreeConfig::default()
        };

        let tree = CartBuilder::new(&features, &targets, config).build(&[0, 1, 2, 3], &mut LcgRng::new(1));
        assert_eq!(tree.nodes.len(), 3);
        assert_eq!(tree.nodes[0].threshold, 2.5);
        assert!(tree.validate(1).is_ok());
        assert_eq!(tree.evaluate(&[1.5]), 0.0);
        assert_eq!(tree.evaluate(&[3.5]), 10.0);
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let features = vec![vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![5.0, 5.0, 5.0];
        let tree = CartBuilder::new(&features, &targets, TreeConfig::default())
            .build(&[0, 1, 2], &mut LcgRng::new(1));
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.nodes[0].leaf, Some(5.0));
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let features = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        let targets = vec![0.0, 0.0, 0.0, 10.0];
        let config = TreeConfig {
            max_depth: 3,
            min_samples_leaf: 2,
            ..TreeConfig::default()
        };
        let tree = CartBuilder::new(&features, &targets, config).build(&[0, 1, 2, 3], &mut LcgRng::new(1));
        // the only legal split is 2 | 2
        assert_eq!(tree.nodes[0].threshold, 2.5);
        assert_eq!(tree.nodes.len(), 3);
    }

    #[test]
    fn test_regularized_leaf_shrinks() {
        let features = vec![vec![1.0], vec![1.0]];
        let targets = vec![4.0, 4.0];
        let config = TreeConfig {
            reg_lambda: 2.0,
            ..TreeConfig::default()
        };
        let tree = CartBuilder::new(&features, &targets, config).build(&[0, 1], &mut LcgRng::new(1));
        assert_eq!(tree.nodes[0].leaf, Some(2.0));
    }
}
