//! Regression tree nodes and traversal

use serde::{Deserialize, Serialize};

/// Tree node: internal split or leaf.
///
/// Child and feature indices use `-1` to mark their absence so the canonical
/// JSON form stays flat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: i32,
    pub left: i32,
    pub right: i32,
    #[serde(rename = "feature")]
    pub feature_idx: i32,
    pub threshold: f64,
    pub leaf: Option<f64>,
}

impl Node {
    pub fn internal(id: i32, feature_idx: i32, threshold: f64, left: i32, right: i32) -> Self {
        Self {
            id,
            left,
            right,
            feature_idx,
            threshold,
            leaf: None,
        }
    }

    pub fn leaf(id: i32, value: f64) -> Self {
        Self {
            id,
            left: -1,
            right: -1,
            feature_idx: -1,
            threshold: 0.0,
            leaf: Some(value),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }
}

/// A single regression tree with a contribution weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tree {
    pub nodes: Vec<Node>,
    pub weight: f64,
}

impl Tree {
    pub fn new(nodes: Vec<Node>, weight: f64) -> Self {
        Self { nodes, weight }
    }

    /// Walk from the root to a leaf. Goes left when `feature <= threshold`.
    ///
    /// Malformed trees and short feature vectors evaluate to 0.0; call
    /// [`Tree::validate`] before trusting a deserialized tree.
    pub fn evaluate(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };
            if let Some(value) = node.leaf {
                return value;
            }

            let Some(&feature_value) = usize::try_from(node.feature_idx)
                .ok()
                .and_then(|f| features.get(f))
            else {
                return 0.0;
            };

            let next = if feature_value <= node.threshold {
                node.left
            } else {
                node.right
            };
            match usize::try_from(next) {
                Ok(n) if n < self.nodes.len() => idx = n,
                _ => return 0.0,
            }
        }
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check child links, feature indices and leaf values.
    pub fn validate(&self, feature_count: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        if !self.weight.is_finite() {
            return Err(format!("tree weight {} is not finite", self.weight));
        }

        let n = self.nodes.len() as i32;
        for (i, node) in self.nodes.iter().enumerate() {
            match node.leaf {
                Some(value) if !value.is_finite() => {
                    return Err(format!("leaf node {i} has non-finite value"));
                }
                Some(_) => {}
                None => {
                    if node.left <= i as i32 || node.left >= n {
                        return Err(format!("node {i} has invalid left child: {}", node.left));
                    }
                    if node.right <= i as i32 || node.right >= n {
                        return Err(format!("node {i} has invalid right child: {}", node.right));
                    }
                    if node.feature_idx < 0 || node.feature_idx as usize >= feature_count {
                        return Err(format!(
                            "internal node {i} has invalid feature index: {}",
                            node.feature_idx
                        ));
                    }
                    if !node.threshold.is_finite() {
                        return Err(format!("internal node {i} has non-finite threshold"));
                    }
                }
            }
        }
        Ok(())
    }
}
