// Mirrors the parallel arrays of scikit-learn's `sklearn.tree._tree.Tree`.
use serde::Deserialize;

use crate::error::{ConvertError, Result};
use crate::model::{DecisionNode, Forest, LeafValue, Tree as ForestTree};

/// `children_left` / `children_right` value of a leaf.
pub const CHILD_LEAF_SENTINEL: i64 = -1;
/// `feature` value of a leaf.
pub const FEATURE_LEAF_SENTINEL: i64 = -2;

#[derive(Debug, Deserialize)]
pub struct Model {
    n_features: usize,
    estimators: Vec<TreeArrays>,
}

impl Model {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn into_forest(self) -> Result<Forest> {
        log::info!(
            "sklearn model: {} estimators, {} features",
            self.estimators.len(),
            self.n_features
        );

        let trees = self
            .estimators
            .iter()
            .enumerate()
            .map(|(tree_id, tree)| tree.to_tree(tree_id, self.n_features))
            .collect::<Result<Vec<_>>>()?;

        Ok(Forest {
            num_feature: self.n_features,
            trees,
        })
    }
}

/// One estimator's `tree_`, with `value` flattened to one output vector per node.
#[derive(Debug, Deserialize)]
pub struct TreeArrays {
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub value: Vec<Vec<f64>>,
}

impl TreeArrays {
    pub fn to_tree(&self, tree_id: usize, num_feature: usize) -> Result<ForestTree> {
        let len = self.feature.len();
        let malformed = |node: usize, reason: String| ConvertError::MalformedModel {
            tree: tree_id,
            node,
            reason,
        };

        for (name, found) in [
            ("threshold", self.threshold.len()),
            ("children_left", self.children_left.len()),
            ("children_right", self.children_right.len()),
            ("value", self.value.len()),
        ] {
            if found != len {
                return Err(malformed(0, format!("{name} has {found} entries, expected {len}")));
            }
        }

        let child = |node: usize, raw: i64| {
            usize::try_from(raw).map_err(|_| malformed(node, format!("invalid child index {raw}")))
        };

        let nodes = (0..len)
            .map(|node| {
                let left = self.children_left[node];
                let right = self.children_right[node];

                if self.feature[node] == FEATURE_LEAF_SENTINEL
                    || (left == CHILD_LEAF_SENTINEL && right == CHILD_LEAF_SENTINEL)
                {
                    let value = LeafValue::from_distribution(&self.value[node])
                        .ok_or_else(|| malformed(node, "leaf has no value".to_string()))?;
                    return Ok(DecisionNode::Leaf { value });
                }

                if left == CHILD_LEAF_SENTINEL || right == CHILD_LEAF_SENTINEL {
                    return Err(malformed(node, "split node has a single child".to_string()));
                }

                let feature = usize::try_from(self.feature[node]).map_err(|_| {
                    malformed(node, format!("invalid feature index {}", self.feature[node]))
                })?;

                Ok(DecisionNode::Internal {
                    feature,
                    threshold: self.threshold[node],
                    left: child(node, left)?,
                    right: child(node, right)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        ForestTree::new(tree_id, nodes, num_feature)
    }
}
