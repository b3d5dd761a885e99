// https://github.com/catboost/tutorials/blob/master/model_analysis/model_export_as_json_tutorial.ipynb
use serde::Deserialize;

use crate::error::{ConvertError, Result};
use crate::model::{DecisionNode, Forest, LeafValue, Tree as ForestTree};

#[derive(Debug, Deserialize)]
pub struct Model {
    features_info: FeaturesInfo,
    model_info: ModelInfo,
    oblivious_trees: Vec<Tree>,
}

impl Model {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Unrolls every oblivious tree into an explicit binary tree.
    pub fn into_forest(self) -> Result<Forest> {
        let num_feature = self.features_info.float_features.len();
        let num_class = match self.model_info.class_params.class_names.len() {
            // representing binary classification with a single class as it also has a single value per leaf
            x if x < 3 => 1,
            x => x,
        };

        log::info!(
            "catboost model: {} oblivious trees, {} features, {} values per leaf",
            self.oblivious_trees.len(),
            num_feature,
            num_class
        );

        let trees = self
            .oblivious_trees
            .iter()
            .enumerate()
            .map(|(tree_id, tree)| unroll_tree(tree, tree_id, num_feature, num_class))
            .collect::<Result<Vec<_>>>()?;

        Ok(Forest { num_feature, trees })
    }
}

#[derive(Debug, Deserialize)]
struct FeaturesInfo {
    float_features: Vec<FloatFeature>,
}

#[derive(Debug, Deserialize)]
struct FloatFeature {}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    class_params: ClassParams,
}

#[derive(Debug, Deserialize)]
struct ClassParams {
    class_names: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct Tree {
    leaf_values: Vec<f64>,
    splits: Vec<TreeSplit>,
}

#[derive(Debug, Deserialize)]
struct TreeSplit {
    border: f64,
    float_feature_index: usize,
}

fn unroll_tree(
    tree: &Tree,
    tree_id: usize,
    num_feature: usize,
    num_class: usize,
) -> Result<ForestTree> {
    let expected = num_class << tree.splits.len();
    if tree.leaf_values.len() != expected {
        return Err(ConvertError::MalformedModel {
            tree: tree_id,
            node: 0,
            reason: format!(
                "expected {expected} leaf values for depth {}, found {}",
                tree.splits.len(),
                tree.leaf_values.len()
            ),
        });
    }

    let mut nodes = Vec::with_capacity(2 << tree.splits.len());
    unroll_node(tree, 0, 0, num_class, &mut nodes);
    ForestTree::new(tree_id, nodes, num_feature)
}

// Bit `depth` of a leaf index is set when the value went above that level's border.
fn unroll_node(
    tree: &Tree,
    depth: usize,
    leaf_index: usize,
    num_class: usize,
    nodes: &mut Vec<DecisionNode>,
) -> usize {
    let index = nodes.len();

    if depth == tree.splits.len() {
        let values = &tree.leaf_values[leaf_index * num_class..(leaf_index + 1) * num_class];
        // num_class is never zero, so the slice is never empty
        let value = LeafValue::from_distribution(values).unwrap_or(LeafValue::Score(0.0));
        nodes.push(DecisionNode::Leaf { value });
        return index;
    }

    let split = &tree.splits[depth];
    nodes.push(DecisionNode::Leaf {
        value: LeafValue::Score(0.0),
    });
    let left = unroll_node(tree, depth + 1, leaf_index, num_class, nodes);
    let right = unroll_node(tree, depth + 1, leaf_index | (1 << depth), num_class, nodes);
    nodes[index] = DecisionNode::Internal {
        feature: split.float_feature_index,
        threshold: split.border,
        left,
        right,
    };

    index
}
