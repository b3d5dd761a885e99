// https://github.com/dmlc/treelite/blob/v4/src/json_serializer.cc
use serde::Deserialize;

use crate::error::{ConvertError, Result};
use crate::model::{next_below, DecisionNode, Forest, LeafValue, Tree as ForestTree};

#[derive(Debug, Deserialize)]
pub struct Model {
    num_feature: usize,
    task_param: TaskParam,
    trees: Vec<Tree>,
}

impl Model {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Translates every tree into the canonical form, folding each comparison
    /// operator into a `<=` split.
    pub fn into_forest(self) -> Result<Forest> {
        log::info!(
            "treelite model: {} trees, {} features, {} classes",
            self.trees.len(),
            self.num_feature,
            self.task_param.num_class
        );

        let trees = self
            .trees
            .into_iter()
            .enumerate()
            .map(|(tree_id, tree)| convert_tree(tree, tree_id, self.num_feature))
            .collect::<Result<Vec<_>>>()?;

        Ok(Forest {
            num_feature: self.num_feature,
            trees,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TaskParam {
    num_class: usize,
}

#[derive(Debug, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LeafVector {
    Scalar(f64),
    OneHot(Vec<f64>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Node {
    Internal {
        split_feature_id: usize,
        comparison_op: String,
        threshold: f64,
        left_child: usize,
        right_child: usize,
    },
    Leaf {
        leaf_value: LeafVector,
    },
}

// see https://github.com/dmlc/treelite/blob/v4/include/treelite/base.h
#[derive(Debug, Clone, Copy)]
enum ComparisonOp {
    Less,
    Greater,
    LessEquals,
    GreaterEquals,
}

impl ComparisonOp {
    fn parse(op: &str) -> Result<Self> {
        match op {
            "<" => Ok(Self::Less),
            ">" => Ok(Self::Greater),
            "<=" => Ok(Self::LessEquals),
            ">=" => Ok(Self::GreaterEquals),
            other => Err(ConvertError::UnsupportedComparison(other.to_string())),
        }
    }

    /// Rewrites "go left when `x op threshold`" as
    /// `(threshold', child when x <= threshold', child when x > threshold')`.
    fn normalize(self, threshold: f64, left: usize, right: usize) -> (f64, usize, usize) {
        match self {
            Self::LessEquals => (threshold, left, right),
            Self::Greater => (threshold, right, left),
            Self::Less => (next_below(threshold), left, right),
            Self::GreaterEquals => (next_below(threshold), right, left),
        }
    }
}

fn convert_tree(tree: Tree, tree_id: usize, num_feature: usize) -> Result<ForestTree> {
    let nodes = tree
        .nodes
        .into_iter()
        .enumerate()
        .map(|(node_id, node)| match node {
            Node::Internal {
                split_feature_id,
                comparison_op,
                threshold,
                left_child,
                right_child,
            } => {
                let (threshold, left, right) = ComparisonOp::parse(&comparison_op)?
                    .normalize(threshold, left_child, right_child);
                Ok(DecisionNode::Internal {
                    feature: split_feature_id,
                    threshold,
                    left,
                    right,
                })
            }
            Node::Leaf { leaf_value } => {
                let value = match leaf_value {
                    LeafVector::Scalar(value) => Some(LeafValue::Score(value)),
                    LeafVector::OneHot(values) => LeafValue::from_distribution(&values),
                };
                let value = value.ok_or_else(|| ConvertError::MalformedModel {
                    tree: tree_id,
                    node: node_id,
                    reason: "leaf has an empty value vector".to_string(),
                })?;
                Ok(DecisionNode::Leaf { value })
            }
        })
        .collect::<Result<Vec<_>>>()?;

    ForestTree::new(tree_id, nodes, num_feature)
}
