use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// The value a leaf reports: a class index for classifiers, a raw score otherwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LeafValue {
    Class(usize),
    Score(f64),
}

impl LeafValue {
    /// Picks the value of a leaf from its output vector. A single output is a score,
    /// several outputs are a class distribution and the first maximum wins.
    pub fn from_distribution(values: &[f64]) -> Option<Self> {
        match values {
            [] => None,
            [score] => Some(Self::Score(*score)),
            _ => {
                let mut best = 0;
                for (i, value) in values.iter().enumerate() {
                    if *value > values[best] {
                        best = i;
                    }
                }
                Some(Self::Class(best))
            }
        }
    }
}

impl PartialEq for LeafValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LeafValue {}

impl PartialOrd for LeafValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LeafValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Class(a), Self::Class(b)) => a.cmp(b),
            (Self::Score(a), Self::Score(b)) => a.total_cmp(b),
            (Self::Class(_), Self::Score(_)) => Ordering::Less,
            (Self::Score(_), Self::Class(_)) => Ordering::Greater,
        }
    }
}

/// A node of a binary decision tree. The left child is taken when the feature value
/// is `<= threshold`, the right child when it is `> threshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DecisionNode {
    Internal {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: LeafValue,
    },
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<DecisionNode>,
}

impl Tree {
    /// Validates a node array rooted at index 0.
    pub fn new(tree_id: usize, nodes: Vec<DecisionNode>, num_feature: usize) -> Result<Self> {
        let malformed = |node: usize, reason: String| ConvertError::MalformedModel {
            tree: tree_id,
            node,
            reason,
        };

        if nodes.is_empty() {
            return Err(malformed(0, "tree has no nodes".to_string()));
        }

        let mut seen = vec![false; nodes.len()];
        let mut stack = vec![0];

        while let Some(index) = stack.pop() {
            if seen[index] {
                return Err(malformed(
                    index,
                    "node is reachable from more than one parent".to_string(),
                ));
            }
            seen[index] = true;

            if let DecisionNode::Internal {
                feature,
                threshold,
                left,
                right,
            } = &nodes[index]
            {
                if *feature >= num_feature {
                    return Err(ConvertError::FeatureOutOfRange {
                        tree: tree_id,
                        node: index,
                        feature: *feature,
                        num_feature,
                    });
                }
                if !threshold.is_finite() {
                    return Err(malformed(index, format!("threshold {threshold} is not finite")));
                }
                for child in [*left, *right] {
                    if child >= nodes.len() {
                        return Err(malformed(
                            index,
                            format!("child {child} is out of range ({} nodes)", nodes.len()),
                        ));
                    }
                    stack.push(child);
                }
            }
        }

        let unreachable = seen.iter().filter(|reached| !**reached).count();
        if unreachable > 0 {
            log::debug!("tree {tree_id}: {unreachable} nodes are unreachable from the root");
        }

        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[DecisionNode] {
        &self.nodes
    }

    pub fn root(&self) -> &DecisionNode {
        &self.nodes[0]
    }
}

/// A validated ensemble of trees over `num_feature` input features.
#[derive(Debug, Clone)]
pub struct Forest {
    pub num_feature: usize,
    pub trees: Vec<Tree>,
}

// largest float strictly below `x`
pub(crate) fn next_below(x: f64) -> f64 {
    if x == 0.0 {
        -f64::from_bits(1)
    } else if x > 0.0 {
        f64::from_bits(x.to_bits() - 1)
    } else {
        f64::from_bits(x.to_bits() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(class: usize) -> DecisionNode {
        DecisionNode::Leaf {
            value: LeafValue::Class(class),
        }
    }

    fn split(feature: usize, threshold: f64, left: usize, right: usize) -> DecisionNode {
        DecisionNode::Internal {
            feature,
            threshold,
            left,
            right,
        }
    }

    #[test]
    fn accepts_well_formed_tree() {
        let tree = Tree::new(0, vec![split(1, 0.5, 1, 2), leaf(0), leaf(1)], 2).unwrap();
        assert_eq!(tree.nodes().len(), 3);
    }

    #[test]
    fn rejects_child_out_of_range() {
        let err = Tree::new(3, vec![split(0, 0.5, 1, 7), leaf(0)], 1).unwrap_err();
        assert!(matches!(err, ConvertError::MalformedModel { tree: 3, node: 0, .. }));
    }

    #[test]
    fn rejects_feature_out_of_range() {
        let err = Tree::new(0, vec![split(4, 0.5, 1, 2), leaf(0), leaf(1)], 4).unwrap_err();
        assert!(matches!(err, ConvertError::FeatureOutOfRange { feature: 4, .. }));
    }

    #[test]
    fn rejects_shared_children_and_cycles() {
        let shared = Tree::new(0, vec![split(0, 0.5, 1, 1), leaf(0)], 1);
        assert!(shared.is_err());

        let cycle = Tree::new(0, vec![split(0, 0.5, 1, 2), split(0, 0.2, 0, 2), leaf(0)], 1);
        assert!(cycle.is_err());
    }

    #[test]
    fn rejects_non_finite_threshold() {
        let err = Tree::new(0, vec![split(0, f64::NAN, 1, 2), leaf(0), leaf(1)], 1).unwrap_err();
        assert!(matches!(err, ConvertError::MalformedModel { .. }));
    }

    #[test]
    fn leaf_value_from_distribution() {
        assert_eq!(LeafValue::from_distribution(&[]), None);
        assert_eq!(LeafValue::from_distribution(&[0.25]), Some(LeafValue::Score(0.25)));
        assert_eq!(
            LeafValue::from_distribution(&[1.0, 7.0, 7.0, 2.0]),
            Some(LeafValue::Class(1))
        );
    }

    #[test]
    fn next_below_is_strictly_smaller() {
        for x in [0.0, 1.0, -1.0, 3.5e-300, -2.25] {
            let below = next_below(x);
            assert!(below < x);
        }
        assert_eq!(next_below(1.0), 1.0 - f64::EPSILON / 2.0);
    }
}
