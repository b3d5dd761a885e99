//! Root-to-leaf decision paths.
use serde::{Deserialize, Serialize};

use crate::charset::{self, CharacterSet};
use crate::error::Result;
use crate::model::{DecisionNode, LeafValue, Tree};
use crate::registry::ThresholdRegistry;
use crate::table::FeatureTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// `value <= threshold`, the left branch.
    AtMost,
    /// `value > threshold`, the right branch.
    Above,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub threshold: f64,
    pub direction: Direction,
}

impl Comparison {
    pub fn holds(&self, value: f64) -> bool {
        match self.direction {
            Direction::AtMost => value <= self.threshold,
            Direction::Above => value > self.threshold,
        }
    }
}

/// The half-open interval `(above, at_most]` a feature must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub above: Option<f64>,
    pub at_most: Option<f64>,
}

impl Bounds {
    fn tighten(self, other: Bounds) -> Bounds {
        let pick = |a: Option<f64>, b: Option<f64>, f: fn(f64, f64) -> f64| match (a, b) {
            (Some(a), Some(b)) => Some(f(a, b)),
            (a, b) => a.or(b),
        };
        Bounds {
            above: pick(self.above, other.above, f64::max),
            at_most: pick(self.at_most, other.at_most, f64::min),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.above.map_or(true, |above| value > above)
            && self.at_most.map_or(true, |at_most| value <= at_most)
    }
}

impl From<Comparison> for Bounds {
    fn from(comparison: Comparison) -> Self {
        match comparison.direction {
            Direction::AtMost => Bounds {
                above: None,
                at_most: Some(comparison.threshold),
            },
            Direction::Above => Bounds {
                above: Some(comparison.threshold),
                at_most: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainNode {
    pub feature: usize,
    /// The comparison this node was created from; merged nodes keep the first one.
    pub comparison: Comparison,
    /// Every comparison merged into this node, tightened into one interval.
    pub bounds: Bounds,
    /// Accepted labels, one set per bin the feature occupies.
    pub character_sets: Vec<CharacterSet>,
}

impl ChainNode {
    pub fn new(feature: usize, threshold: f64, direction: Direction) -> Self {
        let comparison = Comparison {
            threshold,
            direction,
        };
        Self {
            feature,
            comparison,
            bounds: comparison.into(),
            character_sets: Vec::new(),
        }
    }

    fn merge(&mut self, other: ChainNode) {
        self.bounds = self.bounds.tighten(other.bounds);
        for (mine, theirs) in self.character_sets.iter_mut().zip(other.character_sets) {
            mine.retain(|symbol| theirs.contains(symbol));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub tree_id: usize,
    pub chain_id: usize,
    pub nodes: Vec<ChainNode>,
    pub value: LeafValue,
}

impl Chain {
    /// Fills in the character sets of every node from the packed table.
    pub fn derive_character_sets(&mut self, table: &FeatureTable) -> Result<()> {
        for node in self.nodes.iter_mut() {
            node.character_sets = charset::derive(node.feature, node.comparison, table)?;
        }
        Ok(())
    }

    /// Sorts nodes by feature and merges nodes on the same feature, so every feature
    /// appears at most once. Merged character sets are intersected bin by bin since a
    /// value must satisfy every comparison on the path.
    pub fn reduce(&mut self) {
        self.nodes.sort_by_key(|node| node.feature);

        let mut reduced: Vec<ChainNode> = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.drain(..) {
            match reduced.last_mut() {
                Some(last) if last.feature == node.feature => last.merge(node),
                _ => reduced.push(node),
            }
        }
        self.nodes = reduced;
    }

    pub fn node(&self, feature: usize) -> Option<&ChainNode> {
        self.nodes.iter().find(|node| node.feature == feature)
    }

    /// Whether `row` follows this path, evaluated on the raw feature values.
    pub fn follows(&self, row: &[f64]) -> bool {
        self.nodes
            .iter()
            .all(|node| row.get(node.feature).is_some_and(|value| node.bounds.contains(*value)))
    }

    /// Whether the symbols `row` encodes to are accepted by every node, which is what
    /// the automaton evaluates.
    pub fn accepts(&self, table: &FeatureTable, row: &[f64]) -> Result<bool> {
        for node in &self.nodes {
            let Some(value) = row.get(node.feature) else {
                return Ok(false);
            };
            let symbols = table.symbols(node.feature, *value)?;
            let accepted = symbols
                .iter()
                .zip(&node.character_sets)
                .all(|((_, symbol), set)| set.contains(symbol));
            if !accepted {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Splits a tree into one chain per leaf, leftmost leaf first, and registers every
/// split threshold it meets. Each branch extends its own copy of the path.
pub fn decompose(tree: &Tree, tree_id: usize) -> (Vec<Chain>, ThresholdRegistry) {
    let mut chains = Vec::new();
    let mut registry = ThresholdRegistry::new();
    let mut stack: Vec<(usize, Vec<ChainNode>)> = vec![(0, Vec::new())];

    while let Some((index, path)) = stack.pop() {
        match &tree.nodes()[index] {
            DecisionNode::Internal {
                feature,
                threshold,
                left,
                right,
            } => {
                registry.insert(*feature, *threshold);

                let mut right_path = path.clone();
                right_path.push(ChainNode::new(*feature, *threshold, Direction::Above));
                stack.push((*right, right_path));

                let mut left_path = path;
                left_path.push(ChainNode::new(*feature, *threshold, Direction::AtMost));
                stack.push((*left, left_path));
            }

            DecisionNode::Leaf { value } => chains.push(Chain {
                tree_id,
                chain_id: 0,
                nodes: path,
                value: *value,
            }),
        }
    }

    (chains, registry)
}

/// Numbers chains in the order they are given.
pub fn assign_chain_ids(chains: &mut [Chain]) {
    for (chain_id, chain) in chains.iter_mut().enumerate() {
        chain.chain_id = chain_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packer::PackConfig;

    fn split(feature: usize, threshold: f64, left: usize, right: usize) -> DecisionNode {
        DecisionNode::Internal {
            feature,
            threshold,
            left,
            right,
        }
    }

    fn leaf(class: usize) -> DecisionNode {
        DecisionNode::Leaf {
            value: LeafValue::Class(class),
        }
    }

    //        f7 <= 5
    //       /       \
    //   f7 <= 2     leaf 2
    //   /     \
    // leaf 0  f1 <= 0.5
    //          /    \
    //      leaf 1  leaf 0
    fn tree() -> Tree {
        Tree::new(
            0,
            vec![
                split(7, 5.0, 1, 2),
                split(7, 2.0, 3, 4),
                leaf(2),
                leaf(0),
                split(1, 0.5, 5, 6),
                leaf(1),
                leaf(0),
            ],
            8,
        )
        .unwrap()
    }

    #[test]
    fn decompose_walks_leftmost_first() {
        let (chains, registry) = decompose(&tree(), 4);

        let values: Vec<LeafValue> = chains.iter().map(|chain| chain.value).collect();
        assert_eq!(
            values,
            vec![
                LeafValue::Class(0),
                LeafValue::Class(1),
                LeafValue::Class(0),
                LeafValue::Class(2)
            ]
        );
        assert!(chains.iter().all(|chain| chain.tree_id == 4));

        let second: Vec<(usize, Direction)> = chains[1]
            .nodes
            .iter()
            .map(|node| (node.feature, node.comparison.direction))
            .collect();
        assert_eq!(
            second,
            vec![(7, Direction::AtMost), (7, Direction::Above), (1, Direction::AtMost)]
        );

        assert_eq!(registry.thresholds(7), Some(&[2.0, 5.0][..]));
        assert_eq!(registry.thresholds(1), Some(&[0.5][..]));
    }

    #[test]
    fn single_leaf_tree_has_one_empty_chain() {
        let tree = Tree::new(0, vec![leaf(3)], 1).unwrap();
        let (chains, registry) = decompose(&tree, 0);
        assert_eq!(chains.len(), 1);
        assert!(chains[0].nodes.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn reduce_intersects_same_feature() {
        let (mut chains, registry) = decompose(&tree(), 0);
        let table = FeatureTable::pack(&registry, &PackConfig::default()).unwrap();
        for chain in chains.iter_mut() {
            chain.derive_character_sets(&table).unwrap();
            chain.reduce();
        }

        // 2 < f7 <= 5, f1 <= 0.5
        let chain = &chains[1];
        assert_eq!(
            chain.nodes.iter().map(|node| node.feature).collect::<Vec<_>>(),
            vec![1, 7]
        );

        let node = chain.node(7).unwrap();
        assert_eq!(node.bounds, Bounds { above: Some(2.0), at_most: Some(5.0) });

        let segment = table.segments(7).unwrap()[0];
        let expected: CharacterSet = [segment.start as u8 + 1].into_iter().collect();
        assert_eq!(node.character_sets, vec![expected]);

        for value in [1.0, 2.0, 3.0, 5.0, 6.0] {
            let row = [0.0, 0.25, 0.0, 0.0, 0.0, 0.0, 0.0, value];
            assert_eq!(chain.accepts(&table, &row).unwrap(), chain.follows(&row));
            assert_eq!(chain.follows(&row), value > 2.0 && value <= 5.0);
        }
    }

    #[test]
    fn every_row_follows_exactly_one_chain() {
        let (mut chains, registry) = decompose(&tree(), 0);
        let table = FeatureTable::pack(&registry, &PackConfig::default()).unwrap();
        for chain in chains.iter_mut() {
            chain.derive_character_sets(&table).unwrap();
            chain.reduce();
        }

        for f1 in [0.0, 0.5, 1.0] {
            for f7 in [0.0, 2.0, 4.0, 5.0, 9.0] {
                let row = [0.0, f1, 0.0, 0.0, 0.0, 0.0, 0.0, f7];
                let accepting = chains
                    .iter()
                    .filter(|chain| chain.accepts(&table, &row).unwrap())
                    .count();
                assert_eq!(accepting, 1, "row {row:?}");
            }
        }
    }

    #[test]
    fn chain_ids_follow_discovery_order() {
        let (mut chains, _) = decompose(&tree(), 0);
        assign_chain_ids(&mut chains);
        let ids: Vec<usize> = chains.iter().map(|chain| chain.chain_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }
}
