use forestap::{
    ConvertOptions, DecisionNode, FeatureTable, Forest, LeafValue, PackConfig, ThresholdRegistry,
    Tree,
};
use proptest::prelude::*;

fn registry(features: &[(usize, usize)]) -> ThresholdRegistry {
    features
        .iter()
        .flat_map(|&(feature, count)| (0..count).map(move |t| (feature, t as f64 * 0.5 - 3.0)))
        .collect()
}

fn features() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0usize..40, 1usize..600), 1..30)
}

// Complete tree in heap order: node i splits into 2i + 1 and 2i + 2.
fn complete_tree(splits: &[(usize, usize)], depth: u32) -> Tree {
    let internal = (1usize << depth) - 1;
    let leaves = 1usize << depth;
    let mut nodes = Vec::with_capacity(internal + leaves);
    for (i, &(feature, threshold)) in splits.iter().take(internal).enumerate() {
        nodes.push(DecisionNode::Internal {
            feature,
            threshold: threshold as f64,
            left: 2 * i + 1,
            right: 2 * i + 2,
        });
    }
    for leaf in 0..leaves {
        nodes.push(DecisionNode::Leaf {
            value: LeafValue::Class(leaf % 3),
        });
    }
    Tree::new(0, nodes, 4).unwrap()
}

fn predict(tree: &Tree, row: &[f64]) -> LeafValue {
    let mut node = tree.root();
    loop {
        match node {
            DecisionNode::Internal {
                feature,
                threshold,
                left,
                right,
            } => {
                let next = if row[*feature] <= *threshold {
                    left
                } else {
                    right
                };
                node = &tree.nodes()[*next];
            }
            DecisionNode::Leaf { value } => return *value,
        }
    }
}

fn forests() -> impl Strategy<Value = Forest> {
    prop::collection::vec(
        (1u32..5).prop_flat_map(|depth| {
            prop::collection::vec((0usize..4, 0usize..8), (1usize << depth) - 1)
                .prop_map(move |splits| complete_tree(&splits, depth))
        }),
        1..6,
    )
    .prop_map(|trees| Forest {
        num_feature: 4,
        trees,
    })
}

proptest! {
    #[test]
    fn packing_reconstructs_every_feature(features in features(), capacity in 2usize..=254) {
        let registry = registry(&features);
        let config = PackConfig::new(capacity, 256).unwrap();
        let table = FeatureTable::pack(&registry, &config).unwrap();

        for (feature, thresholds) in registry.iter() {
            prop_assert_eq!(table.reconstruct(feature).unwrap(), thresholds.to_vec());
        }
        for bin in table.bins() {
            let occupied = bin
                .iter()
                .filter(|slot| matches!(slot, forestap::Slot::Threshold(_)))
                .count();
            prop_assert!(occupied <= capacity);
            prop_assert!(bin.len() <= capacity + 1);
        }
    }

    #[test]
    fn packing_is_deterministic(features in features(), capacity in 2usize..=254) {
        let registry = registry(&features);
        let config = PackConfig::new(capacity, 256).unwrap();
        let first = FeatureTable::pack(&registry, &config).unwrap();
        let second = FeatureTable::pack(&registry.clone(), &config).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn loop_bins_are_balanced(features in features()) {
        let table = FeatureTable::pack(&registry(&features), &PackConfig::default()).unwrap();
        if let Some(region) = table.loop_region() {
            prop_assert!(region.start <= region.end);
            let counts: Vec<usize> = (region.start..table.num_bins())
                .map(|bin| table.bin_features(bin).len())
                .collect();
            let most = counts.iter().copied().max().unwrap_or(0);
            let least = counts.iter().copied().min().unwrap_or(0);
            prop_assert!(most - least <= 1, "feature counts {:?}", counts);
        }
    }

    #[test]
    fn chains_match_tree_predictions(
        forest in forests(),
        rows in prop::collection::vec(prop::collection::vec(-1.0f64..9.0, 4), 1..16),
        capacity in 2usize..=8,
    ) {
        let options = ConvertOptions { pack: PackConfig::new(capacity, 256).unwrap() };
        let bundle = forestap::convert(&forest, &options).unwrap();

        for chain in &bundle.chains {
            let features: Vec<usize> = chain.nodes.iter().map(|node| node.feature).collect();
            prop_assert!(features.windows(2).all(|pair| pair[0] < pair[1]));
        }

        for row in &rows {
            for (tree_id, tree) in forest.trees.iter().enumerate() {
                let mut accepting = bundle
                    .chains
                    .iter()
                    .filter(|chain| chain.tree_id == tree_id)
                    .filter(|chain| chain.accepts(&bundle.table, row).unwrap());
                let chain = accepting.next();
                prop_assert!(chain.is_some());
                prop_assert!(accepting.next().is_none());
                prop_assert_eq!(chain.map(|chain| chain.value), Some(predict(tree, row)));
            }
        }
    }
}
