//! Converts decision-tree ensembles into chains of per-bin symbol classes and a
//! bin-packed feature table, ready for automaton-network generation.
pub mod bundle;
pub mod catboost;
pub mod chain;
pub mod charset;
pub mod error;
pub mod model;
pub mod network;
pub mod packer;
pub mod registry;
pub mod sklearn;
pub mod stream;
pub mod table;
pub mod treelite;
pub mod values;

#[cfg(feature = "python")]
mod bindings;

use log::{debug, info};
use rayon::prelude::*;

pub use bundle::Bundle;
pub use chain::{Chain, ChainNode, Comparison, Direction};
pub use error::{ConvertError, Result};
pub use model::{DecisionNode, Forest, LeafValue, Tree};
pub use network::Network;
pub use packer::PackConfig;
pub use registry::ThresholdRegistry;
pub use table::{FeatureTable, Slot, BIN_CAPACITY};
pub use values::ValueMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    pub pack: PackConfig,
}

/// Runs the whole pipeline: decompose every tree, pack the registered thresholds, then
/// derive and reduce the character sets of every chain.
pub fn convert(forest: &Forest, options: &ConvertOptions) -> Result<Bundle> {
    let decomposed: Vec<(Vec<Chain>, ThresholdRegistry)> = forest
        .trees
        .par_iter()
        .enumerate()
        .map(|(tree_id, tree)| chain::decompose(tree, tree_id))
        .collect();

    let mut chains = Vec::new();
    let mut registry = ThresholdRegistry::new();
    for (tree_chains, tree_registry) in decomposed {
        chains.extend(tree_chains);
        registry.merge(tree_registry);
    }
    chain::assign_chain_ids(&mut chains);

    info!(
        "decomposed {} trees into {} chains over {} features ({} thresholds)",
        forest.trees.len(),
        chains.len(),
        registry.num_features(),
        registry.num_thresholds()
    );

    let table = FeatureTable::pack(&registry, &options.pack)?;

    chains.par_iter_mut().try_for_each(|chain| {
        chain.derive_character_sets(&table)?;
        chain.reduce();
        Ok::<_, ConvertError>(())
    })?;

    let values = ValueMap::from_chains(&chains);
    debug!("{} distinct leaf values", values.len());

    Ok(Bundle {
        chains,
        table,
        values,
    })
}
