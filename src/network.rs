//! Hand-off to automaton-network generation.
//!
//! Every chain becomes one automaton: a start element matching the delimiter, one
//! element per bin matching its symbol class, and a report element. Elements are
//! wired in bin order with the loop region feeding back onto its start.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;
use crate::chain::Chain;
use crate::error::{ConvertError, Result};
use crate::table::{label, FeatureTable, LoopRegion, DELIMITER};
use crate::values::ValueMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub delimiter: u8,
    pub bins: usize,
    pub loop_region: Option<LoopRegion>,
    pub stream_order: Vec<usize>,
    pub chains: Vec<ChainPattern>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainPattern {
    pub tree_id: usize,
    pub chain_id: usize,
    pub report_code: u32,
    /// Sorted labels matched by the element of each bin.
    pub symbol_classes: Vec<Vec<u8>>,
}

impl Network {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn describe(bundle: &Bundle) -> Result<Network> {
    let table = &bundle.table;
    let chains = bundle
        .chains
        .iter()
        .map(|chain| pattern(chain, table, &bundle.values))
        .collect::<Result<Vec<_>>>()?;

    Ok(Network {
        delimiter: DELIMITER,
        bins: table.num_bins(),
        loop_region: table.loop_region(),
        stream_order: table.stream_order(),
        chains,
    })
}

/// Features the chain does not test accept their whole label range.
fn pattern(chain: &Chain, table: &FeatureTable, values: &ValueMap) -> Result<ChainPattern> {
    let mut classes: Vec<BTreeSet<u8>> = vec![BTreeSet::new(); table.num_bins()];

    for feature in table.features() {
        let segments = table.segments(feature)?;
        match chain.node(feature) {
            Some(node) => {
                for (segment, set) in segments.iter().zip(&node.character_sets) {
                    classes[segment.bin].extend(set);
                }
            }
            None => {
                for segment in segments {
                    classes[segment.bin].extend(segment.labels().map(label));
                }
            }
        }
    }

    let report_code = values
        .report_code(&chain.value)
        .ok_or_else(|| ConvertError::UnmappedValue(format!("{:?}", chain.value)))?;

    Ok(ChainPattern {
        tree_id: chain.tree_id,
        chain_id: chain.chain_id,
        report_code,
        symbol_classes: classes
            .into_iter()
            .map(|class| class.into_iter().collect())
            .collect(),
    })
}
