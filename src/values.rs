use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::model::LeafValue;

/// Distinct leaf values in ascending order. A value's report code is its position
/// plus one, so no chain ever reports `0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueMap {
    values: Vec<LeafValue>,
}

impl ValueMap {
    pub fn from_chains(chains: &[Chain]) -> Self {
        chains.iter().map(|chain| chain.value).collect()
    }

    pub fn report_code(&self, value: &LeafValue) -> Option<u32> {
        self.values
            .binary_search(value)
            .ok()
            .and_then(|index| u32::try_from(index + 1).ok())
    }

    /// The leaf value behind a report code.
    pub fn value(&self, report_code: u32) -> Option<LeafValue> {
        let index = usize::try_from(report_code).ok()?.checked_sub(1)?;
        self.values.get(index).copied()
    }

    pub fn values(&self) -> &[LeafValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<LeafValue> for ValueMap {
    fn from_iter<I: IntoIterator<Item = LeafValue>>(iter: I) -> Self {
        let mut values: Vec<LeafValue> = iter.into_iter().collect();
        values.sort_unstable();
        values.dedup();
        Self { values }
    }
}
