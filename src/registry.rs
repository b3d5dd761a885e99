use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Distinct split thresholds per feature, kept sorted ascending at all times.
///
/// Merging is a per-feature set union, so the result does not depend on the order in
/// which trees were decomposed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRegistry {
    features: BTreeMap<usize, Vec<f64>>,
}

impl ThresholdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: usize, threshold: f64) {
        // -0.0 and 0.0 compare equal, keep a single spelling
        let threshold = if threshold == 0.0 { 0.0 } else { threshold };
        let thresholds = self.features.entry(feature).or_default();
        if let Err(position) = thresholds.binary_search_by(|other| other.total_cmp(&threshold)) {
            thresholds.insert(position, threshold);
        }
    }

    pub fn merge(&mut self, other: ThresholdRegistry) {
        for (feature, thresholds) in other.features {
            if !self.features.contains_key(&feature) {
                self.features.insert(feature, thresholds);
                continue;
            }
            for threshold in thresholds {
                self.insert(feature, threshold);
            }
        }
    }

    pub fn thresholds(&self, feature: usize) -> Option<&[f64]> {
        self.features.get(&feature).map(Vec::as_slice)
    }

    /// Features in ascending id order with their sorted thresholds.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f64])> + '_ {
        self.features
            .iter()
            .map(|(feature, thresholds)| (*feature, thresholds.as_slice()))
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    pub fn num_thresholds(&self) -> usize {
        self.features.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FromIterator<(usize, f64)> for ThresholdRegistry {
    fn from_iter<I: IntoIterator<Item = (usize, f64)>>(iter: I) -> Self {
        let mut registry = Self::new();
        for (feature, threshold) in iter {
            registry.insert(feature, threshold);
        }
        registry
    }
}
