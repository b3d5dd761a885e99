// Label `i` of a bin is slot `i`. A feature fitting in one bin is laid out as
// `[t.., END_OF_FEATURE]`; a split feature as `[t.., DONT_CARE]` in every bin but the
// last, which holds `[t.., END_OF_FEATURE, DONT_CARE]`.
use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};
use crate::packer::{self, PackConfig};
use crate::registry::ThresholdRegistry;

/// Usable thresholds per bin in an 8-bit alphabet.
pub const BIN_CAPACITY: usize = 254;
/// Reserved symbol that starts and ends every row of the input stream.
pub const DELIMITER: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    Threshold(f64),
    /// The value is above every threshold of the feature.
    EndOfFeature,
    /// The answer for this feature comes from another bin.
    DontCare,
}

/// Labels `start..end` of `bin`, including the trailing control labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub bin: usize,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn labels(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The last label of the segment, which is the `DONT_CARE` label of split features.
    pub fn last(&self) -> usize {
        self.end - 1
    }
}

/// Contiguous run of bins that the input stream walks cyclically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub start: usize,
    /// Last bin holding the largest number of features; the final pass stops here.
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    capacity: usize,
    thresholds: ThresholdRegistry,
    bins: Vec<Vec<Slot>>,
    segments: BTreeMap<usize, Vec<Segment>>,
    loop_region: Option<LoopRegion>,
}

pub(crate) fn label(index: usize) -> u8 {
    debug_assert!(index < DELIMITER as usize, "label {index} collides with the delimiter");
    index as u8
}

impl FeatureTable {
    pub fn pack(thresholds: &ThresholdRegistry, config: &PackConfig) -> Result<Self> {
        packer::pack(thresholds, config)
    }

    pub(crate) fn empty(capacity: usize, thresholds: ThresholdRegistry) -> Self {
        Self {
            capacity,
            thresholds,
            bins: Vec::new(),
            segments: BTreeMap::new(),
            loop_region: None,
        }
    }

    pub(crate) fn push_bin(&mut self, slots: Vec<Slot>) -> usize {
        self.bins.push(slots);
        self.bins.len() - 1
    }

    pub(crate) fn add_segment(&mut self, feature: usize, segment: Segment) {
        self.segments.entry(feature).or_default().push(segment);
    }

    pub(crate) fn set_loop_region(&mut self, region: Option<LoopRegion>) {
        self.loop_region = region;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn thresholds(&self) -> &ThresholdRegistry {
        &self.thresholds
    }

    pub fn bins(&self) -> &[Vec<Slot>] {
        &self.bins
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.loop_region
    }

    pub fn slot(&self, bin: usize, label: usize) -> Option<Slot> {
        self.bins.get(bin)?.get(label).copied()
    }

    pub fn features(&self) -> impl Iterator<Item = usize> + '_ {
        self.segments.keys().copied()
    }

    /// Segments of `feature` in ascending threshold order.
    pub fn segments(&self, feature: usize) -> Result<&[Segment]> {
        self.segments
            .get(&feature)
            .map(Vec::as_slice)
            .ok_or(ConvertError::UnknownFeature(feature))
    }

    /// Features stored in `bin`, in label order.
    pub fn bin_features(&self, bin: usize) -> Vec<usize> {
        let mut found: Vec<(usize, usize)> = self
            .segments
            .iter()
            .flat_map(|(feature, segments)| {
                segments
                    .iter()
                    .filter(move |segment| segment.bin == bin)
                    .map(move |segment| (segment.start, *feature))
            })
            .collect();
        found.sort_unstable();
        found.into_iter().map(|(_, feature)| feature).collect()
    }

    /// The order in which features are streamed for every row: features of the
    /// bins before the loop once each, then a round-robin walk over the loop bins
    /// taking one feature per bin per pass.
    pub fn stream_order(&self) -> Vec<usize> {
        let loop_start = self
            .loop_region
            .map_or(self.bins.len(), |region| region.start);

        let mut order: Vec<usize> = Vec::new();
        for bin in 0..loop_start {
            for feature in self.bin_features(bin) {
                if order.last() != Some(&feature) {
                    order.push(feature);
                }
            }
        }

        let mut queues: Vec<VecDeque<usize>> = (loop_start..self.bins.len())
            .map(|bin| self.bin_features(bin).into())
            .collect();
        if queues.is_empty() {
            return order;
        }

        'passes: loop {
            for queue in queues.iter_mut() {
                match queue.pop_front() {
                    Some(feature) => order.push(feature),
                    None => break 'passes,
                }
            }
        }

        order
    }

    /// The `(bin, label)` pairs a value of `feature` is encoded to, one per segment.
    /// Bins other than the one holding the first threshold `>= value` yield `DONT_CARE`.
    pub fn symbols(&self, feature: usize, value: f64) -> Result<Vec<(usize, u8)>> {
        let segments = self.segments(feature)?;
        let mut symbols = Vec::with_capacity(segments.len());
        let mut found = false;

        for segment in segments {
            if found {
                symbols.push((segment.bin, label(segment.last())));
                continue;
            }

            let bin = &self.bins[segment.bin];
            for index in segment.labels() {
                match bin[index] {
                    Slot::Threshold(threshold) if value <= threshold => {
                        found = true;
                    }
                    Slot::Threshold(_) => continue,
                    Slot::EndOfFeature => found = true,
                    Slot::DontCare => {}
                }
                symbols.push((segment.bin, label(index)));
                break;
            }
        }

        Ok(symbols)
    }

    pub fn reconstruct(&self, feature: usize) -> Result<Vec<f64>> {
        let mut thresholds = Vec::new();
        for segment in self.segments(feature)? {
            let bin = self
                .bins
                .get(segment.bin)
                .ok_or_else(|| mismatch(feature, format!("bin {} does not exist", segment.bin)))?;
            let slots = bin.get(segment.labels()).ok_or_else(|| {
                mismatch(feature, format!("segment {segment:?} exceeds its bin"))
            })?;
            thresholds.extend(slots.iter().filter_map(|slot| match slot {
                Slot::Threshold(threshold) => Some(*threshold),
                _ => None,
            }));
        }
        Ok(thresholds)
    }

    /// Checks every invariant of a packed table. A failure is always a packing bug.
    pub fn verify(&self) -> Result<()> {
        if !(2..=BIN_CAPACITY).contains(&self.capacity) {
            return Err(ConvertError::InvalidCapacity(self.capacity));
        }

        for (bin, slots) in self.bins.iter().enumerate() {
            if slots.is_empty() || slots.len() > self.capacity + 1 {
                return Err(ConvertError::VerificationMismatch {
                    feature: self.bin_features(bin).first().copied().unwrap_or_default(),
                    detail: format!(
                        "bin {bin} has {} slots, expected 1..={}",
                        slots.len(),
                        self.capacity + 1
                    ),
                });
            }
        }

        let mut covered: Vec<Vec<Range<usize>>> = vec![Vec::new(); self.bins.len()];

        for (feature, thresholds) in self.thresholds.iter() {
            let segments = self.segments(feature).map_err(|_| {
                mismatch(feature, "registered feature has no segments".to_string())
            })?;
            if segments.is_empty() {
                return Err(mismatch(feature, "registered feature has no segments".to_string()));
            }

            let mut span = 0;
            for (i, segment) in segments.iter().enumerate() {
                if segment.bin >= self.bins.len() || segment.end > self.bins[segment.bin].len() {
                    return Err(mismatch(feature, format!("segment {segment:?} exceeds its bin")));
                }

                let controls: &[Slot] = match (segments.len(), i + 1 == segments.len()) {
                    (1, _) => &[Slot::EndOfFeature],
                    (_, false) => &[Slot::DontCare],
                    (_, true) => &[Slot::EndOfFeature, Slot::DontCare],
                };
                if segment.len() <= controls.len() {
                    return Err(mismatch(feature, format!("segment {segment:?} holds no thresholds")));
                }

                let slots = &self.bins[segment.bin][segment.labels()];
                let (values, tail) = slots.split_at(slots.len() - controls.len());
                if tail != controls {
                    return Err(mismatch(
                        feature,
                        format!("segment {segment:?} ends with {tail:?}, expected {controls:?}"),
                    ));
                }
                if !values.iter().all(|slot| matches!(slot, Slot::Threshold(_))) {
                    return Err(mismatch(
                        feature,
                        format!("segment {segment:?} holds control labels before its end"),
                    ));
                }

                span += values.len();
                covered[segment.bin].push(segment.labels());
            }

            if span != thresholds.len() {
                return Err(mismatch(
                    feature,
                    format!("addresses {span} thresholds, registered {}", thresholds.len()),
                ));
            }

            let reconstructed = self.reconstruct(feature)?;
            if reconstructed != thresholds {
                return Err(mismatch(
                    feature,
                    format!("reconstructed {reconstructed:?}, registered {thresholds:?}"),
                ));
            }
        }

        for (bin, ranges) in covered.iter_mut().enumerate() {
            ranges.sort_by_key(|range| range.start);
            let mut next = 0;
            for range in ranges.iter() {
                if range.start != next {
                    return Err(ConvertError::VerificationMismatch {
                        feature: self.bin_features(bin).first().copied().unwrap_or_default(),
                        detail: format!("bin {bin} has a gap or overlap at label {next}"),
                    });
                }
                next = range.end;
            }
            if next != self.bins[bin].len() {
                return Err(ConvertError::VerificationMismatch {
                    feature: self.bin_features(bin).first().copied().unwrap_or_default(),
                    detail: format!("bin {bin} has unowned labels from {next}"),
                });
            }
        }

        if let Some(region) = self.loop_region {
            if region.start > region.end || region.end >= self.bins.len() {
                return Err(ConvertError::VerificationMismatch {
                    feature: 0,
                    detail: format!("loop region {region:?} is outside of {} bins", self.bins.len()),
                });
            }
        }

        Ok(())
    }
}

fn mismatch(feature: usize, detail: String) -> ConvertError {
    ConvertError::VerificationMismatch { feature, detail }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(features: &[(usize, &[f64])]) -> ThresholdRegistry {
        features
            .iter()
            .flat_map(|(feature, thresholds)| thresholds.iter().map(move |t| (*feature, *t)))
            .collect()
    }

    fn small_table() -> FeatureTable {
        let registry = registry(&[(1, &[1.0, 2.0, 3.0][..]), (2, &[10.0, 20.0][..])]);
        let mut table = FeatureTable::empty(BIN_CAPACITY, registry);
        let bin = table.push_bin(vec![
            Slot::Threshold(1.0),
            Slot::Threshold(2.0),
            Slot::Threshold(3.0),
            Slot::EndOfFeature,
            Slot::Threshold(10.0),
            Slot::Threshold(20.0),
            Slot::EndOfFeature,
        ]);
        table.add_segment(1, Segment { bin, start: 0, end: 4 });
        table.add_segment(2, Segment { bin, start: 4, end: 7 });
        table
    }

    fn split_table() -> FeatureTable {
        let registry = registry(&[(0, &[1.0, 2.0, 3.0][..])]);
        let mut table = FeatureTable::empty(2, registry);
        let first = table.push_bin(vec![Slot::Threshold(1.0), Slot::Threshold(2.0), Slot::DontCare]);
        let last = table.push_bin(vec![Slot::Threshold(3.0), Slot::EndOfFeature, Slot::DontCare]);
        table.add_segment(0, Segment { bin: first, start: 0, end: 3 });
        table.add_segment(0, Segment { bin: last, start: 0, end: 3 });
        table
    }

    #[test]
    fn verify_accepts_consistent_tables() {
        small_table().verify().unwrap();
        split_table().verify().unwrap();
    }

    #[test]
    fn verify_rejects_missing_threshold() {
        let mut table = small_table();
        table.bins[0][1] = Slot::Threshold(2.5);
        let err = table.verify().unwrap_err();
        assert!(matches!(err, ConvertError::VerificationMismatch { feature: 1, .. }));
    }

    #[test]
    fn verify_rejects_unowned_labels() {
        let mut table = small_table();
        table.bins[0].push(Slot::DontCare);
        assert!(table.verify().is_err());
    }

    #[test]
    fn symbols_single_bin() {
        let table = small_table();
        assert_eq!(table.symbols(1, 0.0).unwrap(), vec![(0, 0)]);
        assert_eq!(table.symbols(1, 2.0).unwrap(), vec![(0, 1)]);
        assert_eq!(table.symbols(1, 2.5).unwrap(), vec![(0, 2)]);
        assert_eq!(table.symbols(1, 99.0).unwrap(), vec![(0, 3)]);
        assert_eq!(table.symbols(2, 15.0).unwrap(), vec![(0, 5)]);
        assert_eq!(table.symbols(2, 25.0).unwrap(), vec![(0, 6)]);
        assert!(matches!(table.symbols(9, 0.0), Err(ConvertError::UnknownFeature(9))));
    }

    #[test]
    fn symbols_split_feature() {
        let table = split_table();
        assert_eq!(table.symbols(0, 1.5).unwrap(), vec![(0, 1), (1, 2)]);
        assert_eq!(table.symbols(0, 3.0).unwrap(), vec![(0, 2), (1, 0)]);
        assert_eq!(table.symbols(0, 7.0).unwrap(), vec![(0, 2), (1, 1)]);
    }

    #[test]
    fn bin_features_follow_label_order() {
        let table = small_table();
        assert_eq!(table.bin_features(0), vec![1, 2]);
        assert_eq!(table.reconstruct(2).unwrap(), vec![10.0, 20.0]);
    }

    #[test]
    fn stream_order_walks_loop_round_robin() {
        let registry: ThresholdRegistry = (0..6).map(|feature| (feature, 1.0)).collect();
        let mut table = FeatureTable::empty(BIN_CAPACITY, registry);

        let dedicated = table.push_bin(vec![Slot::Threshold(1.0), Slot::EndOfFeature]);
        table.add_segment(5, Segment { bin: dedicated, start: 0, end: 2 });

        for features in [vec![0, 3], vec![1, 4], vec![2]] {
            let mut slots = Vec::new();
            let bin = table.bins.len();
            for feature in features {
                table.add_segment(feature, Segment { bin, start: slots.len(), end: slots.len() + 2 });
                slots.extend([Slot::Threshold(1.0), Slot::EndOfFeature]);
            }
            table.push_bin(slots);
        }
        table.set_loop_region(Some(LoopRegion { start: 1, end: 2 }));

        table.verify().unwrap();
        assert_eq!(table.stream_order(), vec![5, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn stream_order_without_loop() {
        assert_eq!(split_table().stream_order(), vec![0]);

        let registry: ThresholdRegistry = [(4, 1.0), (7, 2.0)].into_iter().collect();
        let mut table = FeatureTable::empty(BIN_CAPACITY, registry);
        for (feature, threshold) in [(7, 2.0), (4, 1.0)] {
            let bin = table.push_bin(vec![Slot::Threshold(threshold), Slot::EndOfFeature]);
            table.add_segment(feature, Segment { bin, start: 0, end: 2 });
        }
        table.verify().unwrap();
        assert_eq!(table.loop_region(), None);
        assert_eq!(table.stream_order(), vec![7, 4]);

        let empty = FeatureTable::empty(BIN_CAPACITY, ThresholdRegistry::new());
        assert!(empty.stream_order().is_empty());
    }

    #[test]
    fn verify_rejects_capacity_beyond_a_byte() {
        let table = FeatureTable::empty(300, ThresholdRegistry::new());
        assert!(matches!(table.verify(), Err(ConvertError::InvalidCapacity(300))));

        let table = FeatureTable::empty(1, ThresholdRegistry::new());
        assert!(matches!(table.verify(), Err(ConvertError::InvalidCapacity(1))));
    }
}
