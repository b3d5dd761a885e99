//! Packs per-feature threshold lists into fixed-capacity bins.
//!
//! Features with at least `capacity` thresholds get bins of their own, split across as
//! many consecutive bins as needed. The remaining small features are spread over the
//! fewest bins that fit, balanced so that every shared bin holds the same number of
//! features give or take one, because the input stream advances one feature per bin
//! on every pass through the loop.
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};
use crate::registry::ThresholdRegistry;
use crate::table::{FeatureTable, LoopRegion, Segment, Slot, BIN_CAPACITY};

pub const DEFAULT_MAX_BIN_INCREMENTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackConfig {
    capacity: usize,
    max_bin_increments: usize,
}

impl PackConfig {
    /// `capacity` is the number of thresholds a bin may hold and must leave room for
    /// the delimiter symbol; `max_bin_increments` bounds how many times small-feature
    /// packing may retry with one more bin.
    pub fn new(capacity: usize, max_bin_increments: usize) -> Result<Self> {
        if !(2..=BIN_CAPACITY).contains(&capacity) {
            return Err(ConvertError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            max_bin_increments,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_bin_increments(&self) -> usize {
        self.max_bin_increments
    }
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            capacity: BIN_CAPACITY,
            max_bin_increments: DEFAULT_MAX_BIN_INCREMENTS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Item {
    feature: usize,
    count: usize,
    // position in the packing order, used to keep redistribution deterministic
    rank: usize,
}

impl Item {
    // thresholds plus the END_OF_FEATURE label
    fn footprint(&self) -> usize {
        self.count + 1
    }
}

#[derive(Debug, Clone, Default)]
struct Group {
    size: usize,
    items: Vec<Item>,
}

pub fn pack(thresholds: &ThresholdRegistry, config: &PackConfig) -> Result<FeatureTable> {
    let capacity = config.capacity;
    let mut table = FeatureTable::empty(capacity, thresholds.clone());

    // descending by threshold count; the sort is stable so ties keep ascending feature ids
    let mut order: Vec<(usize, &[f64])> = thresholds.iter().collect();
    order.sort_by_key(|(_, values)| Reverse(values.len()));

    let mut small = Vec::new();
    for (feature, values) in order {
        if values.len() >= capacity {
            pack_big_feature(&mut table, feature, values, capacity)?;
        } else {
            small.push(Item {
                feature,
                count: values.len(),
                rank: small.len(),
            });
        }
    }

    if table.num_bins() > 0 {
        info!(
            "{} bins hold features with at least {capacity} thresholds",
            table.num_bins()
        );
    }

    pack_small_features(&mut table, small, config)?;

    info!(
        "packed {} features into {} bins, loop region {:?}",
        thresholds.num_features(),
        table.num_bins(),
        table.loop_region()
    );

    table.verify()?;
    Ok(table)
}

fn pack_big_feature(
    table: &mut FeatureTable,
    feature: usize,
    values: &[f64],
    capacity: usize,
) -> Result<()> {
    if values.len() == capacity {
        debug!("feature {feature} fills exactly one bin");
        place_group(table, &[feature])?;
        return Ok(());
    }

    let mut rest = values;
    let mut bins = 0;

    // The last bin carries both END_OF_FEATURE and DONT_CARE, so it keeps at most
    // capacity - 1 thresholds or its labels would reach the delimiter. A remainder of
    // exactly capacity therefore costs one bin more than ceil(count / capacity).
    while rest.len() >= capacity {
        let take = if rest.len() == capacity {
            capacity - 1
        } else {
            capacity
        };
        let (head, tail) = rest.split_at(take);
        let mut slots: Vec<Slot> = head.iter().copied().map(Slot::Threshold).collect();
        slots.push(Slot::DontCare);
        push_segment(table, feature, slots);
        bins += 1;
        rest = tail;
    }

    if rest.is_empty() {
        return Err(ConvertError::CapacityExhausted {
            feature,
            thresholds: values.len(),
            capacity,
        });
    }

    let mut slots: Vec<Slot> = rest.iter().copied().map(Slot::Threshold).collect();
    slots.push(Slot::EndOfFeature);
    slots.push(Slot::DontCare);
    push_segment(table, feature, slots);
    bins += 1;

    debug!(
        "feature {feature} with {} thresholds split across {bins} bins",
        values.len()
    );
    Ok(())
}

fn push_segment(table: &mut FeatureTable, feature: usize, slots: Vec<Slot>) {
    let end = slots.len();
    let bin = table.push_bin(slots);
    table.add_segment(feature, Segment { bin, start: 0, end });
}

fn place_group(table: &mut FeatureTable, features: &[usize]) -> Result<usize> {
    let bin = table.num_bins();
    let mut slots = Vec::new();
    let mut segments = Vec::with_capacity(features.len());

    for &feature in features {
        let values = table
            .thresholds()
            .thresholds(feature)
            .ok_or(ConvertError::UnknownFeature(feature))?;
        let start = slots.len();
        slots.extend(values.iter().copied().map(Slot::Threshold));
        slots.push(Slot::EndOfFeature);
        segments.push((
            feature,
            Segment {
                bin,
                start,
                end: slots.len(),
            },
        ));
    }

    table.push_bin(slots);
    for (feature, segment) in segments {
        table.add_segment(feature, segment);
    }
    Ok(bin)
}

fn pack_small_features(
    table: &mut FeatureTable,
    mut pending: Vec<Item>,
    config: &PackConfig,
) -> Result<()> {
    let capacity = config.capacity;

    if let Some(item) = pending.iter().find(|item| item.footprint() > capacity) {
        return Err(ConvertError::CapacityExhausted {
            feature: item.feature,
            thresholds: item.count,
            capacity,
        });
    }
    if pending.is_empty() {
        return Ok(());
    }

    let total: usize = pending.iter().map(Item::footprint).sum();
    let mut bins = total.div_ceil(capacity).max(1);
    let mut increments = 0;
    let mut attempt = 0;

    info!(
        "{} small features need {total} labels, at least {bins} bins",
        pending.len()
    );

    loop {
        attempt += 1;
        debug!(
            "attempt {attempt}: {} features into {bins} bins",
            pending.len()
        );

        let mut groups = fill_emptiest(&pending, bins);

        // a feature alone in its bin gains nothing from the loop, give it a dedicated bin
        let singles: Vec<usize> = groups
            .iter()
            .filter(|group| group.items.len() == 1)
            .map(|group| group.items[0].feature)
            .collect();
        if !singles.is_empty() {
            for &feature in &singles {
                let bin = place_group(table, &[feature])?;
                debug!("feature {feature} takes dedicated bin {bin}");
            }
            pending.retain(|item| !singles.contains(&item.feature));
            // retries are bounded per stretch without progress
            increments = 0;
            if pending.is_empty() {
                return Ok(());
            }
            bins = bins.saturating_sub(singles.len()).max(1);
            continue;
        }

        let fullest = groups.iter().map(|group| group.size).max().unwrap_or(0);
        if fullest > capacity {
            debug!("fullest bin needs {fullest} labels, over capacity {capacity}");
            bins = one_more_bin(bins, &mut increments, config)?;
            continue;
        }

        if spread(&groups) > 1 {
            debug!("bins are unbalanced, redistributing surplus features");
            match balance(groups, capacity) {
                Some(balanced) if spread(&balanced) <= 1 => groups = balanced,
                _ => {
                    debug!("balancing over {bins} bins failed");
                    bins = one_more_bin(bins, &mut increments, config)?;
                    continue;
                }
            }
        }

        place_loop(table, groups)?;
        return Ok(());
    }
}

fn one_more_bin(bins: usize, increments: &mut usize, config: &PackConfig) -> Result<usize> {
    *increments += 1;
    if *increments > config.max_bin_increments {
        return Err(ConvertError::BalanceNotConverged {
            attempts: *increments,
            bins,
        });
    }
    Ok(bins + 1)
}

// largest first into the emptiest bin, ties to the lowest index
fn fill_emptiest(items: &[Item], bins: usize) -> Vec<Group> {
    let mut groups = vec![Group::default(); bins];
    let mut heap: BinaryHeap<Reverse<(usize, usize)>> =
        (0..bins).map(|index| Reverse((0, index))).collect();

    for item in items {
        if let Some(Reverse((size, index))) = heap.pop() {
            let group = &mut groups[index];
            group.items.push(*item);
            group.size = size + item.footprint();
            heap.push(Reverse((group.size, index)));
        }
    }

    groups.retain(|group| !group.items.is_empty());
    groups
}

fn spread(groups: &[Group]) -> usize {
    let counts = groups.iter().map(|group| group.items.len());
    let most = counts.clone().max().unwrap_or(0);
    let least = counts.min().unwrap_or(0);
    most - least
}

fn balance(mut groups: Vec<Group>, capacity: usize) -> Option<Vec<Group>> {
    let least = groups.iter().map(|group| group.items.len()).min()?;

    let mut surplus = Vec::new();
    for group in groups.iter_mut() {
        // items were assigned largest first, so the tail holds the smallest ones
        while group.items.len() > least {
            let item = group.items.pop()?;
            group.size -= item.footprint();
            surplus.push(item);
        }
    }
    surplus.sort_by_key(|item| item.rank);

    let mut heap: BinaryHeap<Reverse<(usize, usize)>> = groups
        .iter()
        .enumerate()
        .map(|(index, group)| Reverse((group.size, index)))
        .collect();
    let mut dealt = Vec::new();

    for item in surplus {
        if heap.is_empty() {
            heap.extend(dealt.drain(..));
        }
        let Reverse((size, index)) = heap.pop()?;
        let size = size + item.footprint();
        if size > capacity {
            return None;
        }
        groups[index].items.push(item);
        groups[index].size = size;
        dealt.push(Reverse((size, index)));
    }

    Some(groups)
}

fn place_loop(table: &mut FeatureTable, mut groups: Vec<Group>) -> Result<()> {
    groups.sort_by_key(|group| Reverse(group.items.len()));

    let most = groups.first().map_or(0, |group| group.items.len());
    let mut start = None;
    let mut end = None;

    for group in &groups {
        let features: Vec<usize> = group.items.iter().map(|item| item.feature).collect();
        let bin = place_group(table, &features)?;
        debug!(
            "bin {bin}: {} labels, features {features:?}",
            group.size
        );
        start.get_or_insert(bin);
        if group.items.len() == most {
            end = Some(bin);
        }
    }

    let region = match (start, end) {
        (Some(start), Some(end)) => Some(LoopRegion { start, end }),
        _ => None,
    };
    table.set_loop_region(region);
    Ok(())
}
