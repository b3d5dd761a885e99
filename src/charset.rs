//! Turns a threshold comparison into the labels it accepts in every bin of its feature.
//!
//! The sets agree with [`FeatureTable::symbols`]: a value satisfies the comparison
//! exactly when each of its per-bin labels is in the matching set.
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::chain::{Comparison, Direction};
use crate::error::{ConvertError, Result};
use crate::table::{label, FeatureTable, Slot};

/// Labels accepted within one bin.
pub type CharacterSet = BTreeSet<u8>;

/// One character set per segment of `feature`, in segment order.
pub fn derive(
    feature: usize,
    comparison: Comparison,
    table: &FeatureTable,
) -> Result<Vec<CharacterSet>> {
    let segments = table.segments(feature)?;

    let (boundary_segment, boundary_label) = segments
        .iter()
        .enumerate()
        .find_map(|(i, segment)| {
            segment
                .labels()
                .find(|&index| {
                    matches!(
                        table.slot(segment.bin, index),
                        Some(Slot::Threshold(t)) if t == comparison.threshold
                    )
                })
                .map(|index| (i, index))
        })
        .ok_or(ConvertError::ThresholdNotRegistered {
            feature,
            threshold: comparison.threshold,
        })?;

    let split = segments.len() > 1;

    let sets = segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let everything = || segment.labels().map(label).collect::<CharacterSet>();
            let dont_care = || CharacterSet::from([label(segment.last())]);

            match (comparison.direction, i.cmp(&boundary_segment)) {
                (Direction::AtMost, Ordering::Less) => everything(),
                (Direction::AtMost, Ordering::Equal) => {
                    let mut set: CharacterSet =
                        (segment.start..=boundary_label).map(label).collect();
                    if split {
                        set.insert(label(segment.last()));
                    }
                    set
                }
                (Direction::AtMost, Ordering::Greater) => dont_care(),
                (Direction::Above, Ordering::Less) => dont_care(),
                (Direction::Above, Ordering::Equal) => {
                    (boundary_label + 1..segment.end).map(label).collect()
                }
                (Direction::Above, Ordering::Greater) => everything(),
            }
        })
        .collect();

    Ok(sets)
}
