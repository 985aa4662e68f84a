/// Near-duplicate removal strategies
///
/// A strategy walks a tracker's items and merges any later item whose delta
/// from an earlier one is within the threshold. Merging is pairwise: the
/// earlier item absorbs each close later item in turn, and the absorbed item
/// is dropped. Scans repeat until a full pass merges nothing, so running a
/// strategy on its own output changes nothing. Closeness is still not
/// transitive: a merge that moves no values can leave a neighbour's
/// neighbour standing.

use crate::tracker::item::TrackerItem;
use crate::tracker::similarity::{CompareFn, MergeFn};
use std::collections::HashMap;

/// Dissimilarity at or below which two items count as near-duplicates
pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.2;

/// Pluggable near-duplicate scan
pub trait DedupStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn dedup(
        &self,
        items: Vec<TrackerItem>,
        compare: &CompareFn,
        threshold: f64,
        merge: &MergeFn,
    ) -> Vec<TrackerItem>;
}

/// Compare every pair, O(n²). Fine for the small trackers a person builds up.
#[derive(Debug, Default, Clone, Copy)]
pub struct PairwiseScan;

impl DedupStrategy for PairwiseScan {
    fn name(&self) -> &str {
        "pairwise"
    }

    fn dedup(
        &self,
        items: Vec<TrackerItem>,
        compare: &CompareFn,
        threshold: f64,
        merge: &MergeFn,
    ) -> Vec<TrackerItem> {
        let mut slots: Vec<Option<TrackerItem>> = items.into_iter().map(Some).collect();
        let indices: Vec<usize> = (0..slots.len()).collect();
        while merge_within(&mut slots, &indices, compare, threshold, merge) {}
        slots.into_iter().flatten().collect()
    }
}

/// Only compare items that share the same value in a key column
///
/// Cuts the scan to the size of each bucket. Items in different buckets are
/// never merged, even if the compare function would call them close.
#[derive(Debug, Clone)]
pub struct KeyedBuckets {
    column: String,
}

impl KeyedBuckets {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl KeyedBuckets {
    fn buckets(&self, slots: &[Option<TrackerItem>]) -> HashMap<String, Vec<usize>> {
        let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, slot) in slots.iter().enumerate() {
            let Some(item) = slot else {
                continue;
            };
            let key = item
                .get(&self.column)
                .map(|v| v.encode().to_lowercase())
                .unwrap_or_default();
            buckets.entry(key).or_default().push(index);
        }
        buckets
    }
}

impl DedupStrategy for KeyedBuckets {
    fn name(&self) -> &str {
        "keyed"
    }

    fn dedup(
        &self,
        items: Vec<TrackerItem>,
        compare: &CompareFn,
        threshold: f64,
        merge: &MergeFn,
    ) -> Vec<TrackerItem> {
        let mut slots: Vec<Option<TrackerItem>> = items.into_iter().map(Some).collect();

        // A merge can rewrite the key column, so buckets are rebuilt until
        // one round merges nothing
        loop {
            let mut merged = false;
            for indices in self.buckets(&slots).values() {
                while merge_within(&mut slots, indices, compare, threshold, merge) {
                    merged = true;
                }
            }
            if !merged {
                break;
            }
        }

        // Survivors keep their original relative order
        slots.into_iter().flatten().collect()
    }
}

/// One pairwise pass over a subset of slots, `indices` in ascending order
///
/// Returns whether anything merged.
fn merge_within(
    slots: &mut [Option<TrackerItem>],
    indices: &[usize],
    compare: &CompareFn,
    threshold: f64,
    merge: &MergeFn,
) -> bool {
    let mut merged = false;
    for (pos, &i) in indices.iter().enumerate() {
        let Some(mut keep) = slots[i].take() else {
            continue;
        };

        for &j in &indices[pos + 1..] {
            if let Some(other) = slots[j].as_ref() {
                if compare(&keep, other) <= threshold {
                    keep = merge(&keep, other);
                    slots[j] = None;
                    merged = true;
                }
            }
        }

        slots[i] = Some(keep);
    }
    merged
}
