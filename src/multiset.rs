//! Identity-keyed multisets and the before/after delta algorithm.

use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use seahash::SeaHasher;

use crate::identity::IdentityKey;

type SeaHashBuildHasher = BuildHasherDefault<SeaHasher>;

/// An unordered bag of [`IdentityKey`] values with counts. Invariant: every
/// stored count is >= 1 (a zero count is represented by the key's absence).
#[derive(Clone, Debug, Default)]
pub struct Multiset {
    counts: IndexMap<IdentityKey, u32, SeaHashBuildHasher>,
}

impl Multiset {
    pub fn new() -> Self {
        Multiset {
            counts: IndexMap::with_hasher(SeaHashBuildHasher::default()),
        }
    }

    /// Builds a snapshot multiset from an iterator of element identities:
    /// a container's elements, or map entries wrapped as
    /// [`crate::identity::MapEntryKey`]-derived keys by the caller.
    pub fn from_elements<I: IntoIterator<Item = IdentityKey>>(elements: I) -> Self {
        let mut multiset = Multiset::new();
        for element in elements {
            multiset.add_one(element);
        }
        multiset
    }

    pub fn add_one(&mut self, key: IdentityKey) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    pub fn count_of(&self, key: &IdentityKey) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IdentityKey, &u32)> {
        self.counts.iter()
    }

    /// Total number of stored elements, counting duplicates.
    pub fn total(&self) -> u64 {
        self.counts.values().map(|&c| c as u64).sum()
    }
}

/// A single recorded change produced by [`delta`]: an element and whether
/// it was added (`true`) or removed (`false`).
#[derive(Clone, Debug)]
pub struct DeltaEntry {
    pub element: IdentityKey,
    pub is_addition: bool,
}

/// Computes the ordered add/remove records that transform `before` into
/// `after`. The result's cardinality equals the symmetric difference, and
/// all removals precede all additions.
///
/// Tie-break: removals are emitted in `before`'s iteration order (the
/// multiset they are disappearing from); additions are emitted in
/// `after`'s iteration order, matching the known-methods-table's rule that
/// within each half, the after multiset's iteration order is used.
pub fn delta(before: &Multiset, after: &Multiset) -> Vec<DeltaEntry> {
    let mut removals = Vec::new();
    for (key, &before_count) in before.iter() {
        let after_count = after.count_of(key);
        if after_count < before_count {
            for _ in 0..(before_count - after_count) {
                removals.push(DeltaEntry {
                    element: key.clone(),
                    is_addition: false,
                });
            }
        }
    }
    let mut additions = Vec::new();
    for (key, &after_count) in after.iter() {
        let before_count = before.count_of(key);
        if after_count > before_count {
            for _ in 0..(after_count - before_count) {
                additions.push(DeltaEntry {
                    element: key.clone(),
                    is_addition: true,
                });
            }
        }
    }
    removals.append(&mut additions);
    removals
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(n: i32) -> IdentityKey {
        IdentityKey::new(Arc::new(n))
    }

    #[test]
    fn delta_of_identical_snapshots_is_empty() {
        let a = key(1);
        let before = Multiset::from_elements(vec![a.clone()]);
        let after = Multiset::from_elements(vec![a]);
        assert!(delta(&before, &after).is_empty());
    }

    #[test]
    fn delta_orders_removals_before_additions() {
        let removed = key(1);
        let added = key(2);
        let before = Multiset::from_elements(vec![removed.clone()]);
        let after = Multiset::from_elements(vec![added.clone()]);
        let d = delta(&before, &after);
        assert_eq!(d.len(), 2);
        assert!(!d[0].is_addition);
        assert!(d[1].is_addition);
    }

    #[test]
    fn delta_cardinality_equals_symmetric_difference_with_duplicates() {
        let a = key(1);
        let b = key(2);
        let mut before = Multiset::new();
        before.add_one(a.clone());
        before.add_one(a.clone());
        let mut after = Multiset::new();
        after.add_one(a.clone());
        after.add_one(b.clone());
        let d = delta(&before, &after);
        // one fewer `a`, one more `b`
        assert_eq!(d.len(), 2);
        assert!(!d[0].is_addition && d[0].element == a);
        assert!(d[1].is_addition && d[1].element == b);
    }

    #[test]
    fn applying_delta_to_before_yields_after() {
        let a = key(1);
        let b = key(2);
        let c = key(3);
        let mut before = Multiset::new();
        before.add_one(a.clone());
        before.add_one(b.clone());
        let mut after = Multiset::new();
        after.add_one(b.clone());
        after.add_one(c.clone());
        after.add_one(c.clone());

        let d = delta(&before, &after);
        let mut reconstructed = before.clone();
        for entry in &d {
            if entry.is_addition {
                reconstructed.add_one(entry.element.clone());
            } else {
                let count = reconstructed.counts.get_mut(&entry.element).unwrap();
                *count -= 1;
                if *count == 0 {
                    reconstructed.counts.shift_remove(&entry.element);
                }
            }
        }
        for (k, &count) in after.iter() {
            assert_eq!(reconstructed.count_of(k), count);
        }
        assert_eq!(reconstructed.len(), after.len());
    }
}
