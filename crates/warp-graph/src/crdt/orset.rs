// SPDX-License-Identifier: Apache-2.0
//! Observed-remove set with add-wins semantics.

use std::collections::{BTreeMap, BTreeSet};

use super::Dot;

/// Per-element dot bookkeeping: live dots and tombstoned dots.
///
/// The element is present iff `live − tombstones` is non-empty. Tombstones
/// are retained even for dots never seen live, so a late-arriving add of an
/// already-observed dot stays removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DotSet {
    live: BTreeSet<Dot>,
    tombstones: BTreeSet<Dot>,
}

impl DotSet {
    /// Dots added and not yet tombstoned.
    pub fn visible_dots(&self) -> impl Iterator<Item = &Dot> {
        self.live.iter().filter(|d| !self.tombstones.contains(*d))
    }

    /// All live dots, including ones that later ops may tombstone.
    #[must_use]
    pub fn live(&self) -> &BTreeSet<Dot> {
        &self.live
    }

    /// All tombstoned dots.
    #[must_use]
    pub fn tombstones(&self) -> &BTreeSet<Dot> {
        &self.tombstones
    }

    /// `true` iff at least one live dot is not tombstoned.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.visible_dots().next().is_some()
    }
}

/// OR-Set keyed by `K`, storing per-element [`DotSet`]s.
///
/// Add events union their dot into the element's live set; remove events
/// tombstone the dots they observed. Concurrent add/remove resolves to
/// **add-wins**: the un-observed dot survives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrSet<K: Ord> {
    elements: BTreeMap<K, DotSet>,
}

impl<K: Ord + Clone> OrSet<K> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            elements: BTreeMap::new(),
        }
    }

    /// Applies an add event. Returns `true` if the element was already
    /// present (the add is redundant for visibility purposes).
    pub fn add(&mut self, key: K, dot: Dot) -> bool {
        let entry = self.elements.entry(key).or_default();
        let was_present = entry.is_present();
        entry.live.insert(dot);
        was_present
    }

    /// Applies a remove event: tombstones each observed dot.
    ///
    /// Dots not currently live are tombstoned anyway, guarding against a
    /// late-arriving add that carries one of them.
    pub fn remove<I: IntoIterator<Item = Dot>>(&mut self, key: &K, observed: I) {
        let entry = self.elements.entry(key.clone()).or_default();
        for dot in observed {
            entry.tombstones.insert(dot);
        }
    }

    /// `true` iff the element is present (some live dot un-tombstoned).
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.elements.get(key).is_some_and(DotSet::is_present)
    }

    /// Iterates present elements in key order.
    pub fn present(&self) -> impl Iterator<Item = &K> {
        self.elements
            .iter()
            .filter(|(_, ds)| ds.is_present())
            .map(|(k, _)| k)
    }

    /// Iterates all elements (present or fully tombstoned) with their dot
    /// sets, in key order. Full-state serialization needs the interior.
    pub fn iter_raw(&self) -> impl Iterator<Item = (&K, &DotSet)> {
        self.elements.iter()
    }

    /// The element's dot set, if any event ever touched it.
    #[must_use]
    pub fn dots(&self, key: &K) -> Option<&DotSet> {
        self.elements.get(key)
    }

    /// Restores an element's interior dot sets (full-state deserialization).
    pub fn restore(&mut self, key: K, live: BTreeSet<Dot>, tombstones: BTreeSet<Dot>) {
        self.elements.insert(key, DotSet { live, tombstones });
    }

    /// Total tombstoned dots across all elements.
    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.elements.values().map(|ds| ds.tombstones.len()).sum()
    }

    /// Total live dots across all elements.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.elements.values().map(|ds| ds.live.len()).sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ident::WriterId;

    fn dot(writer: &str, seq: u64) -> Dot {
        Dot::new(WriterId::parse(writer).unwrap(), seq)
    }

    #[test]
    fn add_then_remove_observed() {
        let mut set = OrSet::new();
        set.add("n", dot("w", 1));
        assert!(set.contains(&"n"));
        set.remove(&"n", [dot("w", 1)]);
        assert!(!set.contains(&"n"));
    }

    #[test]
    fn add_wins_over_concurrent_remove() {
        // Removal observed only (w,1); the concurrent add (x,1) survives.
        let mut set = OrSet::new();
        set.add("n", dot("w", 1));
        set.add("n", dot("x", 1));
        set.remove(&"n", [dot("w", 1)]);
        assert!(set.contains(&"n"));
        // Once every live dot is tombstoned, the element is gone.
        set.remove(&"n", [dot("x", 1)]);
        assert!(!set.contains(&"n"));
    }

    #[test]
    fn tombstone_before_add_suppresses_late_add() {
        let mut set = OrSet::new();
        set.remove(&"n", [dot("w", 1)]);
        assert!(!set.contains(&"n"));
        // The add for the already-tombstoned dot arrives later.
        set.add("n", dot("w", 1));
        assert!(!set.contains(&"n"));
    }

    #[test]
    fn redundant_add_reported() {
        let mut set = OrSet::new();
        assert!(!set.add("n", dot("w", 1)));
        assert!(set.add("n", dot("w", 2)));
    }

    #[test]
    fn present_iterates_in_key_order() {
        let mut set = OrSet::new();
        set.add("b", dot("w", 1));
        set.add("a", dot("w", 2));
        set.add("c", dot("w", 3));
        set.remove(&"c", [dot("w", 3)]);
        let keys: Vec<_> = set.present().copied().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn counts_track_interior() {
        let mut set = OrSet::new();
        set.add("a", dot("w", 1));
        set.add("a", dot("w", 2));
        set.remove(&"a", [dot("w", 1)]);
        assert_eq!(set.live_count(), 2);
        assert_eq!(set.tombstone_count(), 1);
    }
}
