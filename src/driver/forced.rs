use std::collections::BTreeSet;

use crate::genomics::AlleleKey;

/// Forced-output bookkeeping for one session.
///
/// Holds the positions whose site must be reported and the forced indel
/// alleles already written, so that each forced allele is emitted once.
/// Both sets are pruned as the driver advances.
#[derive(Debug, Clone, Default)]
pub struct ForcedOutputTracker {
    emitted: BTreeSet<AlleleKey>,
    positions: BTreeSet<u32>,
}

impl ForcedOutputTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a site record at `pos`.
    pub fn add_forced_position(&mut self, pos: u32) {
        self.positions.insert(pos);
    }

    /// Whether `pos` must be reported.
    pub fn is_forced_position(&self, pos: u32) -> bool {
        self.positions.contains(&pos)
    }

    /// Record that a forced allele was written; returns `false` if it already was.
    pub fn mark_emitted(&mut self, key: AlleleKey) -> bool {
        self.emitted.insert(key)
    }

    /// Whether `key` was already written.
    pub fn is_emitted(&self, key: &AlleleKey) -> bool {
        self.emitted.contains(key)
    }

    /// Drop every key and forced position below `pos`.
    pub fn prune_below(&mut self, pos: u32) {
        self.emitted = self.emitted.split_off(&AlleleKey::lower_bound(pos));
        self.positions = self.positions.split_off(&pos);
    }

    /// Emitted keys still tracked.
    pub fn len(&self) -> usize {
        self.emitted.len()
    }

    /// Whether no emitted key is tracked.
    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty()
    }

    /// Emitted keys in key order.
    pub fn iter(&self) -> impl Iterator<Item = &AlleleKey> {
        self.emitted.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pruning_keeps_keys_at_position() {
        let mut tracker = ForcedOutputTracker::new();
        tracker.mark_emitted(AlleleKey::deletion(5, 3));
        tracker.mark_emitted(AlleleKey::insertion(10, b"A"));
        tracker.mark_emitted(AlleleKey::deletion(10, 1));
        tracker.add_forced_position(9);
        tracker.add_forced_position(10);

        tracker.prune_below(10);
        assert_eq!(tracker.len(), 2);
        assert!(tracker.iter().all(|k| k.pos >= 10));
        assert!(!tracker.is_forced_position(9));
        assert!(tracker.is_forced_position(10));
    }

    #[test]
    fn keys_are_emitted_once() {
        let mut tracker = ForcedOutputTracker::new();
        assert!(tracker.mark_emitted(AlleleKey::insertion(3, b"GG")));
        assert!(!tracker.mark_emitted(AlleleKey::insertion(3, b"GG")));
        assert!(tracker.is_emitted(&AlleleKey::insertion(3, b"gg")));
    }
}
