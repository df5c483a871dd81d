//! The "FILTER" stage - bounded training set selection
//!
//! Reduces the observation history to the predictor's training input:
//! 1. Count present observations per object over the whole history
//! 2. Drop objects with fewer than `min_hist_count` observations
//! 3. Rank the rest latest-first (insertion order on equal times)
//! 4. Admit at most `max_hist_count` observations per object

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::voe_history::{FrameTime, HistoryEntry, HistoryStore, ObjectId, Position};

/// Per-object support and retention limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPolicy {
    /// Minimum present observations before an object is used for training
    pub min_hist_count: usize,

    /// Maximum observations per object handed to the predictor
    pub max_hist_count: usize,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            min_hist_count: 3,
            max_hist_count: 8,
        }
    }
}

impl FilterPolicy {
    pub fn new(min_hist_count: usize, max_hist_count: usize) -> Self {
        Self {
            min_hist_count,
            max_hist_count,
        }
    }

    #[inline]
    pub fn is_eligible(&self, total_count: usize) -> bool {
        total_count >= self.min_hist_count
    }
}

/// Predictor training input as three aligned columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    pub positions: Vec<Position>,
    pub times: Vec<FrameTime>,
    pub ids: Vec<ObjectId>,
}

impl TrainingSet {
    fn push(&mut self, time: FrameTime, id: ObjectId, position: Position) {
        self.times.push(time);
        self.ids.push(id);
        self.positions.push(position);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Distinct ids backed by training data.
    pub fn id_set(&self) -> BTreeSet<ObjectId> {
        self.ids.iter().copied().collect()
    }

    /// Rows as `(time, id, position)`, in selection order (latest first).
    pub fn rows(&self) -> impl Iterator<Item = (FrameTime, ObjectId, Position)> + '_ {
        self.times
            .iter()
            .zip(&self.ids)
            .zip(&self.positions)
            .map(|((&t, &id), &p)| (t, id, p))
    }

    /// Number of rows per object id.
    pub fn count_per_id(&self) -> HashMap<ObjectId, usize> {
        let mut counts = HashMap::new();
        for id in &self.ids {
            *counts.entry(*id).or_insert(0) += 1;
        }
        counts
    }
}

/// Builds the training set from a history store.
///
/// Eligibility uses the store's total counts, so eviction by a bounded store
/// never changes which objects qualify.
pub fn filter_history(store: &HistoryStore, policy: &FilterPolicy) -> TrainingSet {
    let eligible: BTreeSet<ObjectId> = store
        .total_counts()
        .filter(|(_, total)| policy.is_eligible(*total))
        .map(|(id, _)| id)
        .collect();

    if eligible.is_empty() {
        return TrainingSet::default();
    }

    let mut candidates: Vec<&HistoryEntry> = eligible
        .iter()
        .flat_map(|&id| store.entries_for(id))
        .collect();
    candidates.sort_by_key(|e| e.rank_key());

    admit_capped(
        candidates.into_iter().map(|e| (e.time, e.object_id, e.position)),
        policy.max_hist_count,
    )
}

/// Applies the filter to a flat list of present observations.
///
/// The slice order is taken as insertion order for tie-breaking.
pub fn filter_observations(
    observations: &[(FrameTime, ObjectId, Position)],
    policy: &FilterPolicy,
) -> TrainingSet {
    let mut totals: HashMap<ObjectId, usize> = HashMap::new();
    for (_, id, _) in observations {
        *totals.entry(*id).or_insert(0) += 1;
    }

    let mut candidates: Vec<&(FrameTime, ObjectId, Position)> = observations
        .iter()
        .filter(|(_, id, _)| policy.is_eligible(totals[id]))
        .collect();
    // Stable sort: equal times keep slice order
    candidates.sort_by_key(|(t, _, _)| std::cmp::Reverse(*t));

    admit_capped(candidates.into_iter().copied(), policy.max_hist_count)
}

/// Single pass with a per-object counter.
fn admit_capped(
    ranked: impl Iterator<Item = (FrameTime, ObjectId, Position)>,
    max_hist_count: usize,
) -> TrainingSet {
    let mut admitted: HashMap<ObjectId, usize> = HashMap::new();
    let mut out = TrainingSet::default();

    for (time, id, position) in ranked {
        let count = admitted.entry(id).or_insert(0);
        if *count < max_hist_count {
            out.push(time, id, position);
            *count += 1;
        }
    }

    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use proptest::prelude::*;

    fn at(x: f64) -> Position {
        Vector3::new(x, 0.0, 0.0)
    }

    #[test]
    fn test_empty_history_yields_empty_set() {
        let store = HistoryStore::unbounded();
        let set = filter_history(&store, &FilterPolicy::default());
        assert!(set.is_empty());
    }

    #[test]
    fn test_min_support_excludes_sparse_objects() {
        let mut store = HistoryStore::unbounded();
        for t in 0..3 {
            store.record(t, &[1], &[at(0.0)], &[true]).unwrap();
        }
        for t in 3..5 {
            store.record(t, &[2], &[at(1.0)], &[true]).unwrap();
        }

        let set = filter_history(&store, &FilterPolicy::new(3, 8));
        assert_eq!(set.id_set(), BTreeSet::from([1]));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_absent_observations_do_not_count_towards_support() {
        let mut store = HistoryStore::unbounded();
        store.record(0, &[1], &[at(0.0)], &[true]).unwrap();
        store.record(1, &[1], &[at(0.0)], &[false]).unwrap();
        store.record(2, &[1], &[at(0.0)], &[true]).unwrap();

        let set = filter_history(&store, &FilterPolicy::new(3, 8));
        assert!(set.is_empty());
    }

    #[test]
    fn test_cap_keeps_latest_first() {
        let mut store = HistoryStore::unbounded();
        for t in 0..10 {
            store.record(t, &[1], &[at(t as f64)], &[true]).unwrap();
        }

        let set = filter_history(&store, &FilterPolicy::new(3, 4));
        assert_eq!(set.times, vec![9, 8, 7, 6]);
        assert_eq!(set.positions[0], at(9.0));
    }

    #[test]
    fn test_interleaved_objects_ranked_by_time() {
        let mut store = HistoryStore::unbounded();
        for t in 0..4 {
            store
                .record(t, &[1, 2], &[at(0.0), at(5.0)], &[true, true])
                .unwrap();
        }

        let set = filter_history(&store, &FilterPolicy::new(2, 2));
        assert_eq!(set.times, vec![3, 3, 2, 2]);
        assert_eq!(set.ids, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_flat_filter_matches_original_ordering() {
        let obs = vec![
            (0, 1, at(0.0)),
            (1, 1, at(1.0)),
            (1, 2, at(2.0)),
            (2, 1, at(3.0)),
        ];
        let set = filter_observations(&obs, &FilterPolicy::new(1, 2));
        assert_eq!(set.times, vec![2, 1, 1]);
        assert_eq!(set.ids, vec![1, 1, 2]);
    }

    fn arb_frames() -> impl Strategy<Value = Vec<Vec<(ObjectId, bool)>>> {
        prop::collection::vec(
            prop::collection::vec((0i64..5, prop::bool::weighted(0.8)), 0..6),
            0..25,
        )
    }

    fn build(frames: &[Vec<(ObjectId, bool)>], capacity: Option<usize>) -> HistoryStore {
        let mut store = HistoryStore::with_capacity(capacity);
        for (t, frame) in frames.iter().enumerate() {
            let ids: Vec<_> = frame.iter().map(|(id, _)| *id).collect();
            let presents: Vec<_> = frame.iter().map(|(_, p)| *p).collect();
            let positions: Vec<_> = (0..frame.len()).map(|i| at((t * 10 + i) as f64)).collect();
            store.record(t as FrameTime, &ids, &positions, &presents).unwrap();
        }
        store
    }

    proptest! {
        #[test]
        fn prop_filter_respects_cap_and_support(
            frames in arb_frames(),
            min in 1usize..5,
            max in 1usize..6,
        ) {
            let store = build(&frames, None);
            let policy = FilterPolicy::new(min, max);
            let set = filter_history(&store, &policy);

            for (id, n) in set.count_per_id() {
                prop_assert!(n <= max);
                prop_assert!(store.total_count(id) >= min);
            }
            for (id, total) in store.total_counts() {
                if total < min {
                    prop_assert!(!set.ids.contains(&id));
                }
            }
        }

        #[test]
        fn prop_bounded_store_filters_identically(
            frames in arb_frames(),
            min in 1usize..5,
            max in 1usize..6,
        ) {
            let policy = FilterPolicy::new(min, max);
            let full = filter_history(&build(&frames, None), &policy);
            let bounded = filter_history(&build(&frames, Some(max)), &policy);
            prop_assert_eq!(full, bounded);
        }

        #[test]
        fn prop_store_filter_matches_flat_filter(
            frames in arb_frames(),
            min in 1usize..5,
            max in 1usize..6,
        ) {
            let store = build(&frames, None);
            let mut flat = Vec::new();
            for (t, frame) in frames.iter().enumerate() {
                for (i, (id, present)) in frame.iter().enumerate() {
                    if *present {
                        flat.push((t as FrameTime, *id, at((t * 10 + i) as f64)));
                    }
                }
            }
            let policy = FilterPolicy::new(min, max);
            prop_assert_eq!(filter_history(&store, &policy), filter_observations(&flat, &policy));
        }
    }
}
