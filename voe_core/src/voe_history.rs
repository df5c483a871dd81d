//! The "HISTORY" Store - per-scene observation memory
//!
//! Holds every frame recorded for one scene as an arena of per-object
//! buffers. Each buffer is ordered latest-first (time descending, insertion
//! order on ties) so the filter can read the most recent observations without
//! re-sorting the whole history.
//!
//! A store built with a capacity keeps only the `k` best-ranked observations
//! per object. The per-object *total* count survives eviction, since
//! eligibility is decided on the full pre-filter history.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::VoeError;

/// Discrete frame index.
pub type FrameTime = u64;

/// Stable object identifier assigned by the identity tracker.
pub type ObjectId = i64;

/// World-space position.
pub type Position = Vector3<f64>;

// ============================================================================
// OBSERVATIONS (Input)
// ============================================================================

/// A single object observation for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Frame the observation belongs to
    pub time: FrameTime,

    /// Tracker-assigned object id
    pub object_id: ObjectId,

    /// Estimated world position
    pub position: Position,

    /// False when the object was not actually visible this frame
    pub present: bool,
}

impl Observation {
    /// Creates a visible observation.
    pub fn visible(time: FrameTime, object_id: ObjectId, position: Position) -> Self {
        Self {
            time,
            object_id,
            position,
            present: true,
        }
    }

    /// Creates a bookkeeping-only observation for an object that was not seen.
    pub fn hidden(time: FrameTime, object_id: ObjectId, position: Position) -> Self {
        Self {
            time,
            object_id,
            position,
            present: false,
        }
    }
}

/// All observations recorded for one frame time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub time: FrameTime,
    pub observations: Vec<Observation>,
}

impl FrameRecord {
    /// Builds a record from the parallel slices handed over by the agent loop.
    pub fn from_parallel(
        time: FrameTime,
        ids: &[ObjectId],
        positions: &[Position],
        presents: &[bool],
    ) -> Result<Self, VoeError> {
        if positions.len() != ids.len() {
            return Err(VoeError::length("positions", ids.len(), positions.len()));
        }
        if presents.len() != ids.len() {
            return Err(VoeError::length("presents", ids.len(), presents.len()));
        }

        let observations = ids
            .iter()
            .zip(positions)
            .zip(presents)
            .map(|((&object_id, &position), &present)| Observation {
                time,
                object_id,
                position,
                present,
            })
            .collect();

        Ok(Self { time, observations })
    }

    /// Ids referenced by this record, visible or not.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.observations.iter().map(|o| o.object_id)
    }
}

// ============================================================================
// RETAINED ENTRIES (Internal State)
// ============================================================================

/// A present observation retained by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub time: FrameTime,
    pub object_id: ObjectId,
    pub position: Position,

    /// Global insertion sequence, breaks ties between equal times
    pub seq: u64,
}

impl HistoryEntry {
    /// Ordering key: smaller ranks first (latest time, then earliest insert).
    #[inline]
    pub fn rank_key(&self) -> (Reverse<FrameTime>, u64) {
        (Reverse(self.time), self.seq)
    }
}

/// Bounded, latest-first buffer for a single object.
#[derive(Debug, Clone, Default)]
struct ObjectTrack {
    /// Present observations ever recorded, eviction does not reduce it
    total: usize,

    /// Retained observations, ordered by `rank_key`
    retained: VecDeque<HistoryEntry>,
}

impl ObjectTrack {
    /// Inserts an entry at its ranked position. Returns true if something was evicted.
    fn admit(&mut self, entry: HistoryEntry, capacity: Option<usize>) -> bool {
        self.total += 1;

        let key = entry.rank_key();
        let at = self.retained.partition_point(|e| e.rank_key() < key);
        self.retained.insert(at, entry);

        match capacity {
            Some(cap) if self.retained.len() > cap => {
                self.retained.pop_back();
                true
            }
            _ => false,
        }
    }
}

// ============================================================================
// HISTORY STORE (The Engine)
// ============================================================================

/// Scene-scoped observation history.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    /// Per-object buffers, ordered by id for deterministic iteration
    objects: BTreeMap<ObjectId, ObjectTrack>,

    /// Every frame time ever recorded
    times: BTreeSet<FrameTime>,

    /// Per-object retention cap (`None` keeps everything)
    capacity: Option<usize>,

    /// Next insertion sequence number
    next_seq: u64,

    /// Present observations ever recorded
    present_total: usize,

    /// Observations dropped by the retention cap
    evicted: usize,
}

impl HistoryStore {
    /// Creates a store that keeps the full history.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Creates a store that keeps at most `capacity` observations per object.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            objects: BTreeMap::new(),
            times: BTreeSet::new(),
            capacity,
            next_seq: 0,
            present_total: 0,
            evicted: 0,
        }
    }

    /// Records one frame from parallel slices.
    ///
    /// Fails without touching the store if `time` was already recorded or
    /// the slices disagree in length.
    pub fn record(
        &mut self,
        time: FrameTime,
        ids: &[ObjectId],
        positions: &[Position],
        presents: &[bool],
    ) -> Result<(), VoeError> {
        let frame = FrameRecord::from_parallel(time, ids, positions, presents)?;
        self.record_frame(&frame)
    }

    /// Records a prepared frame.
    pub fn record_frame(&mut self, frame: &FrameRecord) -> Result<(), VoeError> {
        if !self.times.insert(frame.time) {
            return Err(VoeError::DuplicateTime(frame.time));
        }

        for obs in frame.observations.iter().filter(|o| o.present) {
            let entry = HistoryEntry {
                time: frame.time,
                object_id: obs.object_id,
                position: obs.position,
                seq: self.next_seq,
            };
            self.next_seq += 1;
            self.present_total += 1;

            let track = self.objects.entry(obs.object_id).or_default();
            if track.admit(entry, self.capacity) {
                self.evicted += 1;
            }
        }

        Ok(())
    }

    /// Lazily yields retained present observations as `(time, id, position)`.
    ///
    /// For an unbounded store this is the complete present history. Order
    /// within a time is unspecified.
    pub fn all(&self) -> impl Iterator<Item = (FrameTime, ObjectId, Position)> + '_ {
        self.entries().map(|e| (e.time, e.object_id, e.position))
    }

    /// Retained entries, grouped by object id, each group latest-first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> + '_ {
        self.objects.values().flat_map(|t| t.retained.iter())
    }

    /// Retained entries of one object, latest-first.
    pub fn entries_for(&self, id: ObjectId) -> impl Iterator<Item = &HistoryEntry> + '_ {
        self.objects
            .get(&id)
            .into_iter()
            .flat_map(|t| t.retained.iter())
    }

    /// Total present observations ever recorded for `id`.
    pub fn total_count(&self, id: ObjectId) -> usize {
        self.objects.get(&id).map_or(0, |t| t.total)
    }

    /// `(id, total present count)` for every object with at least one present observation.
    pub fn total_counts(&self) -> impl Iterator<Item = (ObjectId, usize)> + '_ {
        self.objects.iter().map(|(&id, t)| (id, t.total))
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn contains_time(&self, time: FrameTime) -> bool {
        self.times.contains(&time)
    }

    /// Number of frames recorded.
    pub fn frame_count(&self) -> usize {
        self.times.len()
    }

    /// Latest recorded frame time.
    pub fn latest_time(&self) -> Option<FrameTime> {
        self.times.last().copied()
    }

    /// Present observations ever recorded.
    pub fn observation_count(&self) -> usize {
        self.present_total
    }

    /// Present observations currently retained.
    pub fn retained_count(&self) -> usize {
        self.objects.values().map(|t| t.retained.len()).sum()
    }

    /// Observations dropped by the retention cap.
    pub fn evicted_count(&self) -> usize {
        self.evicted
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.present_total == 0
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::unbounded()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f64) -> Position {
        Vector3::new(x, 0.0, 0.0)
    }

    #[test]
    fn test_record_and_all() {
        let mut store = HistoryStore::unbounded();
        store
            .record(0, &[1, 2], &[at(0.0), at(1.0)], &[true, true])
            .unwrap();
        store.record(1, &[1], &[at(0.5)], &[true]).unwrap();

        let mut all: Vec<_> = store.all().collect();
        all.sort_by_key(|(t, id, _)| (*t, *id));
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], (0, 1, at(0.0)));
        assert_eq!(all[1], (0, 2, at(1.0)));
        assert_eq!(all[2], (1, 1, at(0.5)));
        assert_eq!(store.frame_count(), 2);
        assert_eq!(store.latest_time(), Some(1));
    }

    #[test]
    fn test_duplicate_time_rejected() {
        let mut store = HistoryStore::unbounded();
        store.record(3, &[1], &[at(0.0)], &[true]).unwrap();

        let err = store.record(3, &[2], &[at(9.0)], &[true]).unwrap_err();
        assert_eq!(err, VoeError::DuplicateTime(3));

        // The failed call left no trace
        assert_eq!(store.observation_count(), 1);
        assert_eq!(store.total_count(2), 0);
    }

    #[test]
    fn test_absent_observations_not_stored() {
        let mut store = HistoryStore::unbounded();
        store
            .record(0, &[1, 2], &[at(0.0), at(1.0)], &[true, false])
            .unwrap();

        assert_eq!(store.total_count(1), 1);
        assert_eq!(store.total_count(2), 0);
        assert!(store.all().all(|(_, id, _)| id == 1));
    }

    #[test]
    fn test_length_mismatch() {
        let mut store = HistoryStore::unbounded();
        let err = store.record(0, &[1, 2], &[at(0.0)], &[true, true]).unwrap_err();
        assert!(matches!(err, VoeError::LengthMismatch { what: "positions", .. }));

        let err = store.record(0, &[1], &[at(0.0)], &[]).unwrap_err();
        assert!(matches!(err, VoeError::LengthMismatch { what: "presents", .. }));

        // Rejected input does not claim the frame time
        assert!(!store.contains_time(0));
    }

    #[test]
    fn test_bounded_keeps_latest_and_total() {
        let mut store = HistoryStore::bounded(2);
        for t in 0..5 {
            store.record(t, &[7], &[at(t as f64)], &[true]).unwrap();
        }

        let times: Vec<_> = store.entries_for(7).map(|e| e.time).collect();
        assert_eq!(times, vec![4, 3]);
        assert_eq!(store.total_count(7), 5);
        assert_eq!(store.evicted_count(), 3);
        assert_eq!(store.retained_count(), 2);
    }

    #[test]
    fn test_bounded_out_of_order_recording() {
        let mut store = HistoryStore::bounded(2);
        store.record(10, &[1], &[at(10.0)], &[true]).unwrap();
        store.record(2, &[1], &[at(2.0)], &[true]).unwrap();
        store.record(7, &[1], &[at(7.0)], &[true]).unwrap();

        // Eviction is by recency of frame time, not by arrival
        let times: Vec<_> = store.entries_for(1).map(|e| e.time).collect();
        assert_eq!(times, vec![10, 7]);
    }

    #[test]
    fn test_same_time_ties_keep_insertion_order() {
        let mut store = HistoryStore::unbounded();
        store
            .record(0, &[4, 4], &[at(1.0), at(2.0)], &[true, true])
            .unwrap();

        let positions: Vec<_> = store.entries_for(4).map(|e| e.position).collect();
        assert_eq!(positions, vec![at(1.0), at(2.0)]);
    }
}
