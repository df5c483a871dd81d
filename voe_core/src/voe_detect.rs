//! The "DETECT" Engine - frame-wise violation detector
//!
//! Owns all per-scene state and exposes the two per-frame operations:
//! - `record_obs`: append one frame of observations (once per frame time)
//! - `detect`: predict every known object at a frame time and compare the
//!   backed predictions with the observed positions
//!
//! `detect` answers `Ok(None)` when no prediction is available (too little
//! history, or the predictor failed) and `Ok(Some(vec))` otherwise, where an
//! empty vector means the frame looked plausible.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::error::VoeError;
use crate::voe_filter::{filter_history, FilterPolicy, TrainingSet};
use crate::voe_history::{FrameRecord, FrameTime, HistoryStore, ObjectId, Position};
use crate::voe_predict::{invoke_predictor, PositionPredictor, Prediction, QuerySet};
use crate::voe_violation::Violation;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// How occlusion reports affect presence violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcclusionPolicy {
    /// Occlusion is recorded but never consulted
    #[default]
    Ignore,

    /// Missing objects reported as occluded raise no presence violation
    ExemptOccluded,
}

/// Configuration for the FramewiseVoe detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoeConfig {
    /// Present observations needed before an object is predicted (default: 3)
    pub min_hist_count: usize,

    /// Most recent observations per object fed to the predictor (default: 8)
    pub max_hist_count: usize,

    /// Euclidean deviation that triggers a position violation, exclusive (default: 0.5)
    pub dist_thresh: f64,

    /// Occlusion handling for presence violations (default: Ignore)
    pub occlusion_policy: OcclusionPolicy,
}

impl Default for VoeConfig {
    fn default() -> Self {
        Self {
            min_hist_count: 3,
            max_hist_count: 8,
            dist_thresh: 0.5,
            occlusion_policy: OcclusionPolicy::Ignore,
        }
    }
}

impl VoeConfig {
    pub fn new(min_hist_count: usize, max_hist_count: usize, dist_thresh: f64) -> Self {
        Self {
            min_hist_count,
            max_hist_count,
            dist_thresh,
            ..Default::default()
        }
    }

    pub fn with_occlusion_policy(mut self, policy: OcclusionPolicy) -> Self {
        self.occlusion_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), VoeError> {
        if self.min_hist_count == 0 {
            return Err(VoeError::InvalidConfig("min_hist_count must be at least 1".into()));
        }
        if self.max_hist_count == 0 {
            return Err(VoeError::InvalidConfig("max_hist_count must be at least 1".into()));
        }
        if !self.dist_thresh.is_finite() || self.dist_thresh < 0.0 {
            return Err(VoeError::InvalidConfig(format!(
                "dist_thresh must be finite and non-negative, got {}",
                self.dist_thresh
            )));
        }
        Ok(())
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy::new(self.min_hist_count, self.max_hist_count)
    }
}

// ============================================================================
// OBJECT REGISTRY
// ============================================================================

/// Every object id ever passed to `record_obs`. Only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectRegistry {
    ids: BTreeSet<ObjectId>,
}

impl ObjectRegistry {
    pub fn extend(&mut self, ids: impl IntoIterator<Item = ObjectId>) {
        self.ids.extend(ids);
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.ids.contains(&id)
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_superset(&self, other: &ObjectRegistry) -> bool {
        self.ids.is_superset(&other.ids)
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Counters collected over a scene.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorStats {
    pub frames_recorded: u64,
    pub detect_calls: u64,
    pub undeterminable: u64,
    pub position_violations: u64,
    pub presence_violations: u64,

    /// Presence violations suppressed by `OcclusionPolicy::ExemptOccluded`
    pub occlusion_exemptions: u64,
}

impl DetectorStats {
    pub fn total_violations(&self) -> u64 {
        self.position_violations + self.presence_violations
    }
}

// ============================================================================
// DETECTOR (The Engine)
// ============================================================================

/// Scene-scoped violation-of-expectation detector.
pub struct FramewiseVoe<P> {
    /// Observation history, capped at `max_hist_count` per object
    history: HistoryStore,

    /// All ids ever seen
    registry: ObjectRegistry,

    /// Runtime configuration
    config: VoeConfig,

    /// External position predictor
    predictor: P,

    /// Occluded ids of the most recently recorded frame
    last_occlusion: Option<(FrameTime, BTreeSet<ObjectId>)>,

    stats: DetectorStats,
}

impl<P: PositionPredictor> FramewiseVoe<P> {
    /// Create a detector for a new scene.
    pub fn new(config: VoeConfig, predictor: P) -> Result<Self, VoeError> {
        config.validate()?;
        Ok(Self::assemble(config, predictor))
    }

    /// Create a detector with default configuration.
    pub fn with_defaults(predictor: P) -> Self {
        Self::assemble(VoeConfig::default(), predictor)
    }

    /// Caller guarantees `config` is valid.
    fn assemble(config: VoeConfig, predictor: P) -> Self {
        Self {
            history: HistoryStore::bounded(config.max_hist_count),
            registry: ObjectRegistry::default(),
            config,
            predictor,
            last_occlusion: None,
            stats: DetectorStats::default(),
        }
    }

    // ========================================================================
    // RECORDING
    // ========================================================================

    /// Record one frame of observations.
    ///
    /// `occlusions`, when given, is aligned with `ids`. A frame time may be
    /// recorded only once; a rejected call changes nothing.
    pub fn record_obs(
        &mut self,
        time: FrameTime,
        ids: &[ObjectId],
        positions: &[Position],
        presents: &[bool],
        occlusions: Option<&[bool]>,
    ) -> Result<(), VoeError> {
        if let Some(flags) = occlusions {
            if flags.len() != ids.len() {
                return Err(VoeError::length("occlusions", ids.len(), flags.len()));
            }
        }

        let frame = FrameRecord::from_parallel(time, ids, positions, presents)?;
        self.record_frame(&frame)?;

        if let Some(flags) = occlusions {
            let occluded = ids
                .iter()
                .zip(flags)
                .filter(|(_, occluded)| **occluded)
                .map(|(&id, _)| id)
                .collect();
            self.last_occlusion = Some((time, occluded));
        }

        Ok(())
    }

    /// Record a prepared frame.
    pub fn record_frame(&mut self, frame: &FrameRecord) -> Result<(), VoeError> {
        self.history.record_frame(frame)?;
        self.registry.extend(frame.ids());
        self.stats.frames_recorded += 1;

        debug!(
            "recorded frame {} ({} observations, {} known objects)",
            frame.time,
            frame.observations.len(),
            self.registry.len()
        );
        Ok(())
    }

    // ========================================================================
    // PREDICTION
    // ========================================================================

    /// Training set the predictor would receive right now.
    pub fn training_set(&self) -> TrainingSet {
        filter_history(&self.history, &self.config.filter_policy())
    }

    /// Query every known object at `time`.
    pub fn query_set(&self, time: FrameTime) -> QuerySet {
        QuerySet::at_time(time, self.registry.iter())
    }

    /// Predict all known objects at `time`.
    ///
    /// `Ok(None)` if no object has enough history or the predictor failed.
    pub fn predict(&self, time: FrameTime) -> Result<Option<Prediction>, VoeError> {
        let training = self.training_set();
        let query = self.query_set(time);
        invoke_predictor(&self.predictor, &training, &query)
    }

    // ========================================================================
    // DETECTION
    // ========================================================================

    /// Compare predictions at `time` against the observed objects.
    pub fn detect(
        &mut self,
        time: FrameTime,
        actual_positions: &[Position],
        actual_ids: &[ObjectId],
    ) -> Result<Option<Vec<Violation>>, VoeError> {
        self.detect_with_occlusion(time, actual_positions, actual_ids, &[])
    }

    /// Like `detect`, with the ids the occlusion detector reports for this frame.
    ///
    /// `occluded` is consulted only under `OcclusionPolicy::ExemptOccluded`.
    pub fn detect_with_occlusion(
        &mut self,
        time: FrameTime,
        actual_positions: &[Position],
        actual_ids: &[ObjectId],
        occluded: &[ObjectId],
    ) -> Result<Option<Vec<Violation>>, VoeError> {
        if actual_positions.len() != actual_ids.len() {
            return Err(VoeError::length(
                "actual_positions",
                actual_ids.len(),
                actual_positions.len(),
            ));
        }
        self.stats.detect_calls += 1;

        let prediction = match self.predict(time)? {
            Some(p) => p,
            None => {
                self.stats.undeterminable += 1;
                debug!("frame {}: undeterminable", time);
                return Ok(None);
            }
        };

        // A backed object without a usable answer makes the frame uncheckable
        if let Some((id, p)) = prediction
            .relevant()
            .find(|(_, p)| p.iter().any(|c| !c.is_finite()))
        {
            self.stats.undeterminable += 1;
            warn!(
                "frame {}: non-finite prediction for object {} ({}, {}, {}), undeterminable",
                time, id, p.x, p.y, p.z
            );
            return Ok(None);
        }

        debug!(
            "frame {}: predicted {} objects ({} backed)",
            time,
            prediction.len(),
            prediction.relevant().count()
        );

        let violations = self.compare(&prediction, actual_positions, actual_ids, occluded);
        debug!("frame {}: compared, {} violations", time, violations.len());

        Ok(Some(violations))
    }

    fn compare(
        &mut self,
        prediction: &Prediction,
        actual_positions: &[Position],
        actual_ids: &[ObjectId],
        occluded: &[ObjectId],
    ) -> Vec<Violation> {
        // First occurrence wins for repeated ids
        let mut actual: HashMap<ObjectId, Position> = HashMap::with_capacity(actual_ids.len());
        for (&id, &pos) in actual_ids.iter().zip(actual_positions) {
            actual.entry(id).or_insert(pos);
        }

        let exempt_occluded = self.config.occlusion_policy == OcclusionPolicy::ExemptOccluded;
        let mut violations = Vec::new();

        for (id, predicted) in prediction.relevant() {
            match actual.get(&id) {
                Some(&observed) => {
                    let error = (observed - predicted).norm();
                    if error > self.config.dist_thresh {
                        self.stats.position_violations += 1;
                        violations.push(Violation::position(id, predicted, observed));
                    }
                }
                None if exempt_occluded && occluded.contains(&id) => {
                    self.stats.occlusion_exemptions += 1;
                }
                None => {
                    self.stats.presence_violations += 1;
                    violations.push(Violation::presence(id, predicted));
                }
            }
        }

        violations
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn config(&self) -> &VoeConfig {
        &self.config
    }

    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    /// Occluded ids of the most recently recorded frame that carried occlusion flags.
    pub fn last_occlusion(&self) -> Option<(FrameTime, &BTreeSet<ObjectId>)> {
        self.last_occlusion.as_ref().map(|(t, ids)| (*t, ids))
    }
}

// ============================================================================
// TESTS
// ============================================================================
