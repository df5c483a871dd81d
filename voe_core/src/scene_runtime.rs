//! Scene Runtime - drives one detector through a scene, frame by frame.
//!
//! Each step follows the agent loop order:
//! 1. `detect` against the history recorded so far
//! 2. paint violation and occlusion heatmaps over the frame's id mask
//! 3. hand the report to every sink (failures are logged, never propagated)
//! 4. `record_obs` the frame
//!
//! At the end of the scene the per-frame outcomes collapse into a single
//! plausible/implausible verdict.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SinkError, VoeError};
use crate::masks::{pixel_count, Heatmap, ObjectMask};
use crate::voe_detect::{DetectorStats, FramewiseVoe, VoeConfig};
use crate::voe_history::{FrameTime, ObjectId, Observation, Position};
use crate::voe_predict::PositionPredictor;
use crate::voe_violation::{make_occlusion_heatmap, make_voe_heatmap, Violation};

// ============================================================================
// FRAME INPUT / OUTPUT
// ============================================================================

/// Everything the collaborators produced for one frame.
#[derive(Debug, Clone)]
pub struct FrameInput {
    pub time: FrameTime,

    /// Tracked per-pixel object ids
    pub mask: ObjectMask,

    /// Per-object positions; `present == false` entries are bookkeeping only
    pub observations: Vec<Observation>,

    /// Ids the occlusion detector flagged this frame
    pub occluded: Vec<ObjectId>,
}

impl FrameInput {
    /// Ids and positions of the objects actually visible this frame.
    pub fn visible(&self) -> (Vec<ObjectId>, Vec<Position>) {
        self.observations
            .iter()
            .filter(|o| o.present)
            .map(|o| (o.object_id, o.position))
            .unzip()
    }
}

/// Outcome of one step.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub time: FrameTime,

    /// `None` when no prediction was available
    pub violations: Option<Vec<Violation>>,

    pub voe_heatmap: Heatmap,
    pub occlusion_heatmap: Heatmap,

    /// True iff at least one violation was emitted
    pub voe_detected: bool,
}

impl FrameReport {
    pub fn is_undeterminable(&self) -> bool {
        self.violations.is_none()
    }

    pub fn violations(&self) -> &[Violation] {
        self.violations.as_deref().unwrap_or_default()
    }

    /// Compact, serializable view without the pixel buffers.
    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            time: self.time,
            determinable: self.violations.is_some(),
            violations: self.violations().to_vec(),
            voe_pixels: pixel_count(&self.voe_heatmap),
            occluded_pixels: pixel_count(&self.occlusion_heatmap),
        }
    }
}

/// Serializable per-frame record for exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub time: FrameTime,
    pub determinable: bool,
    pub violations: Vec<Violation>,
    pub voe_pixels: usize,
    pub occluded_pixels: usize,
}

// ============================================================================
// VERDICT
// ============================================================================

/// Scene-level judgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plausibility {
    Plausible,
    Implausible,
}

impl Plausibility {
    pub fn from_detected(voe_detected: bool) -> Self {
        if voe_detected {
            Self::Implausible
        } else {
            Self::Plausible
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plausible => "plausible",
            Self::Implausible => "implausible",
        }
    }
}

impl fmt::Display for Plausibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneVerdict {
    pub scene_id: Uuid,
    pub name: String,
    pub plausibility: Plausibility,
    pub frames: u64,
    pub frames_with_violations: u64,
    pub undeterminable_frames: u64,
    pub sink_failures: u64,
    pub stats: DetectorStats,
}

// ============================================================================
// REPORTING SINKS
// ============================================================================

/// Consumer of per-frame reports (text output, overlays, exports).
pub trait ViolationSink {
    fn report(&mut self, scene: &str, report: &FrameReport) -> Result<(), SinkError>;

    /// Called once when the scene ends.
    fn finish(&mut self, _verdict: &SceneVerdict) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Logs every violation description at INFO level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ViolationSink for TracingSink {
    fn report(&mut self, scene: &str, report: &FrameReport) -> Result<(), SinkError> {
        for v in report.violations() {
            info!("[{}] frame {}: {}", scene, report.time, v.describe());
        }
        Ok(())
    }

    fn finish(&mut self, verdict: &SceneVerdict) -> Result<(), SinkError> {
        info!(
            "[{}] {} ({} frames, {} with violations)",
            verdict.name, verdict.plausibility, verdict.frames, verdict.frames_with_violations
        );
        Ok(())
    }
}

// ============================================================================
// SCENE SESSION
// ============================================================================

/// One scene's detector plus its reporting sinks.
pub struct SceneSession<P> {
    scene_id: Uuid,
    name: String,
    detector: FramewiseVoe<P>,
    sinks: Vec<Box<dyn ViolationSink>>,
    frames: u64,
    frames_with_violations: u64,
    undeterminable_frames: u64,
    sink_failures: u64,
}

impl<P: PositionPredictor> SceneSession<P> {
    pub fn new(name: impl Into<String>, config: VoeConfig, predictor: P) -> Result<Self, VoeError> {
        let detector = FramewiseVoe::new(config, predictor)?;
        let session = Self {
            scene_id: Uuid::new_v4(),
            name: name.into(),
            detector,
            sinks: Vec::new(),
            frames: 0,
            frames_with_violations: 0,
            undeterminable_frames: 0,
            sink_failures: 0,
        };
        debug!("scene {} started ({})", session.name, session.scene_id);
        Ok(session)
    }

    pub fn with_sink(mut self, sink: impl ViolationSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Process one frame: detect, report, then record.
    pub fn step(&mut self, input: &FrameInput) -> Result<FrameReport, VoeError> {
        let (visible_ids, visible_positions) = input.visible();

        let violations = self.detector.detect_with_occlusion(
            input.time,
            &visible_positions,
            &visible_ids,
            &input.occluded,
        )?;

        let voe_heatmap = make_voe_heatmap(violations.as_deref(), &input.mask);
        let occlusion_heatmap = make_occlusion_heatmap(input.occluded.iter().copied(), &input.mask);
        let voe_detected = violations.as_ref().is_some_and(|v| !v.is_empty());

        let report = FrameReport {
            time: input.time,
            violations,
            voe_heatmap,
            occlusion_heatmap,
            voe_detected,
        };

        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.report(&self.name, &report) {
                self.sink_failures += 1;
                warn!("[{}] sink failed on frame {}: {}", self.name, input.time, e);
            }
        }

        let ids: Vec<ObjectId> = input.observations.iter().map(|o| o.object_id).collect();
        let positions: Vec<Position> = input.observations.iter().map(|o| o.position).collect();
        let presents: Vec<bool> = input.observations.iter().map(|o| o.present).collect();
        let occlusions: Vec<bool> = ids.iter().map(|id| input.occluded.contains(id)).collect();
        self.detector
            .record_obs(input.time, &ids, &positions, &presents, Some(&occlusions))?;

        self.frames += 1;
        if report.is_undeterminable() {
            self.undeterminable_frames += 1;
        }
        if report.voe_detected {
            self.frames_with_violations += 1;
        }

        Ok(report)
    }

    /// Verdict so far: implausible once any frame showed a violation.
    pub fn plausibility(&self) -> Plausibility {
        Plausibility::from_detected(self.frames_with_violations > 0)
    }

    /// End the scene and release its state.
    pub fn finish(mut self) -> SceneVerdict {
        let verdict = SceneVerdict {
            scene_id: self.scene_id,
            name: self.name.clone(),
            plausibility: self.plausibility(),
            frames: self.frames,
            frames_with_violations: self.frames_with_violations,
            undeterminable_frames: self.undeterminable_frames,
            sink_failures: self.sink_failures,
            stats: self.detector.stats().clone(),
        };

        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.finish(&verdict) {
                warn!("[{}] sink failed at scene end: {}", self.name, e);
            }
        }

        verdict
    }

    pub fn scene_id(&self) -> Uuid {
        self.scene_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detector(&self) -> &FramewiseVoe<P> {
        &self.detector
    }
}
