//! VOE Core - Frame-wise Violation-of-Expectation Engine
//!
//! Watches tracked 3-D objects frame by frame and flags physically
//! implausible events:
//! 1. **Position violations**: a visible object is too far from where it was predicted
//! 2. **Presence violations**: a predicted object is missing from the frame
//!
//! The motion model is pluggable (`PositionPredictor`); the engine owns the
//! bounded observation history, training-set selection, comparison and
//! heatmap aggregation.

pub mod error;
pub mod masks;
pub mod scene_runtime;
pub mod voe_detect;
pub mod voe_filter;
pub mod voe_history;
pub mod voe_predict;
pub mod voe_violation;

// Re-export key types for convenience
pub use error::{PredictorError, SinkError, VoeError};
pub use masks::{squash_masks, separate_object_masks, Heatmap, ObjectMask, BACKGROUND_ID};
pub use scene_runtime::{
    FrameInput, FrameReport, FrameSummary, Plausibility, SceneSession, SceneVerdict, TracingSink,
    ViolationSink,
};
pub use voe_detect::{DetectorStats, FramewiseVoe, ObjectRegistry, OcclusionPolicy, VoeConfig};
pub use voe_filter::{filter_history, FilterPolicy, TrainingSet};
pub use voe_history::{FrameRecord, FrameTime, HistoryStore, ObjectId, Observation, Position};
pub use voe_predict::{
    invoke_predictor, ConstantVelocityPredictor, FnPredictor, LastSeenPredictor,
    PositionPredictor, Prediction, QuerySet, TimeoutPredictor,
};
pub use voe_violation::{
    describe_all, make_occlusion_heatmap, make_voe_heatmap, PositionViolation, PresenceViolation,
    Violation,
};
