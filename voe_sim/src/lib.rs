//! VOE Scene Simulator
//!
//! Deterministic synthetic scenes and recorded-scene replay for the
//! violation-of-expectation engine.
//!
//! # Core Principle
//!
//! Every scene is reproducible from a single 64-bit seed:
//! - **Ground truth**: the `Oracle` moves objects and applies scripted anomalies
//! - **Perception**: noisy positions and a top-down id mask per frame
//! - **Judgement**: a `SceneSession` reaches a verdict that is checked
//!   against the scenario's expected one
//!
//! # Usage
//!
//! ```ignore
//! use voe_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Teleport);
//! assert!(result.passed);
//! ```

mod exporter;
mod oracle;
mod runner;
pub mod scenarios;
pub mod scene_file;

pub use exporter::SimExport;
pub use oracle::{Camera, GroundTruthObject, Oracle, ScriptedEvent};
pub use runner::{PredictorKind, ScenarioMetrics, ScenarioResult, ScenarioRunner, MIN_SCENE_FRAMES};
pub use scene_file::{find_scenes, SceneFile, SceneFileError, SceneFrame, SceneObject};
