//! Scenario runner - drives scenes through a `SceneSession` and checks verdicts.

use std::time::Duration;
use tracing::{debug, info, warn};

use voe_core::{
    ConstantVelocityPredictor, FrameInput, FrameSummary, FrameTime, LastSeenPredictor,
    Plausibility, PositionPredictor, SceneSession, TimeoutPredictor, TracingSink, VoeConfig,
};

use crate::oracle::Oracle;
use crate::scenarios::ScenarioId;
use crate::scene_file::SceneFile;

/// Fewest frames a synthetic scene may run for: the anomaly sits at the
/// midpoint and needs a full history window before it.
pub const MIN_SCENE_FRAMES: FrameTime = 10;

/// Built-in motion models selectable from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredictorKind {
    #[default]
    LastSeen,
    ConstantVelocity,
}

impl PredictorKind {
    pub fn name(&self) -> &'static str {
        match self {
            PredictorKind::LastSeen => "last_seen",
            PredictorKind::ConstantVelocity => "constant_velocity",
        }
    }

    pub fn build(&self) -> Box<dyn PositionPredictor + Send + Sync> {
        match self {
            PredictorKind::LastSeen => Box::new(LastSeenPredictor),
            PredictorKind::ConstantVelocity => Box::new(ConstantVelocityPredictor),
        }
    }
}

impl std::fmt::Display for PredictorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PredictorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "last_seen" | "lastseen" | "static" => Ok(PredictorKind::LastSeen),
            "constant_velocity" | "constantvelocity" | "cv" => Ok(PredictorKind::ConstantVelocity),
            _ => Err(format!("Unknown predictor: {}", s)),
        }
    }
}

/// Results from running a scene.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario or scene file name
    pub scenario: String,

    /// Seed used (0 for recorded scenes)
    pub seed: u64,

    /// Whether the verdict matched the expectation
    pub passed: bool,

    /// Frames processed
    pub total_frames: u64,

    /// Verdict the engine reached, if the scene completed
    pub verdict: Option<Plausibility>,

    /// Verdict the scene was expected to produce
    pub expected: Option<Plausibility>,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Per-frame summaries, for export
    pub frames: Vec<FrameSummary>,
}

/// Metrics collected during scene execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioMetrics {
    /// Frames where a violation was reported
    pub frames_with_violations: u64,

    /// Frames without a usable prediction
    pub undeterminable_frames: u64,

    pub position_violations: u64,
    pub presence_violations: u64,

    /// Missing objects excused by occlusion
    pub occlusion_exemptions: u64,

    /// Largest position deviation reported (m)
    pub max_position_error: f64,
}

/// Runs scenes against the engine.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Frames per synthetic scene
    frames: FrameTime,

    /// Motion model
    predictor: PredictorKind,

    /// Bounded wait on each predictor call
    predictor_timeout: Option<Duration>,

    /// Detector configuration (occlusion policy is set per scenario)
    config: VoeConfig,

    /// Observation noise (m)
    noise_std: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            frames: 30,
            predictor: PredictorKind::default(),
            predictor_timeout: None,
            config: VoeConfig::default(),
            noise_std: 0.02,
        }
    }

    /// Sets the scene length.
    pub fn with_frames(mut self, frames: FrameTime) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_predictor(mut self, predictor: PredictorKind) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_predictor_timeout(mut self, timeout: Duration) -> Self {
        self.predictor_timeout = Some(timeout);
        self
    }

    pub fn with_config(mut self, config: VoeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_noise(mut self, std_dev: f64) -> Self {
        self.noise_std = std_dev;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &VoeConfig {
        &self.config
    }

    fn build_predictor(&self) -> Box<dyn PositionPredictor + Send + Sync> {
        let base = self.predictor.build();
        match self.predictor_timeout {
            Some(timeout) => Box::new(TimeoutPredictor::new(base, timeout)),
            None => base,
        }
    }

    /// Runs a synthetic scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!(
            "Starting scenario: {} (seed={}, predictor={})",
            scenario.name(),
            self.seed,
            self.predictor
        );

        if self.frames < MIN_SCENE_FRAMES {
            return ScenarioResult::failed(
                scenario.name(),
                self.seed,
                format!("{} frames is too short, need at least {}", self.frames, MIN_SCENE_FRAMES),
            );
        }

        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut oracle = Oracle::new(physics_seed);
        oracle.set_position_noise(self.noise_std);
        scenario.setup(&mut oracle, self.frames);

        let config = self
            .config
            .clone()
            .with_occlusion_policy(scenario.occlusion_policy());

        let frames = (0..self.frames).map(|_| oracle.next_frame());
        self.run_frames(scenario.name(), Some(scenario.expected()), config, frames)
    }

    /// Replays a recorded scene. The file's config, when given, wins.
    pub fn replay(&self, scene: &SceneFile) -> ScenarioResult {
        info!(
            "Replaying scene: {} ({} frames, predictor={})",
            scene.name,
            scene.frames.len(),
            self.predictor
        );

        let inputs = match scene.inputs() {
            Ok(inputs) => inputs,
            Err(e) => return ScenarioResult::failed(&scene.name, self.seed, e.to_string()),
        };
        let config = scene.config.clone().unwrap_or_else(|| self.config.clone());
        self.run_frames(&scene.name, scene.expected, config, inputs)
    }

    /// Drives prepared frames through a fresh session.
    pub fn run_frames(
        &self,
        name: &str,
        expected: Option<Plausibility>,
        config: VoeConfig,
        frames: impl IntoIterator<Item = FrameInput>,
    ) -> ScenarioResult {
        let session = match SceneSession::new(name, config, self.build_predictor()) {
            Ok(session) => session,
            Err(e) => return ScenarioResult::failed(name, self.seed, e.to_string()),
        };
        let mut session = session.with_sink(TracingSink);

        let mut metrics = ScenarioMetrics::default();
        let mut summaries = Vec::new();

        for input in frames {
            let report = match session.step(&input) {
                Ok(report) => report,
                Err(e) => {
                    warn!("[{}] aborted at frame {}: {}", name, input.time, e);
                    let mut result = ScenarioResult::failed(
                        name,
                        self.seed,
                        format!("frame {}: {}", input.time, e),
                    );
                    result.total_frames = summaries.len() as u64;
                    result.frames = summaries;
                    return result;
                }
            };

            for v in report.violations() {
                if let voe_core::Violation::Position(p) = v {
                    metrics.max_position_error = metrics.max_position_error.max(p.error());
                }
            }

            if input.time % 10 == 0 {
                debug!(
                    "  frame={} | objects={} | violations={}",
                    input.time,
                    input.observations.len(),
                    report.violations().len()
                );
            }

            summaries.push(report.summary());
        }

        let verdict = session.finish();
        metrics.frames_with_violations = verdict.frames_with_violations;
        metrics.undeterminable_frames = verdict.undeterminable_frames;
        metrics.position_violations = verdict.stats.position_violations;
        metrics.presence_violations = verdict.stats.presence_violations;
        metrics.occlusion_exemptions = verdict.stats.occlusion_exemptions;

        let passed = expected.map_or(true, |e| e == verdict.plausibility);
        let failure_reason = if passed {
            None
        } else {
            Some(format!(
                "expected {}, engine judged {}",
                expected.map_or("-", |e| e.as_str()),
                verdict.plausibility
            ))
        };

        info!(
            "✓ {} complete: {} frames, {} with violations, verdict {}",
            name, verdict.frames, verdict.frames_with_violations, verdict.plausibility
        );

        ScenarioResult {
            scenario: name.to_string(),
            seed: self.seed,
            passed,
            total_frames: verdict.frames,
            verdict: Some(verdict.plausibility),
            expected,
            failure_reason,
            metrics,
            frames: summaries,
        }
    }
}

impl ScenarioResult {
    fn failed(name: &str, seed: u64, reason: String) -> Self {
        Self {
            scenario: name.to_string(),
            seed,
            passed: false,
            total_frames: 0,
            verdict: None,
            expected: None,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
            frames: Vec::new(),
        }
    }
}
