//! JSON exporter for offline inspection of scene runs.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

use voe_core::{FrameSummary, Plausibility};

use crate::runner::ScenarioResult;

/// Complete scene export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario or scene file name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Motion model name
    pub predictor: String,

    /// All frames
    pub frames: Vec<FrameSummary>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Plausibility>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, predictor: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            predictor: predictor.to_string(),
            frames: Vec::new(),
            passed: false,
            verdict: None,
            failure_reason: None,
        }
    }

    /// Builds an export from a finished run.
    pub fn from_result(result: &ScenarioResult, predictor: &str) -> Self {
        let mut export = Self::new(&result.scenario, result.seed, predictor);
        for frame in &result.frames {
            export.add_frame(frame.clone());
        }
        export.finalize(result);
        export
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: FrameSummary) {
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, result: &ScenarioResult) {
        self.passed = result.passed;
        self.verdict = result.verdict;
        self.failure_reason = result.failure_reason.clone();
    }

    /// Number of frames that reported at least one violation.
    pub fn violation_frames(&self) -> usize {
        self.frames.iter().filter(|f| !f.violations.is_empty()).count()
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
