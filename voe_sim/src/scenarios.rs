//! Synthetic scenes with a known expected verdict.

use nalgebra::Vector3;

use voe_core::{FrameTime, OcclusionPolicy, Plausibility};

use crate::oracle::{Oracle, ScriptedEvent};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// VOE-001: Objects standing still
    Stationary,

    /// VOE-002: Objects moving at constant velocity
    LinearMotion,

    /// VOE-003: One object jumps mid-scene
    Teleport,

    /// VOE-004: One object disappears mid-scene
    Vanish,

    /// VOE-005: One object goes behind an occluder, occlusion-exempt detector
    OccludedVanish,

    /// VOE-006: A new object enters mid-scene
    LateArrival,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Stationary,
            ScenarioId::LinearMotion,
            ScenarioId::Teleport,
            ScenarioId::Vanish,
            ScenarioId::OccludedVanish,
            ScenarioId::LateArrival,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Stationary => "stationary",
            ScenarioId::LinearMotion => "linear_motion",
            ScenarioId::Teleport => "teleport",
            ScenarioId::Vanish => "vanish",
            ScenarioId::OccludedVanish => "occluded_vanish",
            ScenarioId::LateArrival => "late_arrival",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Stationary => "Three still objects with sensor noise",
            ScenarioId::LinearMotion => "Three objects drifting at 5cm per frame",
            ScenarioId::Teleport => "Object 2 jumps 2m sideways halfway through",
            ScenarioId::Vanish => "Object 1 disappears halfway through",
            ScenarioId::OccludedVanish => "Object 1 is occluded halfway through; occlusion exempts it",
            ScenarioId::LateArrival => "Object 9 enters halfway through with no history",
        }
    }

    /// Verdict a correct engine must reach.
    pub fn expected(&self) -> Plausibility {
        match self {
            ScenarioId::Teleport | ScenarioId::Vanish => Plausibility::Implausible,
            _ => Plausibility::Plausible,
        }
    }

    /// Occlusion handling the scenario runs with.
    pub fn occlusion_policy(&self) -> OcclusionPolicy {
        match self {
            ScenarioId::OccludedVanish => OcclusionPolicy::ExemptOccluded,
            _ => OcclusionPolicy::Ignore,
        }
    }

    /// Populates `oracle` for a scene of `frames` frames.
    pub fn setup(&self, oracle: &mut Oracle, frames: FrameTime) {
        let midpoint = frames / 2;

        let velocity = match self {
            ScenarioId::LinearMotion => Vector3::new(0.05, 0.02, 0.0),
            _ => Vector3::zeros(),
        };
        for (i, id) in [1, 2, 3].into_iter().enumerate() {
            let start = Vector3::new(-4.0 + 3.0 * i as f64, -2.0 + i as f64, 0.0);
            oracle.spawn(id, start, velocity);
        }

        match self {
            ScenarioId::Stationary | ScenarioId::LinearMotion => {}
            ScenarioId::Teleport => oracle.schedule(ScriptedEvent::Teleport {
                id: 2,
                at: midpoint,
                offset: Vector3::new(0.0, 2.0, 0.0),
            }),
            ScenarioId::Vanish => oracle.schedule(ScriptedEvent::Vanish { id: 1, at: midpoint }),
            ScenarioId::OccludedVanish => {
                oracle.schedule(ScriptedEvent::Occlude { id: 1, at: midpoint })
            }
            ScenarioId::LateArrival => {
                oracle.spawn_hidden(9, Vector3::new(4.0, 3.0, 0.0), Vector3::zeros());
                oracle.schedule(ScriptedEvent::Arrive { id: 9, at: midpoint });
            }
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stationary" | "voe-001" => Ok(ScenarioId::Stationary),
            "linear_motion" | "linearmotion" | "voe-002" => Ok(ScenarioId::LinearMotion),
            "teleport" | "voe-003" => Ok(ScenarioId::Teleport),
            "vanish" | "voe-004" => Ok(ScenarioId::Vanish),
            "occluded_vanish" | "occludedvanish" | "voe-005" => Ok(ScenarioId::OccludedVanish),
            "late_arrival" | "latearrival" | "voe-006" => Ok(ScenarioId::LateArrival),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>().unwrap(), id);
        }
        assert_eq!("VOE-003".parse::<ScenarioId>().unwrap(), ScenarioId::Teleport);
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_expected_verdicts() {
        assert_eq!(ScenarioId::Teleport.expected(), Plausibility::Implausible);
        assert_eq!(ScenarioId::OccludedVanish.expected(), Plausibility::Plausible);
        assert_eq!(
            ScenarioId::OccludedVanish.occlusion_policy(),
            OcclusionPolicy::ExemptOccluded
        );
    }
}
