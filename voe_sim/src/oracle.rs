//! Ground truth oracle for scene simulation.
//!
//! The Oracle maintains the "God's eye view" of a synthetic scene:
//! - True positions of all objects (constant-velocity kinematics)
//! - Scripted anomalies (teleports, vanishing, occlusion, late arrivals)
//! - Noisy per-frame observations and a top-down id mask

use nalgebra::{DMatrix, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use voe_core::masks::{squash_masks, Heatmap};
use voe_core::{FrameInput, FrameTime, ObjectId, Observation, Position};

/// A ground truth object in the scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthObject {
    /// Tracker id
    pub id: ObjectId,

    /// Position [x, y, z] in meters
    pub position: Vector3<f64>,

    /// Velocity in meters per frame
    pub velocity: Vector3<f64>,

    /// Footprint radius in meters, used when rasterizing
    pub radius: f64,

    /// Object is part of the scene (not yet arrived / vanished otherwise)
    pub active: bool,

    /// Object is partly hidden: drawn in the mask, position unknown
    pub occluded: bool,
}

impl GroundTruthObject {
    pub fn new(id: ObjectId, position: Vector3<f64>, velocity: Vector3<f64>) -> Self {
        Self {
            id,
            position,
            velocity,
            radius: 0.3,
            active: true,
            occluded: false,
        }
    }
}

/// Something that happens to an object at a given frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptedEvent {
    /// Instantly displace the object
    Teleport { id: ObjectId, at: FrameTime, offset: Vector3<f64> },

    /// Remove the object for good
    Vanish { id: ObjectId, at: FrameTime },

    /// Hide the object's position from `at` onwards
    Occlude { id: ObjectId, at: FrameTime },

    /// Bring an inactive object into the scene
    Arrive { id: ObjectId, at: FrameTime },
}

impl ScriptedEvent {
    pub fn frame(&self) -> FrameTime {
        match self {
            Self::Teleport { at, .. }
            | Self::Vanish { at, .. }
            | Self::Occlude { at, .. }
            | Self::Arrive { at, .. } => *at,
        }
    }
}

/// Orthographic top-down camera: x maps to columns, y to rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub rows: usize,
    pub cols: usize,

    /// World coordinates of pixel (0, 0)
    pub origin_x: f64,
    pub origin_y: f64,

    /// Meters per pixel
    pub cell_size: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            rows: 48,
            cols: 64,
            origin_x: -8.0,
            origin_y: -6.0,
            cell_size: 0.25,
        }
    }
}

impl Camera {
    /// Pixels covered by a disc of `radius` around `position`.
    pub fn footprint(&self, position: &Vector3<f64>, radius: f64) -> Heatmap {
        DMatrix::from_fn(self.rows, self.cols, |r, c| {
            let x = self.origin_x + (c as f64 + 0.5) * self.cell_size;
            let y = self.origin_y + (r as f64 + 0.5) * self.cell_size;
            let dx = x - position.x;
            let dy = y - position.y;
            dx * dx + dy * dy <= radius * radius
        })
    }
}

/// The Oracle - maintains ground truth and generates frame inputs.
pub struct Oracle {
    /// Seed for observation noise
    seed: u64,

    /// RNG for noise
    rng: ChaCha8Rng,

    /// All ground truth objects, keyed by id
    objects: BTreeMap<ObjectId, GroundTruthObject>,

    /// Events not yet applied, in frame order
    script: Vec<ScriptedEvent>,

    /// Frame about to be observed
    frame: FrameTime,

    /// Position noise standard deviation (meters)
    position_noise_std: f64,

    camera: Camera,
}

impl Oracle {
    /// Creates a new Oracle with the given noise seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            objects: BTreeMap::new(),
            script: Vec::new(),
            frame: 0,
            position_noise_std: 0.02, // 2cm by default
            camera: Camera::default(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Sets the position noise standard deviation. Negative or non-finite
    /// values disable noise.
    pub fn set_position_noise(&mut self, std_dev: f64) {
        self.position_noise_std = if std_dev.is_finite() { std_dev.max(0.0) } else { 0.0 };
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Adds an object to the scene.
    pub fn spawn(&mut self, id: ObjectId, position: Vector3<f64>, velocity: Vector3<f64>) {
        self.objects
            .insert(id, GroundTruthObject::new(id, position, velocity));
    }

    /// Adds an object that stays out of the scene until an `Arrive` event.
    pub fn spawn_hidden(&mut self, id: ObjectId, position: Vector3<f64>, velocity: Vector3<f64>) {
        let mut object = GroundTruthObject::new(id, position, velocity);
        object.active = false;
        self.objects.insert(id, object);
    }

    pub fn schedule(&mut self, event: ScriptedEvent) {
        self.script.push(event);
        self.script.sort_by_key(ScriptedEvent::frame);
    }

    /// Current frame index.
    pub fn frame(&self) -> FrameTime {
        self.frame
    }

    pub fn object(&self, id: ObjectId) -> Option<&GroundTruthObject> {
        self.objects.get(&id)
    }

    /// Applies events due this frame, then returns what the perception stack
    /// would report and advances the world by one frame.
    pub fn next_frame(&mut self) -> FrameInput {
        self.apply_events();

        let time = self.frame;
        let input = self.observe(time);

        for object in self.objects.values_mut() {
            if object.active {
                object.position += object.velocity;
            }
        }
        self.frame += 1;

        input
    }

    fn apply_events(&mut self) {
        let due = self.script.partition_point(|e| e.frame() <= self.frame);
        let events: Vec<ScriptedEvent> = self.script.drain(..due).collect();

        for event in events {
            match event {
                ScriptedEvent::Teleport { id, offset, .. } => {
                    if let Some(o) = self.objects.get_mut(&id) {
                        o.position += offset;
                    }
                }
                ScriptedEvent::Vanish { id, .. } => {
                    if let Some(o) = self.objects.get_mut(&id) {
                        o.active = false;
                    }
                }
                ScriptedEvent::Occlude { id, .. } => {
                    if let Some(o) = self.objects.get_mut(&id) {
                        o.occluded = true;
                    }
                }
                ScriptedEvent::Arrive { id, .. } => {
                    if let Some(o) = self.objects.get_mut(&id) {
                        o.active = true;
                    }
                }
            }
        }
    }

    /// Noisy observations plus the rasterized mask for `time`.
    fn observe(&mut self, time: FrameTime) -> FrameInput {
        let noise = Normal::new(0.0, self.position_noise_std).ok();

        let mut observations = Vec::new();
        let mut occluded = Vec::new();
        let mut footprints = Vec::new();

        for object in self.objects.values().filter(|o| o.active) {
            footprints.push((object.id, self.camera.footprint(&object.position, object.radius)));

            if object.occluded {
                occluded.push(object.id);
                observations.push(Observation::hidden(time, object.id, object.position));
                continue;
            }

            let mut position: Position = object.position;
            if let Some(normal) = &noise {
                position += Vector3::new(
                    normal.sample(&mut self.rng),
                    normal.sample(&mut self.rng),
                    normal.sample(&mut self.rng),
                );
            }
            observations.push(Observation::visible(time, object.id, position));
        }

        // Footprints come from the camera, so shapes always agree
        let mask = squash_masks(self.camera.rows, self.camera.cols, &footprints)
            .unwrap_or_else(|_| voe_core::masks::blank_mask(self.camera.rows, self.camera.cols));

        FrameInput {
            time,
            mask,
            observations,
            occluded,
        }
    }
}
