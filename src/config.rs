use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::controller::input::KeyBindings;
use crate::error::Result;

/// All tunables of a stage session. Every field has a default, so a partial JSON
/// document only overrides what it names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub controller: ControllerConfig,
    pub camera: CameraRigConfig,
    pub physics: PhysicsConfig,
    pub readiness: ReadinessConfig,
    pub editor: EditorConfig,
    pub surfaces: SurfaceConfig,
    pub bindings: KeyBindings,
}

impl StageConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Horizontal speed in units per second
    pub speed: f32,
    pub jump_impulse: f32,
    /// Extra ray length below the character's feet for the grounded test
    pub ground_margin: f32,
    /// Fraction of the remaining turn kept each frame (0 snaps instantly)
    pub turn_damping: f32,
    pub character_mass: f32,
    pub clips: ClipNames,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            speed: 5.0,
            jump_impulse: 6.0,
            ground_margin: 0.2,
            turn_damping: 0.8,
            character_mass: 1.0,
            clips: ClipNames::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipNames {
    pub idle: String,
    pub run: String,
    pub jump: String,
    /// Played when the wanted clip does not exist
    pub fallback: String,
}

impl Default for ClipNames {
    fn default() -> Self {
        Self {
            idle: "idle".to_string(),
            run: "run".to_string(),
            jump: "jump".to_string(),
            fallback: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraRigConfig {
    pub radius: f32,
    pub height_offset: f32,
    /// Yaw of the camera around the target, radians. 0 puts the camera on -Z looking toward +Z.
    pub rotation_offset: f32,
    pub acceleration: f32,
    pub max_speed: f32,
    pub drag_sensitivity: f32,
    pub fov_y_degrees: f32,
}

impl Default for CameraRigConfig {
    fn default() -> Self {
        Self {
            radius: 10.0,
            height_offset: 4.0,
            rotation_offset: 0.0,
            acceleration: 0.05,
            max_speed: 20.0,
            drag_sensitivity: 0.005,
            fov_y_degrees: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub gravity: [f32; 3],
    /// Fixed simulation step in seconds, independent of the frame delta
    pub fixed_dt: f32,
    pub max_substeps: u32,
    pub friction: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.81, 0.0],
            fixed_dt: 1.0 / 60.0,
            max_substeps: 5,
            friction: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub retry_interval_ms: u64,
    pub max_attempts: u32,
}

impl ReadinessConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 100,
            max_attempts: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub translate_step: f32,
    pub rotate_step_degrees: f32,
    pub scale_step: f32,
    pub min_scale: f32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            translate_step: 0.05,
            rotate_step_degrees: 2.0,
            scale_step: 0.01,
            min_scale: 0.01,
        }
    }
}

/// DOM ids of the two surfaces the bridge swaps between
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub presentation_id: String,
    pub viewport_id: String,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            presentation_id: "novel-container".to_string(),
            viewport_id: "stage-canvas".to_string(),
        }
    }
}
