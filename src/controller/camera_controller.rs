use glam::Vec3;

use crate::config::CameraRigConfig;
use crate::model::Camera;

/// Third-person camera that eases toward a spot behind and above its target.
///
/// Keys never move it. The only inputs are the target position and, optionally, a
/// horizontal pointer drag that orbits the rig around the target.
pub struct FollowCamera {
    config: CameraRigConfig,
    yaw: f32,
}

impl FollowCamera {
    pub fn new(config: CameraRigConfig) -> Self {
        let yaw = config.rotation_offset;
        Self { config, yaw }
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Where the camera wants to be for a given target
    pub fn goal(&self, target: Vec3) -> Vec3 {
        let r = self.config.radius;
        target + Vec3::new(-self.yaw.sin() * r, self.config.height_offset, -self.yaw.cos() * r)
    }

    /// Place the camera at its goal immediately, used when the rig is first bound
    pub fn snap(&self, camera: &mut Camera, target: Vec3) {
        camera.fov_y = self.config.fov_y_degrees.to_radians();
        camera.eye = self.goal(target);
        camera.target = target;
    }

    /// Orbit by a horizontal pointer-drag delta in pixels
    pub fn apply_drag(&mut self, dx: f32) {
        self.yaw = (self.yaw + dx * self.config.drag_sensitivity).rem_euclid(std::f32::consts::TAU);
    }

    /// One tick of easing. Each axis closes `2 * acceleration` of its remaining gap,
    /// never more than `max_speed` units.
    pub fn update(&self, camera: &mut Camera, target: Vec3) {
        let gap = self.goal(target) - camera.eye;
        let max = Vec3::splat(self.config.max_speed);
        let step = (gap * self.config.acceleration * 2.0).clamp(-max, max);
        camera.eye += step;
        camera.target = target;
    }
}
