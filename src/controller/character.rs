use glam::{Quat, Vec3};
use rapier3d::prelude::RigidBodyHandle;
use tracing::debug;

use super::input::{Directions, InputProcessor, InputState};
use super::physics::PhysicsWorld;
use crate::config::{ClipNames, ControllerConfig};
use crate::model::{AnimationClipSet, Camera, NodeId};

/// Dot product above which two orientations count as equal and the turn snaps
const FACING_EPSILON: f32 = 1e-6;

/// The single player-controlled instance of a stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerHandle {
    pub node: NodeId,
    pub body: RigidBodyHandle,
    /// Scaled half extents of the player's collider
    pub half_extents: Vec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LocomotionState {
    #[default]
    Idle,
    Running,
    Airborne,
}

impl LocomotionState {
    pub fn from_flags(grounded: bool, has_horizontal_input: bool) -> Self {
        match (grounded, has_horizontal_input) {
            (false, _) => LocomotionState::Airborne,
            (true, true) => LocomotionState::Running,
            (true, false) => LocomotionState::Idle,
        }
    }

    pub fn clip<'a>(&self, clips: &'a ClipNames) -> &'a str {
        match self {
            LocomotionState::Idle => &clips.idle,
            LocomotionState::Running => &clips.run,
            LocomotionState::Airborne => &clips.jump,
        }
    }
}

/// Horizontal velocity for the held directions, relative to where the camera looks.
/// Opposite directions cancel. The result has length `speed` or zero.
pub fn movement_vector(dirs: Directions, camera_forward: Vec3, speed: f32) -> Vec3 {
    let forward = Vec3::new(camera_forward.x, 0.0, camera_forward.z).normalize_or_zero();
    let right = forward.cross(Vec3::Y);

    let mut movement = Vec3::ZERO;
    if dirs.forward {
        movement += forward;
    }
    if dirs.backward {
        movement -= forward;
    }
    if dirs.right {
        movement += right;
    }
    if dirs.left {
        movement -= right;
    }
    movement.normalize_or_zero() * speed
}

/// Upright orientation looking along `movement`
pub fn facing_for(movement: Vec3) -> Quat {
    Quat::from_rotation_y(movement.x.atan2(movement.z))
}

/// One smoothing step from `current` toward `target`. `damping` is the share of the
/// remaining turn kept this step, so 0 turns instantly. Returns `target` exactly once
/// the two are within epsilon.
pub fn turn_toward(current: Quat, target: Quat, damping: f32) -> Quat {
    if current.dot(target).abs() >= 1.0 - FACING_EPSILON {
        return target;
    }
    current.slerp(target, (1.0 - damping).clamp(0.0, 1.0)).normalize()
}

/// What the controller did in one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacterFrame {
    pub grounded: bool,
    pub locomotion: LocomotionState,
    pub velocity: Vec3,
    pub jumped: bool,
}

pub struct CharacterController {
    config: ControllerConfig,
    state: LocomotionState,
}

impl CharacterController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            state: LocomotionState::Idle,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> LocomotionState {
        self.state
    }

    /// Ray straight down from the collider centre, `half height + margin` long,
    /// hitting ground-tagged colliders only
    pub fn is_grounded(&self, player: &PlayerHandle, physics: &PhysicsWorld) -> bool {
        let Some(origin) = physics.collider_center(player.body) else {
            return false;
        };
        // the editor may have resized the collider since the handle was made
        let half_height = physics
            .collider_half_extents(player.body)
            .map_or(player.half_extents.y, |h| h.y);
        let reach = half_height + self.config.ground_margin;
        physics.cast_ground_ray(origin, reach, Some(player.body)).is_some()
    }

    /// Read input, push velocity/orientation/impulse commands into the physics world and
    /// pick the animation clip. Runs before the physics step of the same tick.
    pub fn update(
        &mut self,
        player: &PlayerHandle,
        physics: &mut PhysicsWorld,
        camera: &Camera,
        input: &InputState,
        processor: &InputProcessor,
        clips: &mut AnimationClipSet,
    ) -> CharacterFrame {
        let grounded = self.is_grounded(player, physics);

        let dirs = processor.directions(input);
        let movement = movement_vector(dirs, camera.forward(), self.config.speed);
        let moving = movement != Vec3::ZERO;
        physics.set_horizontal_velocity(player.body, movement);

        if moving {
            if let Some((_, current)) = physics.pose(player.body) {
                let facing = turn_toward(current, facing_for(movement), self.config.turn_damping);
                physics.set_rotation(player.body, facing);
            }
        }

        let jumped = grounded && processor.jump_pressed(input);
        if jumped {
            physics.apply_impulse(player.body, Vec3::Y * self.config.jump_impulse);
        }

        let locomotion = LocomotionState::from_flags(grounded, moving);
        if locomotion != self.state {
            debug!(from = ?self.state, to = ?locomotion, "locomotion transition");
            self.state = locomotion;
        }
        clips.play_exclusive(locomotion.clip(&self.config.clips), &self.config.clips.fallback);

        CharacterFrame {
            grounded,
            locomotion,
            velocity: movement,
            jumped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhysicsConfig;
    use crate::controller::input::InputEvent;
    use crate::controller::physics::BodyShape;

    const SPEED: f32 = 5.0;

    fn dirs(forward: bool, backward: bool, left: bool, right: bool) -> Directions {
        Directions { forward, backward, left, right }
    }

    #[test]
    fn forward_follows_camera() {
        let v = movement_vector(dirs(true, false, false, false), Vec3::Z, SPEED);
        assert!(v.abs_diff_eq(Vec3::new(0.0, 0.0, SPEED), 1e-6));

        // pitched camera still moves horizontally at full speed
        let v = movement_vector(dirs(true, false, false, false), Vec3::new(0.0, -0.5, 1.0), SPEED);
        assert!(v.abs_diff_eq(Vec3::new(0.0, 0.0, SPEED), 1e-5));
    }

    #[test]
    fn diagonal_is_normalized() {
        let v = movement_vector(dirs(true, false, true, false), Vec3::Z, SPEED);
        assert!((v.length() - SPEED).abs() < 1e-5);
        assert!(v.x > 0.0 && v.z > 0.0, "left of a +Z camera is +X: {v:?}");
        assert_eq!(v.y, 0.0);
    }

    #[test]
    fn opposite_keys_cancel() {
        assert_eq!(movement_vector(dirs(true, true, false, false), Vec3::Z, SPEED), Vec3::ZERO);
    }

    #[test]
    fn turning_is_idempotent_at_target() {
        let target = facing_for(Vec3::X);
        let mut q = Quat::IDENTITY;
        for _ in 0..200 {
            q = turn_toward(q, target, 0.8);
        }
        assert_eq!(q, target);
        assert_eq!(turn_toward(q, target, 0.8), target);
    }

    #[test]
    fn smaller_damping_turns_faster() {
        let target = facing_for(-Vec3::X);
        let snappy = turn_toward(Quat::IDENTITY, target, 0.2);
        let slow = turn_toward(Quat::IDENTITY, target, 0.8);
        assert!(snappy.dot(target).abs() > slow.dot(target).abs());
        assert!(turn_toward(Quat::IDENTITY, target, 0.0).abs_diff_eq(target, 1e-5));
    }

    #[test]
    fn locomotion_from_flags() {
        assert_eq!(LocomotionState::from_flags(true, true), LocomotionState::Running);
        assert_eq!(LocomotionState::from_flags(true, false), LocomotionState::Idle);
        assert_eq!(LocomotionState::from_flags(false, true), LocomotionState::Airborne);
        assert_eq!(LocomotionState::from_flags(false, false), LocomotionState::Airborne);
    }

    fn world_with_player(y: f32) -> (PhysicsWorld, PlayerHandle) {
        let mut physics = PhysicsWorld::new(&PhysicsConfig::default());
        physics.add_ground(BodyShape {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            half_extents: Vec3::new(10.0, 0.5, 10.0),
            offset: Vec3::new(0.0, -0.5, 0.0),
        });
        let half_extents = Vec3::splat(0.5);
        let body = physics.add_character(
            BodyShape {
                translation: Vec3::new(0.0, y, 0.0),
                rotation: Quat::IDENTITY,
                half_extents,
                offset: Vec3::ZERO,
            },
            1.0,
        );
        let mut scene = crate::model::SceneGraph::new();
        let node = scene.add_node("player", None, Default::default());
        (physics, PlayerHandle { node, body, half_extents })
    }

    #[test]
    fn grounded_iff_within_margin() {
        let controller = CharacterController::new(ControllerConfig::default());
        let (physics, player) = world_with_player(0.6);
        assert!(controller.is_grounded(&player, &physics));

        let (physics, player) = world_with_player(0.5 + 0.2 + 0.05);
        assert!(!controller.is_grounded(&player, &physics));
    }

    #[test]
    fn grounded_reach_follows_a_resized_collider() {
        let controller = CharacterController::new(ControllerConfig::default());
        let (mut physics, player) = world_with_player(1.0);
        assert!(!controller.is_grounded(&player, &physics));

        // grown to two units tall with its bottom on the ground
        physics.resize_collider(player.body, Vec3::new(0.5, 1.0, 0.5), Vec3::ZERO);
        assert!(controller.is_grounded(&player, &physics));
    }

    #[test]
    fn jump_needs_ground() {
        let processor = InputProcessor::default();
        let camera = Camera::new(4, 3);
        let mut clips = AnimationClipSet::default();
        let mut input = InputState::new();
        input.process_event(&InputEvent::KeyDown(" ".into()));

        let (mut physics, player) = world_with_player(3.0);
        let mut controller = CharacterController::new(ControllerConfig::default());
        let frame = controller.update(&player, &mut physics, &camera, &input, &processor, &mut clips);
        assert!(!frame.jumped);
        assert_eq!(frame.locomotion, LocomotionState::Airborne);
        physics.step(1.0 / 60.0);
        assert!(physics.linvel(player.body).y <= 0.0, "only gravity acts");

        let (mut physics, player) = world_with_player(0.5);
        physics.step(1.0 / 60.0);
        let frame = controller.update(&player, &mut physics, &camera, &input, &processor, &mut clips);
        assert!(frame.jumped);
        physics.step(1.0 / 60.0);
        assert!(physics.linvel(player.body).y > 5.0);
    }
}
