use glam::{Quat, Vec3};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;

use crate::config::PhysicsConfig;
use crate::model::{Aabb, Transform};

/// Collision group of everything the grounded ray may hit
pub const GROUND_GROUP: Group = Group::GROUP_1;
/// Collision group of the player body
pub const CHARACTER_GROUP: Group = Group::GROUP_2;
/// Thinnest collider half extent. Flat meshes such as ground planes get this thickness.
pub const MIN_HALF_EXTENT: f32 = 0.01;

/// Pose and collider extents of a body at creation time
#[derive(Debug, Clone, Copy)]
pub struct BodyShape {
    pub translation: Vec3,
    pub rotation: Quat,
    /// Half extents of the cuboid collider, already scaled
    pub half_extents: Vec3,
    /// Collider centre relative to the body origin, in the body's rotated frame
    pub offset: Vec3,
}

impl BodyShape {
    /// Box around local mesh `bounds` for a node placed at `transform`
    pub fn fitted(bounds: Aabb, transform: &Transform) -> Self {
        Self {
            translation: transform.translation,
            rotation: transform.rotation,
            half_extents: (bounds.half_extents() * transform.scale.abs()).max(Vec3::splat(MIN_HALF_EXTENT)),
            offset: bounds.center() * transform.scale,
        }
    }

    /// Lowest world-space height the collider reaches
    pub fn bottom(&self) -> f32 {
        let center = self.translation + self.rotation * self.offset;
        let h = self.half_extents;
        let reach = (self.rotation * Vec3::X).y.abs() * h.x
            + (self.rotation * Vec3::Y).y.abs() * h.y
            + (self.rotation * Vec3::Z).y.abs() * h.z;
        center.y - reach
    }
}

/// Rapier world stepped with a fixed timestep.
///
/// Frame deltas feed an accumulator; each call to [`PhysicsWorld::step`] runs as many
/// fixed steps as fit, capped at `max_substeps` so a long stall cannot spiral.
pub struct PhysicsWorld {
    gravity: Vector<Real>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    accumulator: f32,
    max_substeps: u32,
    friction: f32,
}

pub fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

pub fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn to_rotation(q: Quat) -> UnitQuaternion<Real> {
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

pub fn from_rotation(q: &UnitQuaternion<Real>) -> Quat {
    Quat::from_xyzw(q.i, q.j, q.k, q.w)
}

fn isometry(translation: Vec3, rotation: Quat) -> Isometry<Real> {
    Isometry::from_parts(Translation3::new(translation.x, translation.y, translation.z), to_rotation(rotation))
}

impl PhysicsWorld {
    pub fn new(config: &PhysicsConfig) -> Self {
        let params = IntegrationParameters {
            dt: config.fixed_dt,
            ..IntegrationParameters::default()
        };
        let [gx, gy, gz] = config.gravity;
        Self {
            gravity: vector![gx, gy, gz],
            params,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            accumulator: 0.0,
            max_substeps: config.max_substeps.max(1),
            friction: config.friction,
        }
    }

    pub fn fixed_dt(&self) -> f32 {
        self.params.dt
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Immovable, zero-mass body the grounded ray can hit
    pub fn add_ground(&mut self, shape: BodyShape) -> RigidBodyHandle {
        let body = RigidBodyBuilder::fixed()
            .position(isometry(shape.translation, shape.rotation))
            .build();
        let collider = self
            .cuboid(shape)
            .density(0.0)
            .collision_groups(InteractionGroups::new(GROUND_GROUP, Group::ALL))
            .build();
        self.insert(body, collider)
    }

    /// Dynamic body that never tips over
    pub fn add_character(&mut self, shape: BodyShape, mass: f32) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .position(isometry(shape.translation, shape.rotation))
            .lock_rotations()
            // rotations are locked, damping only matters if a caller unlocks them
            .angular_damping(1.0)
            .ccd_enabled(true)
            .build();
        let collider = self
            .cuboid(shape)
            .mass(mass)
            .collision_groups(InteractionGroups::new(CHARACTER_GROUP, Group::ALL))
            .build();
        self.insert(body, collider)
    }

    fn cuboid(&self, shape: BodyShape) -> ColliderBuilder {
        let h = shape.half_extents;
        ColliderBuilder::cuboid(h.x, h.y, h.z)
            .translation(to_vector(shape.offset))
            .friction(self.friction)
    }

    fn insert(&mut self, body: RigidBody, collider: Collider) -> RigidBodyHandle {
        let handle = self.bodies.insert(body);
        self.colliders.insert_with_parent(collider, handle, &mut self.bodies);
        self.query_pipeline.update(&self.colliders);
        handle
    }

    pub fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        self.query_pipeline.update(&self.colliders);
    }

    /// Advance by a frame delta. Returns the number of fixed steps taken.
    pub fn step(&mut self, frame_dt: f32) -> u32 {
        let fixed_dt = self.params.dt;
        self.accumulator += frame_dt.max(0.0);

        let mut steps = 0;
        while self.accumulator >= fixed_dt && steps < self.max_substeps {
            self.pipeline.step(
                &self.gravity,
                &self.params,
                &mut self.islands,
                &mut self.broad_phase,
                &mut self.narrow_phase,
                &mut self.bodies,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                &mut self.ccd_solver,
                Some(&mut self.query_pipeline),
                &(),
                &(),
            );
            self.accumulator -= fixed_dt;
            steps += 1;
        }
        if steps == self.max_substeps {
            // drop the backlog instead of carrying it into the next frame
            self.accumulator = self.accumulator.min(fixed_dt);
        }
        steps
    }

    pub fn pose(&self, handle: RigidBodyHandle) -> Option<(Vec3, Quat)> {
        let body = self.bodies.get(handle)?;
        let iso = body.position();
        Some((from_vector(&iso.translation.vector), from_rotation(&iso.rotation)))
    }

    /// Teleport a body, used by the editor
    pub fn set_pose(&mut self, handle: RigidBodyHandle, translation: Vec3, rotation: Quat) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_position(isometry(translation, rotation), true);
            body.set_linvel(Vector::zeros(), true);
        }
        self.query_pipeline.update(&self.colliders);
    }

    pub fn set_rotation(&mut self, handle: RigidBodyHandle, rotation: Quat) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_rotation(to_rotation(rotation), false);
        }
    }

    /// Replace the cuboid of every collider attached to `handle` and wake the body
    pub fn resize_collider(&mut self, handle: RigidBodyHandle, half_extents: Vec3, offset: Vec3) {
        let Some(body) = self.bodies.get_mut(handle) else {
            return;
        };
        for collider in body.colliders().to_vec() {
            if let Some(c) = self.colliders.get_mut(collider) {
                c.set_shape(SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z));
                c.set_translation_wrt_parent(to_vector(offset));
            }
        }
        body.wake_up(true);
        self.query_pipeline.update(&self.colliders);
    }

    pub fn linvel(&self, handle: RigidBodyHandle) -> Vec3 {
        self.bodies
            .get(handle)
            .map(|b| from_vector(b.linvel()))
            .unwrap_or(Vec3::ZERO)
    }

    /// Overwrite the horizontal velocity, keeping whatever gravity did to `y`
    pub fn set_horizontal_velocity(&mut self, handle: RigidBodyHandle, velocity: Vec3) {
        if let Some(body) = self.bodies.get_mut(handle) {
            let y = body.linvel().y;
            body.set_linvel(vector![velocity.x, y, velocity.z], velocity.x != 0.0 || velocity.z != 0.0);
        }
    }

    /// Impulse through the centre of mass, waking the body first
    pub fn apply_impulse(&mut self, handle: RigidBodyHandle, impulse: Vec3) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.wake_up(true);
            body.apply_impulse(to_vector(impulse), true);
        }
    }

    /// Mass as the simulation sees it. Fixed bodies report zero.
    pub fn mass(&self, handle: RigidBodyHandle) -> Option<f32> {
        let body = self.bodies.get(handle)?;
        Some(if body.is_fixed() { 0.0 } else { body.mass() })
    }

    pub fn is_fixed(&self, handle: RigidBodyHandle) -> bool {
        self.bodies.get(handle).is_some_and(|b| b.is_fixed())
    }

    /// World-space centre of the first collider attached to `handle`
    pub fn collider_center(&self, handle: RigidBodyHandle) -> Option<Vec3> {
        let body = self.bodies.get(handle)?;
        let collider = self.colliders.get(*body.colliders().first()?)?;
        Some(from_vector(&collider.position().translation.vector))
    }

    /// Current half extents of the first collider attached to `handle`, if it is a cuboid
    pub fn collider_half_extents(&self, handle: RigidBodyHandle) -> Option<Vec3> {
        let body = self.bodies.get(handle)?;
        let collider = self.colliders.get(*body.colliders().first()?)?;
        collider.shape().as_cuboid().map(|c| from_vector(&c.half_extents))
    }

    /// Distance to the nearest ground collider straight below `origin`, if within `max_len`.
    /// Bodies other than ground (including `exclude`) are ignored.
    pub fn cast_ground_ray(&self, origin: Vec3, max_len: f32, exclude: Option<RigidBodyHandle>) -> Option<f32> {
        let ray = Ray::new(point![origin.x, origin.y, origin.z], vector![0.0, -1.0, 0.0]);
        let mut filter = QueryFilter::new().groups(InteractionGroups::new(Group::ALL, GROUND_GROUP));
        if let Some(handle) = exclude {
            filter = filter.exclude_rigid_body(handle);
        }
        self.query_pipeline
            .cast_ray(&self.bodies, &self.colliders, &ray, max_len, true, filter)
            .map(|(_, toi)| toi)
    }
}
