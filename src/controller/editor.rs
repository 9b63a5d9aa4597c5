use glam::{EulerRot, Quat, Vec3};
use tracing::{debug, info};

use super::input::{Directions, InputProcessor, InputState};
use super::physics::{BodyShape, PhysicsWorld};
use crate::config::EditorConfig;
use crate::error::Result;
use crate::model::{BridgeId, Camera, NodeId, ObjectPlacement, SceneGraph, SharedSelection};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EditMode {
    #[default]
    Off,
    Translate,
    Rotate,
    Scale,
}

impl EditMode {
    pub fn is_active(self) -> bool {
        self != EditMode::Off
    }
}

/// Result of one editor tick
#[derive(Debug, Default)]
pub struct EditorFrame {
    pub picked: Option<Option<NodeId>>,
    pub nudged: bool,
    pub exported: Option<String>,
}

/// Debug-only overlay for placing stage objects by hand
pub struct SceneEditor {
    config: EditorConfig,
    mode: EditMode,
    selection: SharedSelection,
    owner: BridgeId,
}

impl SceneEditor {
    pub fn new(config: EditorConfig, selection: SharedSelection, owner: BridgeId) -> Self {
        Self {
            config,
            mode: EditMode::Off,
            selection,
            owner,
        }
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn selected(&self) -> Option<NodeId> {
        self.selection.selected_by(self.owner)
    }

    /// Pressing a mode key enters that mode, pressing it again leaves edit mode
    pub fn handle_mode_keys(&mut self, input: &InputState, processor: &InputProcessor) {
        let b = processor.bindings();
        let requested = [
            (&b.edit_translate, EditMode::Translate),
            (&b.edit_rotate, EditMode::Rotate),
            (&b.edit_scale, EditMode::Scale),
        ]
        .into_iter()
        .find(|(key, _)| input.was_just_pressed(key))
        .map(|(_, mode)| mode);

        if let Some(mode) = requested {
            self.mode = if self.mode == mode { EditMode::Off } else { mode };
            info!(mode = ?self.mode, "edit mode");
        }
    }

    /// Select the stage object under the pointer, or clear the selection on a miss
    pub fn pick(&self, scene: &SceneGraph, camera: &Camera, x: f32, y: f32, viewport: (u32, u32)) -> Option<NodeId> {
        let (origin, dir) = camera.screen_ray(x, y, viewport.0, viewport.1);
        let hit = scene
            .pick(origin, dir)
            .map(|(id, _)| id)
            .filter(|id| scene.get(*id).is_some_and(|n| n.stage_object.is_some()));
        self.selection.select(self.owner, hit);
        debug!(node = ?hit.and_then(|id| scene.get(id)).map(|n| n.name.as_str()), "pick");
        hit
    }

    /// Apply one frame of nudges to the selection. Returns whether anything moved.
    pub fn nudge(&self, scene: &mut SceneGraph, physics: &mut PhysicsWorld, dirs: Directions, vertical: bool) -> bool {
        if !self.mode.is_active() || !dirs.any() {
            return false;
        }
        let Some(id) = self.selected() else {
            return false;
        };
        let Some(node) = scene.get_mut(id) else {
            self.selection.select(self.owner, None);
            return false;
        };

        let axis = |pos: bool, neg: bool| (pos as i8 - neg as i8) as f32;
        let lateral = axis(dirs.right, dirs.left);
        let depth = axis(dirs.forward, dirs.backward);
        let bounds = node.geometry.as_ref().map(|g| g.bounds);
        let before = node.transform;
        let t = &mut node.transform;

        match self.mode {
            EditMode::Translate => {
                let step = self.config.translate_step;
                let delta = if vertical {
                    Vec3::new(lateral, depth, 0.0)
                } else {
                    Vec3::new(lateral, 0.0, depth)
                };
                t.translation += delta * step;
            }
            EditMode::Rotate => {
                let step = self.config.rotate_step_degrees.to_radians();
                let tilt_axis = if vertical { Vec3::Z } else { Vec3::X };
                let delta = Quat::from_axis_angle(Vec3::Y, lateral * step)
                    * Quat::from_axis_angle(tilt_axis, depth * step);
                t.rotation = (delta * t.rotation).normalize();
            }
            EditMode::Scale => {
                let step = self.config.scale_step;
                let delta = if vertical {
                    Vec3::new(lateral, depth, 0.0)
                } else {
                    Vec3::new(lateral, 0.0, depth)
                };
                t.scale = (t.scale + delta * step).max(Vec3::splat(self.config.min_scale));
            }
            EditMode::Off => return false,
        }

        let Some(body) = node.body else {
            return true;
        };
        let Some(bounds) = bounds else {
            physics.set_pose(body, t.translation, t.rotation);
            return true;
        };
        let shape = BodyShape::fitted(bounds, t);
        if self.mode == EditMode::Scale && !physics.is_fixed(body) {
            // dynamic bodies keep their collider's bottom face where it was
            t.translation.y += BodyShape::fitted(bounds, &before).bottom() - shape.bottom();
        }
        physics.set_pose(body, t.translation, t.rotation);
        physics.resize_collider(body, shape.half_extents, shape.offset);
        true
    }

    /// Current transforms of every stage object, in load order
    pub fn snapshot(scene: &SceneGraph) -> Vec<ObjectPlacement> {
        scene
            .iter()
            .filter_map(|(id, node)| {
                let object = node.stage_object.as_ref()?;
                let world = crate::model::Transform::from_matrix(scene.world_matrix(id));
                let (x, y, z) = world.rotation.to_euler(EulerRot::XYZ);
                Some(
                    ObjectPlacement::new(&object.model_key, &node.name, world.translation, object.role)
                        .with_rotation(Vec3::new(x, y, z))
                        .with_scale(world.scale),
                )
            })
            .collect()
    }

    pub fn export_json(scene: &SceneGraph) -> Result<String> {
        Ok(serde_json::to_string_pretty(&Self::snapshot(scene))?)
    }

    /// Mode keys, picking, nudges and export for one tick
    pub fn update(
        &mut self,
        scene: &mut SceneGraph,
        physics: &mut PhysicsWorld,
        camera: &Camera,
        input: &mut InputState,
        processor: &InputProcessor,
        viewport: (u32, u32),
    ) -> Result<EditorFrame> {
        let mut frame = EditorFrame::default();
        self.handle_mode_keys(input, processor);

        if let Some((x, y)) = input.take_pointer_clicks().pop() {
            frame.picked = Some(self.pick(scene, camera, x, y, viewport));
        }

        frame.nudged = self.nudge(scene, physics, processor.directions(input), processor.vertical_held(input));

        if processor.export_pressed(input) {
            let json = Self::export_json(scene)?;
            info!(objects = Self::snapshot(scene).len(), "exported stage snapshot");
            frame.exported = Some(json);
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhysicsConfig;
    use crate::controller::input::{InputEvent, MouseButton};
    use crate::model::{Geometry, Role, StageObject, Transform};

    fn scene_with_box(at: Vec3) -> (SceneGraph, NodeId) {
        let mut scene = SceneGraph::new();
        let id = scene.add_mesh(
            "crate_01",
            None,
            Transform::from_translation(at),
            Geometry::cuboid(Vec3::splat(-0.5), Vec3::splat(0.5), [1.0; 4]),
        );
        scene.get_mut(id).unwrap().stage_object = Some(StageObject {
            model_key: "crate".into(),
            role: Role::Decor,
        });
        (scene, id)
    }

    /// Editor of the foreground instance, plus the id it selects under
    fn foreground_editor() -> (SceneEditor, SharedSelection, BridgeId) {
        let selection = SharedSelection::new();
        let owner = selection.register();
        selection.claim_foreground(owner);
        (SceneEditor::new(EditorConfig::default(), selection.clone(), owner), selection, owner)
    }

    fn camera_looking_at_origin() -> Camera {
        let mut camera = Camera::new(100, 100);
        camera.eye = Vec3::new(0.0, 0.0, -5.0);
        camera.target = Vec3::ZERO;
        camera
    }

    #[test]
    fn pick_hit_selects_and_miss_clears() {
        let (scene, id) = scene_with_box(Vec3::ZERO);
        let (editor, _, _) = foreground_editor();
        let camera = camera_looking_at_origin();

        assert_eq!(editor.pick(&scene, &camera, 50.0, 50.0, (100, 100)), Some(id));
        assert_eq!(editor.selected(), Some(id));
        assert_eq!(editor.pick(&scene, &camera, 1.0, 1.0, (100, 100)), None);
        assert_eq!(editor.selected(), None);
    }

    #[test]
    fn mode_keys_toggle() {
        let (mut editor, _, _) = foreground_editor();
        let processor = InputProcessor::default();
        let mut input = InputState::new();

        input.process_event(&InputEvent::KeyDown("2".into()));
        editor.handle_mode_keys(&input, &processor);
        assert_eq!(editor.mode(), EditMode::Rotate);

        input.end_frame();
        input.process_event(&InputEvent::KeyUp("2".into()));
        input.process_event(&InputEvent::KeyDown("2".into()));
        editor.handle_mode_keys(&input, &processor);
        assert_eq!(editor.mode(), EditMode::Off);
    }

    #[test]
    fn translate_nudge_uses_vertical_modifier() {
        let (mut scene, id) = scene_with_box(Vec3::ZERO);
        let mut physics = PhysicsWorld::new(&PhysicsConfig::default());
        let (mut editor, selection, owner) = foreground_editor();
        selection.select(owner, Some(id));
        editor.mode = EditMode::Translate;

        let forward = Directions { forward: true, ..Default::default() };
        assert!(editor.nudge(&mut scene, &mut physics, forward, false));
        assert!(editor.nudge(&mut scene, &mut physics, forward, true));
        let t = scene.get(id).unwrap().transform.translation;
        assert!(t.abs_diff_eq(Vec3::new(0.0, 0.05, 0.05), 1e-6));
    }

    #[test]
    fn scale_never_collapses() {
        let (mut scene, id) = scene_with_box(Vec3::ZERO);
        let mut physics = PhysicsWorld::new(&PhysicsConfig::default());
        let (mut editor, selection, owner) = foreground_editor();
        selection.select(owner, Some(id));
        editor.mode = EditMode::Scale;

        let left = Directions { left: true, ..Default::default() };
        for _ in 0..500 {
            editor.nudge(&mut scene, &mut physics, left, false);
        }
        assert_eq!(scene.get(id).unwrap().transform.scale.x, 0.01);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let (mut scene, id) = scene_with_box(Vec3::new(1.0, 2.0, 3.0));
        {
            let t = &mut scene.get_mut(id).unwrap().transform;
            t.rotation = Quat::from_euler(EulerRot::XYZ, 0.1, 0.7, -0.2);
            t.scale = Vec3::new(2.0, 1.0, 0.5);
        }
        let json = SceneEditor::export_json(&scene).unwrap();
        let placements: Vec<ObjectPlacement> = serde_json::from_str(&json).unwrap();

        assert_eq!(placements.len(), 1);
        let p = &placements[0];
        assert_eq!((p.model_key.as_str(), p.name.as_str(), p.role), ("crate", "crate_01", Role::Decor));
        assert!(p.position().abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-5));
        assert!(p.scale().abs_diff_eq(Vec3::new(2.0, 1.0, 0.5), 1e-5));
        assert!(p.rotation().abs_diff_eq(Quat::from_euler(EulerRot::XYZ, 0.1, 0.7, -0.2), 1e-5));
    }

    #[test]
    fn export_key_emits_json() {
        let (mut scene, _) = scene_with_box(Vec3::ZERO);
        let mut physics = PhysicsWorld::new(&PhysicsConfig::default());
        let (mut editor, _, _) = foreground_editor();
        let processor = InputProcessor::default();
        let mut input = InputState::new();
        input.process_event(&InputEvent::KeyDown("P".into()));
        input.process_event(&InputEvent::PointerDown { button: MouseButton::Left, x: 50.0, y: 50.0 });

        let frame = editor
            .update(&mut scene, &mut physics, &camera_looking_at_origin(), &mut input, &processor, (100, 100))
            .unwrap();
        assert!(frame.exported.unwrap().contains("\"key\": \"crate\""));
        assert!(matches!(frame.picked, Some(Some(_))));
    }

    #[test]
    fn scaling_a_dynamic_body_keeps_its_bottom_face() {
        let (mut scene, id) = scene_with_box(Vec3::new(0.0, 0.5, 0.0));
        let mut physics = PhysicsWorld::new(&PhysicsConfig::default());
        let node = scene.get(id).unwrap();
        let body = physics.add_character(BodyShape::fitted(node.geometry.as_ref().unwrap().bounds, &node.transform), 1.0);
        scene.get_mut(id).unwrap().body = Some(body);
        let (mut editor, selection, owner) = foreground_editor();
        selection.select(owner, Some(id));
        editor.mode = EditMode::Scale;

        let up = Directions { forward: true, ..Default::default() };
        for _ in 0..100 {
            editor.nudge(&mut scene, &mut physics, up, true);
        }

        let node = scene.get(id).unwrap();
        assert!((node.transform.scale.y - 2.0).abs() < 1e-4);
        assert!((node.transform.translation.y - 1.0).abs() < 1e-4, "lifted by the growth");
        let half = physics.collider_half_extents(body).unwrap();
        let (pose, _) = physics.pose(body).unwrap();
        assert!((half.y - 1.0).abs() < 1e-4);
        assert!((pose.y - half.y).abs() < 1e-4, "bottom face still at y = 0");
    }

    #[test]
    fn scaling_ground_leaves_it_in_place() {
        let (mut scene, id) = scene_with_box(Vec3::ZERO);
        let mut physics = PhysicsWorld::new(&PhysicsConfig::default());
        let node = scene.get(id).unwrap();
        let body = physics.add_ground(BodyShape::fitted(node.geometry.as_ref().unwrap().bounds, &node.transform));
        scene.get_mut(id).unwrap().body = Some(body);
        let (mut editor, selection, owner) = foreground_editor();
        selection.select(owner, Some(id));
        editor.mode = EditMode::Scale;

        let up = Directions { forward: true, ..Default::default() };
        editor.nudge(&mut scene, &mut physics, up, true);
        assert_eq!(scene.get(id).unwrap().transform.translation, Vec3::ZERO);
        assert!((physics.collider_half_extents(body).unwrap().y - 0.505).abs() < 1e-5);
    }

    #[test]
    fn background_editor_sees_no_selection() {
        let (scene, id) = scene_with_box(Vec3::ZERO);
        let (front, selection, _) = foreground_editor();
        let back = SceneEditor::new(EditorConfig::default(), selection.clone(), selection.register());
        let camera = camera_looking_at_origin();

        assert_eq!(front.pick(&scene, &camera, 50.0, 50.0, (100, 100)), Some(id));
        assert_eq!(front.selected(), Some(id));
        assert_eq!(back.selected(), None);
    }
}
