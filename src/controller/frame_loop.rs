use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

use super::camera_controller::FollowCamera;
use super::character::{CharacterController, CharacterFrame, PlayerHandle};
use super::editor::SceneEditor;
use super::input::{InputProcessor, InputState};
use super::physics::PhysicsWorld;
use crate::config::StageConfig;
use crate::error::Result;
use crate::loader::LoadedStage;
use crate::model::{AnimationClip, AnimationClipSet, BridgeId, Camera, SceneGraph, SharedSelection};
use crate::ui::OverlayStats;
use crate::view::{FrameView, StageRenderer};

/// What happened during one tick that the bridge has to act on
#[derive(Debug, Default)]
pub struct TickReport {
    pub exit_requested: bool,
    pub snapshot: Option<String>,
    pub physics_steps: u32,
}

/// Everything that lives while a stage is on screen
pub struct StageRuntime {
    pub stage_key: String,
    pub scene: SceneGraph,
    pub physics: PhysicsWorld,
    pub camera: Camera,
    pub player: Option<PlayerHandle>,
    pub clips: AnimationClipSet,
    ambient_clips: Vec<AnimationClip>,
    rig: FollowCamera,
    controller: CharacterController,
    editor: Option<SceneEditor>,
    processor: InputProcessor,
    input: Rc<RefCell<InputState>>,
    renderer: Box<dyn StageRenderer>,
    selection: SharedSelection,
    owner: BridgeId,
    viewport: (u32, u32),
    stats: OverlayStats,
    elapsed_ms: f64,
}

/// Inputs for [`StageRuntime::new`]
pub struct RuntimeParts {
    pub config: StageConfig,
    pub loaded: LoadedStage,
    pub scene: SceneGraph,
    pub physics: PhysicsWorld,
    pub renderer: Box<dyn StageRenderer>,
    pub input: Rc<RefCell<InputState>>,
    pub selection: SharedSelection,
    pub owner: BridgeId,
    pub viewport: (u32, u32),
    pub debug: bool,
}

impl StageRuntime {
    pub fn new(parts: RuntimeParts) -> Self {
        let RuntimeParts {
            config,
            loaded,
            scene,
            physics,
            mut renderer,
            input,
            selection,
            owner,
            viewport,
            debug,
        } = parts;

        let mut camera = Camera::new(viewport.0, viewport.1);
        let rig = FollowCamera::new(config.camera.clone());
        if let Some(node) = loaded.player.map(|p| p.node) {
            rig.snap(&mut camera, scene.world_matrix(node).w_axis.truncate());
        }
        renderer.resize(viewport.0, viewport.1);

        let editor = debug.then(|| SceneEditor::new(config.editor.clone(), selection.clone(), owner));
        let stats = OverlayStats {
            stage_name: loaded.stage_name.clone(),
            debug,
            ..Default::default()
        };

        Self {
            stage_key: loaded.stage_key,
            scene,
            physics,
            camera,
            player: loaded.player,
            clips: loaded.clips,
            ambient_clips: loaded.ambient_clips,
            rig,
            controller: CharacterController::new(config.controller),
            editor,
            processor: InputProcessor::new(config.bindings),
            input,
            renderer,
            selection,
            owner,
            viewport,
            stats,
            elapsed_ms: 0.0,
        }
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn stats(&self) -> &OverlayStats {
        &self.stats
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == self.viewport {
            return;
        }
        debug!(width, height, "stage viewport resized");
        self.viewport = (width, height);
        self.camera.set_aspect(width, height);
        self.renderer.resize(width, height);
    }

    /// One frame: input, controller or editor, fixed physics steps, node sync,
    /// animation, camera, render
    pub fn tick(&mut self, dt: f32) -> Result<TickReport> {
        let mut report = TickReport::default();
        self.elapsed_ms += dt as f64 * 1000.0;

        let resize = self.input.borrow_mut().take_resize();
        if let Some((w, h)) = resize {
            self.resize(w, h);
        }

        // a background instance keeps drawing but never acts on input
        let foreground = self.selection.is_foreground(self.owner);
        let input_cell = self.input.clone();
        let mut input = input_cell.borrow_mut();
        if !foreground {
            input.end_frame();
            input.consume_drag();
        }

        if foreground && self.processor.exit_pressed(&input) {
            info!(stage_key = %self.stage_key, "exit requested");
            input.end_frame();
            report.exit_requested = true;
            return Ok(report);
        }

        let mut editing = false;
        if let Some(editor) = self.editor.as_mut().filter(|_| foreground) {
            let frame = editor.update(
                &mut self.scene,
                &mut self.physics,
                &self.camera,
                &mut input,
                &self.processor,
                self.viewport,
            )?;
            report.snapshot = frame.exported;
            editing = editor.mode().is_active();
        }

        let mut character: Option<CharacterFrame> = None;
        if let Some(player) = self.player {
            if foreground && !editing {
                character = Some(self.controller.update(
                    &player,
                    &mut self.physics,
                    &self.camera,
                    &input,
                    &self.processor,
                    &mut self.clips,
                ));
            } else {
                // keep gravity in charge, drop any stale horizontal drive
                self.physics.set_horizontal_velocity(player.body, glam::Vec3::ZERO);
            }
        }

        report.physics_steps = self.physics.step(dt);
        self.sync_bodies();

        // clips would overwrite the nudges on the object being edited
        let held = if editing { self.selection.selected_by(self.owner) } else { None };
        self.clips.advance(dt, &mut self.scene, held);
        for clip in &mut self.ambient_clips {
            clip.advance(dt, &mut self.scene, held);
        }

        let (dx, _) = input.consume_drag();
        self.rig.apply_drag(dx);
        if let Some(player) = self.player {
            let target = self.scene.world_matrix(player.node).w_axis.truncate();
            self.rig.update(&mut self.camera, target);
        }
        input.end_frame();
        drop(input);

        self.update_stats(dt, character);
        self.renderer.render(&FrameView {
            scene: &self.scene,
            camera: &self.camera,
            selected: self.selection.selected_by(self.owner),
            overlay: &self.stats,
            now: self.elapsed_ms,
        })?;
        Ok(report)
    }

    /// Copy simulated poses onto their nodes. Stage objects sit at the scene root,
    /// so the body pose is the node's local transform.
    fn sync_bodies(&mut self) {
        let bodies: Vec<_> = self
            .scene
            .iter()
            .filter_map(|(id, n)| n.body.filter(|b| !self.physics.is_fixed(*b)).map(|b| (id, b)))
            .collect();
        for (id, body) in bodies {
            if let (Some((translation, rotation)), Some(node)) = (self.physics.pose(body), self.scene.get_mut(id)) {
                node.transform.translation = translation;
                node.transform.rotation = rotation;
            }
        }
    }

    fn update_stats(&mut self, dt: f32, character: Option<CharacterFrame>) {
        if dt > 0.0 {
            let fps = 1.0 / dt;
            self.stats.fps = if self.stats.fps == 0.0 { fps } else { self.stats.fps * 0.9 + fps * 0.1 };
        }
        self.stats.player_pos = self
            .player
            .map(|p| self.scene.world_matrix(p.node).w_axis.truncate());
        if let Some(frame) = character {
            self.stats.locomotion = frame.locomotion;
            self.stats.grounded = frame.grounded;
        }
        if let Some(editor) = &self.editor {
            self.stats.edit_mode = editor.mode();
            self.stats.selection = editor
                .selected()
                .and_then(|id| self.scene.get(id))
                .map(|n| n.name.clone());
        }
    }

    pub fn is_grounded(&self) -> bool {
        self.player
            .is_some_and(|p| self.controller.is_grounded(&p, &self.physics))
    }

    /// Release the renderer and drop scene content. The runtime is unusable afterwards.
    pub fn dispose(&mut self) {
        self.clips.stop_all();
        self.ambient_clips.clear();
        self.renderer.dispose();
        self.scene.clear();
        self.player = None;
    }
}
