//! Test doubles shared by the integration tests: an in-memory importer, a host that
//! records what the bridge asks of it, and a renderer that only counts frames.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use glam::Vec3;
use odyssey_stage::controller::{InputEvent, InputProcessor, InputState};
use odyssey_stage::host::{FrameCallback, StageHost};
use odyssey_stage::loader::{ImportedAnimation, ImportedModel, ImportedNode, ImportedTrack};
use odyssey_stage::model::{
    AssetRegistry, Geometry, Keyframes, ModelResource, NodeId, ObjectPlacement, Role, StageDefinition, Transform,
};
use odyssey_stage::view::{FrameView, StageRenderer};
use odyssey_stage::{ModelImporter, Result, StageError};

pub const STAGE: &str = "stage_01_tutorial";

/// Unit cube centred on its origin
pub fn unit_cube() -> Geometry {
    Geometry::cuboid(Vec3::splat(-0.5), Vec3::splat(0.5), [0.9, 0.6, 0.3, 1.0])
}

/// Flat 20x20 slab whose top face is at local y = 0
pub fn ground_slab() -> Geometry {
    Geometry::cuboid(Vec3::new(-10.0, -0.5, -10.0), Vec3::new(10.0, 0.0, 10.0), [0.3, 0.6, 0.3, 1.0])
}

fn scale_clip(name: &str, node: usize) -> ImportedAnimation {
    ImportedAnimation {
        name: name.to_string(),
        tracks: vec![ImportedTrack {
            node,
            times: vec![0.0, 1.0],
            values: Keyframes::Scale(vec![Vec3::ONE, Vec3::ONE]),
        }],
    }
}

/// Character model as exporters usually ship it: a wrapper node above the mesh
pub fn hero_model() -> ImportedModel {
    ImportedModel {
        nodes: vec![
            ImportedNode {
                name: "Armature".into(),
                parent: None,
                transform: Transform::from_translation(Vec3::new(0.0, 0.0, 2.0)),
                geometry: None,
            },
            ImportedNode {
                name: "HeroMesh".into(),
                parent: Some(0),
                transform: Transform::IDENTITY,
                geometry: Some(unit_cube()),
            },
        ],
        animations: vec![scale_clip("idle", 1), scale_clip("run", 1), scale_clip("jump", 0)],
    }
}

/// Model that imports fine but has nothing to draw
pub fn empty_model() -> ImportedModel {
    ImportedModel {
        nodes: vec![ImportedNode {
            name: "Empty".into(),
            parent: None,
            transform: Transform::IDENTITY,
            geometry: None,
        }],
        animations: Vec::new(),
    }
}

/// Serves models from memory. Keys without a model fail to import.
#[derive(Default)]
pub struct FixtureImporter {
    models: HashMap<String, ImportedModel>,
    pub imports: Cell<u32>,
}

impl FixtureImporter {
    pub fn new() -> Self {
        let mut importer = Self::default();
        importer.insert("ground", ImportedModel::single_mesh("GroundMesh", ground_slab()));
        importer.insert("hero", hero_model());
        importer.insert("crate", ImportedModel::single_mesh("CrateMesh", unit_cube()));
        importer.insert(
            "plane",
            ImportedModel::single_mesh(
                "PlaneMesh",
                Geometry::cuboid(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 0.0, 1.0), [1.0; 4]),
            ),
        );
        importer.insert(
            "speck",
            ImportedModel::single_mesh("SpeckMesh", Geometry::cuboid(Vec3::ZERO, Vec3::ZERO, [1.0; 4])),
        );
        importer.insert("empty", empty_model());
        importer
    }

    pub fn insert(&mut self, key: &str, model: ImportedModel) {
        self.models.insert(key.to_string(), model);
    }
}

impl ModelImporter for FixtureImporter {
    async fn import(&self, model_key: &str, _resource: &ModelResource) -> Result<ImportedModel> {
        self.imports.set(self.imports.get() + 1);
        self.models
            .get(model_key)
            .cloned()
            .ok_or_else(|| StageError::import(model_key, "file not found"))
    }
}

/// Every model key the fixtures know about, plus one whose file is missing
pub fn registry_with(objects: Vec<ObjectPlacement>) -> AssetRegistry {
    let mut registry = AssetRegistry::new();
    for key in ["ground", "hero", "crate", "plane", "speck", "empty", "missing_file"] {
        registry.insert_model(
            key,
            ModelResource {
                root_url: "/models/".into(),
                file_name: format!("{key}.glb"),
            },
        );
    }
    registry.insert_stage(StageDefinition {
        key: STAGE.into(),
        name: "Tutorial".into(),
        objects,
    });
    registry
}

/// Ground at the origin, the hero dropped from y = 3, one decorative crate
pub fn tutorial_objects() -> Vec<ObjectPlacement> {
    vec![
        ObjectPlacement::new("ground", "ground", Vec3::ZERO, Role::StaticGround),
        ObjectPlacement::new("hero", "hero", Vec3::new(0.0, 3.0, 0.0), Role::DynamicCharacter),
        ObjectPlacement::new("crate", "crate_a", Vec3::new(3.0, 0.5, 3.0), Role::Decor),
    ]
}

pub fn tutorial_registry() -> AssetRegistry {
    registry_with(tutorial_objects())
}

#[derive(Debug, Default)]
pub struct RenderLog {
    pub frames: Cell<u32>,
    pub disposed: Cell<u32>,
    pub last_size: Cell<(u32, u32)>,
    pub last_mesh_count: Cell<usize>,
    /// Node the last frame highlighted
    pub last_selected: Cell<Option<NodeId>>,
}

pub struct RecordingRenderer {
    log: Rc<RenderLog>,
}

impl StageRenderer for RecordingRenderer {
    fn resize(&mut self, width: u32, height: u32) {
        self.log.last_size.set((width, height));
    }

    fn render(&mut self, frame: &FrameView<'_>) -> Result<()> {
        self.log.frames.set(self.log.frames.get() + 1);
        let meshes = frame.scene.iter().filter(|(_, n)| n.geometry.is_some()).count();
        self.log.last_mesh_count.set(meshes);
        self.log.last_selected.set(frame.selected);
        Ok(())
    }

    fn dispose(&mut self) {
        self.log.disposed.set(self.log.disposed.get() + 1);
    }
}

/// Host double. The render loop is driven by hand with [`TestHost::run_frame`].
pub struct TestHost {
    /// `engines_available` turns true on this poll (1-based); `None` never
    pub ready_on_poll: Option<u32>,
    pub polls: Cell<u32>,
    pub sleeps: Cell<u32>,
    pub viewport_visible: Cell<bool>,
    pub visibility_changes: RefCell<Vec<bool>>,
    pub input: RefCell<Option<Rc<RefCell<InputState>>>>,
    pub detaches: Cell<u32>,
    pub stops: Cell<u32>,
    pub render_log: Rc<RenderLog>,
    pub fail_renderer: bool,
    frame: RefCell<Option<FrameCallback>>,
    running: Cell<bool>,
    /// Runs inside `sleep`, for tests that act while the bridge is waiting
    pub on_sleep: RefCell<Option<Box<dyn Fn()>>>,
}

impl Default for TestHost {
    fn default() -> Self {
        Self {
            ready_on_poll: Some(1),
            polls: Cell::new(0),
            sleeps: Cell::new(0),
            viewport_visible: Cell::new(false),
            visibility_changes: RefCell::new(Vec::new()),
            input: RefCell::new(None),
            detaches: Cell::new(0),
            stops: Cell::new(0),
            render_log: Rc::new(RenderLog::default()),
            fail_renderer: false,
            frame: RefCell::new(None),
            running: Cell::new(false),
            on_sleep: RefCell::new(None),
        }
    }
}

impl TestHost {
    pub fn ready_on(poll: Option<u32>) -> Self {
        Self {
            ready_on_poll: poll,
            ..Self::default()
        }
    }

    /// Host whose GPU setup always fails
    pub fn without_gpu() -> Self {
        Self {
            fail_renderer: true,
            ..Self::default()
        }
    }

    pub fn loop_running(&self) -> bool {
        self.running.get()
    }

    pub fn run_frame(&self, now_ms: f64) {
        let taken = self.frame.borrow_mut().take();
        if let Some(mut callback) = taken {
            callback(now_ms);
            if self.running.get() && self.frame.borrow().is_none() {
                *self.frame.borrow_mut() = Some(callback);
            }
        }
    }

    /// Run `count` frames 1/60 s apart, starting at `start_ms`
    pub fn run_frames(&self, start_ms: f64, count: u32) -> f64 {
        let mut now = start_ms;
        for _ in 0..count {
            self.run_frame(now);
            now += 1000.0 / 60.0;
        }
        now
    }

    pub fn press(&self, key: &str) {
        self.send(InputEvent::KeyDown(key.to_string()));
    }

    pub fn release(&self, key: &str) {
        self.send(InputEvent::KeyUp(key.to_string()));
    }

    pub fn send(&self, event: InputEvent) {
        if let Some(input) = self.input.borrow().as_ref() {
            input.borrow_mut().process_event(&event);
        }
    }
}

impl StageHost for TestHost {
    fn engines_available(&self) -> bool {
        let poll = self.polls.get() + 1;
        self.polls.set(poll);
        self.ready_on_poll.is_some_and(|ready| poll >= ready)
    }

    async fn sleep(&self, _duration: Duration) {
        self.sleeps.set(self.sleeps.get() + 1);
        if let Some(hook) = self.on_sleep.borrow().as_ref() {
            hook();
        }
    }

    fn set_viewport_visible(&self, visible: bool) {
        self.viewport_visible.set(visible);
        self.visibility_changes.borrow_mut().push(visible);
    }

    fn viewport_size(&self) -> (u32, u32) {
        (800, 600)
    }

    async fn create_renderer(&self) -> Result<Box<dyn StageRenderer>> {
        if self.fail_renderer {
            return Err(StageError::Renderer("no adapter".into()));
        }
        Ok(Box::new(RecordingRenderer {
            log: self.render_log.clone(),
        }))
    }

    fn attach_input(&self, input: Rc<RefCell<InputState>>, _processor: &InputProcessor) -> Result<()> {
        *self.input.borrow_mut() = Some(input);
        Ok(())
    }

    fn detach_input(&self) {
        self.detaches.set(self.detaches.get() + 1);
        self.input.borrow_mut().take();
    }

    fn start_render_loop(&self, callback: FrameCallback) {
        *self.frame.borrow_mut() = Some(callback);
        self.running.set(true);
    }

    fn stop_render_loop(&self) {
        self.stops.set(self.stops.get() + 1);
        self.running.set(false);
        if let Ok(mut slot) = self.frame.try_borrow_mut() {
            slot.take();
        }
    }
}
