//! Loading stages into a scene graph and a physics world, and what the physics
//! world does with them afterwards.

mod common;

use glam::Vec3;
use odyssey_stage::config::{ControllerConfig, PhysicsConfig};
use odyssey_stage::controller::physics::PhysicsWorld;
use odyssey_stage::controller::{CharacterController, SceneEditor};
use odyssey_stage::loader::{CancelToken, LoadedStage, SYNTHETIC_ROOT};
use odyssey_stage::model::{AssetRegistry, ObjectPlacement, Role, SceneGraph};
use odyssey_stage::{StageError, StageLoader};

use common::*;

struct Loaded {
    scene: SceneGraph,
    physics: PhysicsWorld,
    stage: LoadedStage,
}

fn load(registry: &AssetRegistry, importer: &FixtureImporter) -> Result<Loaded, StageError> {
    let config = ControllerConfig::default();
    let mut scene = SceneGraph::new();
    let mut physics = PhysicsWorld::new(&PhysicsConfig::default());
    let stage = pollster::block_on(StageLoader::new(registry, importer, &config).load(
        STAGE,
        &mut scene,
        &mut physics,
        &CancelToken::new(),
    ))?;
    Ok(Loaded { scene, physics, stage })
}

fn simulate(physics: &mut PhysicsWorld, seconds: f32) {
    let frames = (seconds * 60.0).round() as u32;
    for _ in 0..frames {
        physics.step(1.0 / 60.0);
    }
}

#[test]
fn tutorial_stage_places_every_object() {
    let loaded = load(&tutorial_registry(), &FixtureImporter::new()).unwrap();

    assert_eq!(loaded.stage.stage_name, "Tutorial");
    assert_eq!(loaded.stage.instances.len(), 3);
    let roles: Vec<Role> = loaded.stage.instances.iter().map(|i| i.role).collect();
    assert_eq!(roles, vec![Role::StaticGround, Role::DynamicCharacter, Role::Decor]);

    // decor is rendered but never simulated
    assert!(loaded.stage.instances[2].body.is_none());
    assert_eq!(loaded.physics.body_count(), 2);
}

#[test]
fn import_wrappers_are_disposed_and_mesh_sits_at_scene_root() {
    let loaded = load(&tutorial_registry(), &FixtureImporter::new()).unwrap();
    let scene = &loaded.scene;

    assert!(scene.find_by_name(SYNTHETIC_ROOT).is_none());
    assert!(scene.find_by_name("Armature").is_none());

    let hero = scene.find_by_name("hero").expect("hero mesh is renamed after its placement");
    let node = scene.get(hero).unwrap();
    assert_eq!(node.parent, None);
    // placement transform replaces whatever the wrapper contributed
    assert!(node.transform.translation.abs_diff_eq(Vec3::new(0.0, 3.0, 0.0), 1e-6));
    assert_eq!(scene.len(), 3);
}

#[test]
fn ground_is_immovable_and_character_has_mass() {
    let mut loaded = load(&tutorial_registry(), &FixtureImporter::new()).unwrap();
    // mass properties are computed by the first step
    loaded.physics.step(1.0 / 60.0);

    let ground = loaded.stage.instances[0].body.unwrap();
    let hero = loaded.stage.player.unwrap().body;
    assert_eq!(loaded.physics.mass(ground), Some(0.0));
    assert!(loaded.physics.mass(hero).unwrap() > 0.0);
}

#[test]
fn dropped_character_settles_on_ground_and_is_grounded() {
    let mut loaded = load(&tutorial_registry(), &FixtureImporter::new()).unwrap();
    let player = loaded.stage.player.unwrap();
    let controller = CharacterController::new(ControllerConfig::default());

    assert!(!controller.is_grounded(&player, &loaded.physics), "still falling from y = 3");
    simulate(&mut loaded.physics, 3.0);

    let (position, rotation) = loaded.physics.pose(player.body).unwrap();
    assert!((position.y - 0.5).abs() < 0.05, "unit cube should rest on y = 0, got {position:?}");
    assert!(rotation.abs_diff_eq(glam::Quat::IDENTITY, 1e-4), "rotations are locked");
    assert!(controller.is_grounded(&player, &loaded.physics));
}

#[test]
fn scaled_ground_plane_catches_a_character_dropped_from_two_units() {
    let objects = vec![
        ObjectPlacement::new("plane", "ground", Vec3::ZERO, Role::StaticGround).with_scale(Vec3::new(20.0, 1.0, 20.0)),
        ObjectPlacement::new("hero", "hero", Vec3::new(0.0, 2.0, 0.0), Role::DynamicCharacter),
    ];
    let mut loaded = load(&registry_with(objects), &FixtureImporter::new()).unwrap();
    let player = loaded.stage.player.unwrap();
    let controller = CharacterController::new(ControllerConfig::default());

    let ground = loaded.stage.instances[0].body.unwrap();
    let half = loaded.physics.collider_half_extents(ground).unwrap();
    assert!(half.abs_diff_eq(Vec3::new(20.0, 0.01, 20.0), 1e-5), "flat plane gets the thinnest slab, {half:?}");

    simulate(&mut loaded.physics, 3.0);

    let (position, _) = loaded.physics.pose(player.body).unwrap();
    assert!((position.y - 0.5).abs() < 0.05, "rests half its height above the plane, got {position:?}");
    assert!(loaded.physics.linvel(player.body).length() < 0.05);
    assert!(controller.is_grounded(&player, &loaded.physics));
}

#[test]
fn only_the_first_character_becomes_the_player() {
    let mut objects = tutorial_objects();
    objects.push(ObjectPlacement::new("hero", "hero_2", Vec3::new(5.0, 3.0, 0.0), Role::DynamicCharacter));
    let loaded = load(&registry_with(objects), &FixtureImporter::new()).unwrap();

    let player = loaded.stage.player.unwrap();
    assert_eq!(loaded.scene.get(player.node).unwrap().name, "hero");
    assert!(loaded.scene.find_by_name("hero_2").is_none());
    let characters = loaded
        .stage
        .instances
        .iter()
        .filter(|i| i.role == Role::DynamicCharacter)
        .count();
    assert_eq!(characters, 1);
}

#[test]
fn failing_placements_are_skipped_without_aborting_the_stage() {
    let mut objects = tutorial_objects();
    objects.extend([
        ObjectPlacement::new("missing_file", "broken", Vec3::ZERO, Role::Decor),
        ObjectPlacement::new("not_registered", "ghost", Vec3::ZERO, Role::Decor),
        ObjectPlacement::new("empty", "nothing", Vec3::ZERO, Role::Decor),
        ObjectPlacement::new("speck", "speck", Vec3::new(0.0, 1.0, 0.0), Role::StaticGround),
    ]);
    let loaded = load(&registry_with(objects), &FixtureImporter::new()).unwrap();

    let names: Vec<&str> = loaded
        .stage
        .instances
        .iter()
        .map(|i| loaded.scene.get(i.node).unwrap().name.as_str())
        .collect();
    assert_eq!(names, vec!["ground", "hero", "crate_a", "speck"]);

    // a zero-size box cannot be collided with, the object stays visible only
    assert!(loaded.stage.instances[3].body.is_none());
    assert!(loaded.scene.find_by_name(SYNTHETIC_ROOT).is_none());
    assert!(loaded.stage.player.is_some());
}

#[test]
fn flat_ground_gets_a_minimum_thickness() {
    let objects = vec![ObjectPlacement::new("plane", "floor", Vec3::ZERO, Role::StaticGround)];
    let loaded = load(&registry_with(objects), &FixtureImporter::new()).unwrap();

    assert!(loaded.stage.instances[0].body.is_some());
    let hit = loaded
        .physics
        .cast_ground_ray(Vec3::new(0.0, 1.0, 0.0), 2.0, None)
        .expect("ray should hit the flat floor");
    assert!((hit - 0.99).abs() < 1e-3, "top face at y = 0.01, got {hit}");
}

#[test]
fn unknown_stage_is_an_error() {
    let registry = tutorial_registry();
    let importer = FixtureImporter::new();
    let config = ControllerConfig::default();
    let mut scene = SceneGraph::new();
    let mut physics = PhysicsWorld::new(&PhysicsConfig::default());

    let result = pollster::block_on(StageLoader::new(&registry, &importer, &config).load(
        "stage_99_missing",
        &mut scene,
        &mut physics,
        &CancelToken::new(),
    ));
    assert!(matches!(result, Err(StageError::UnknownStage(key)) if key == "stage_99_missing"));
    assert!(scene.is_empty());
}

#[test]
fn cancelled_load_stops_before_importing() {
    let registry = tutorial_registry();
    let importer = FixtureImporter::new();
    let config = ControllerConfig::default();
    let mut scene = SceneGraph::new();
    let mut physics = PhysicsWorld::new(&PhysicsConfig::default());
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = pollster::block_on(StageLoader::new(&registry, &importer, &config).load(
        STAGE,
        &mut scene,
        &mut physics,
        &cancel,
    ));
    assert!(matches!(result, Err(StageError::Cancelled)));
    assert_eq!(importer.imports.get(), 0);
    assert!(scene.is_empty());
}

#[test]
fn player_clips_are_retargeted_and_play_exclusively() {
    let mut loaded = load(&tutorial_registry(), &FixtureImporter::new()).unwrap();
    let clips = &mut loaded.stage.clips;

    // "jump" animates the wrapper in the file and survives by moving onto the mesh
    assert_eq!(clips.names().collect::<Vec<_>>(), vec!["idle", "jump", "run"]);
    assert_eq!(clips.playing_count(), 0);

    assert_eq!(clips.play_exclusive("run", "default"), Some("run"));
    assert_eq!(clips.play_exclusive("jump", "default"), Some("jump"));
    assert_eq!(clips.playing_count(), 1);
    assert!(loaded.stage.ambient_clips.is_empty());
}

#[test]
fn exported_snapshot_loads_back_to_the_same_layout() {
    let loaded = load(&tutorial_registry(), &FixtureImporter::new()).unwrap();
    let json = SceneEditor::export_json(&loaded.scene).unwrap();

    let placements: Vec<ObjectPlacement> = serde_json::from_str(&json).unwrap();
    assert_eq!(placements.len(), 3);
    let reloaded = load(&registry_with(placements.clone()), &FixtureImporter::new()).unwrap();

    for original in tutorial_objects() {
        let exported = placements.iter().find(|p| p.name == original.name).unwrap();
        assert_eq!(exported.role, original.role);
        assert!(exported.position().abs_diff_eq(original.position(), 1e-5));

        let node = reloaded.scene.find_by_name(&original.name).unwrap();
        let transform = reloaded.scene.get(node).unwrap().transform;
        assert!(transform.translation.abs_diff_eq(original.position(), 1e-5));
        assert!(transform.scale.abs_diff_eq(Vec3::ONE, 1e-5));
    }
    assert!(reloaded.stage.player.is_some());
}
