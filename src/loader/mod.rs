//! Turns a stage definition into scene nodes and physics bodies.
//!
//! Placements are processed one at a time in declaration order. A failing placement
//! is logged and skipped; only an unknown stage or a cancellation stops the load.

pub mod gltf;

use rapier3d::prelude::RigidBodyHandle;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::controller::physics::{BodyShape, PhysicsWorld};
use crate::controller::PlayerHandle;
use crate::error::{Result, StageError};
use crate::model::{
    AnimationClip, AnimationClipSet, AssetRegistry, Geometry, Keyframes, ModelResource, NodeId, ObjectPlacement,
    Role, SceneGraph, StageObject, Track, Transform,
};

pub use self::gltf::GltfImporter;

/// Name given to the node that wraps every imported model
pub const SYNTHETIC_ROOT: &str = "__root__";

/// Node of an imported model, parents referenced by index into [`ImportedModel::nodes`]
#[derive(Debug, Clone)]
pub struct ImportedNode {
    pub name: String,
    pub parent: Option<usize>,
    pub transform: Transform,
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Clone)]
pub struct ImportedTrack {
    pub node: usize,
    pub times: Vec<f32>,
    pub values: Keyframes,
}

#[derive(Debug, Clone)]
pub struct ImportedAnimation {
    pub name: String,
    pub tracks: Vec<ImportedTrack>,
}

/// Decoded model, not yet part of any scene
#[derive(Debug, Clone, Default)]
pub struct ImportedModel {
    pub nodes: Vec<ImportedNode>,
    pub animations: Vec<ImportedAnimation>,
}

impl ImportedModel {
    /// One mesh node, no hierarchy
    pub fn single_mesh(name: &str, geometry: Geometry) -> Self {
        Self {
            nodes: vec![ImportedNode {
                name: name.to_string(),
                parent: None,
                transform: Transform::IDENTITY,
                geometry: Some(geometry),
            }],
            animations: Vec::new(),
        }
    }
}

/// Source of model data. The returned future is awaited once per placement.
pub trait ModelImporter {
    fn import(&self, model_key: &str, resource: &ModelResource) -> impl Future<Output = Result<ImportedModel>>;
}

/// Shared flag checked between placements. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn reset(&self) {
        self.0.set(false);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }

    /// Whether both tokens share one flag
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Runtime result of one placement
#[derive(Debug, Clone, PartialEq)]
pub struct SceneInstance {
    pub node: NodeId,
    pub body: Option<RigidBodyHandle>,
    pub role: Role,
    pub model_key: String,
}

#[derive(Debug, Default)]
pub struct LoadedStage {
    pub stage_key: String,
    pub stage_name: String,
    pub instances: Vec<SceneInstance>,
    pub player: Option<PlayerHandle>,
    pub clips: AnimationClipSet,
    /// Looping clips of non-player objects
    pub ambient_clips: Vec<AnimationClip>,
}

pub struct StageLoader<'a, I: ModelImporter> {
    registry: &'a AssetRegistry,
    importer: &'a I,
    config: &'a ControllerConfig,
}

impl<'a, I: ModelImporter> StageLoader<'a, I> {
    pub fn new(registry: &'a AssetRegistry, importer: &'a I, config: &'a ControllerConfig) -> Self {
        Self { registry, importer, config }
    }

    pub async fn load(
        &self,
        stage_key: &str,
        scene: &mut SceneGraph,
        physics: &mut PhysicsWorld,
        cancel: &CancelToken,
    ) -> Result<LoadedStage> {
        let stage = self.registry.stage(stage_key).inspect_err(|e| error!("{e}"))?;
        info!(stage_key, objects = stage.objects.len(), "loading stage");

        let rejected: HashSet<usize> = stage.extra_characters().into_iter().collect();
        let mut loaded = LoadedStage {
            stage_key: stage_key.to_string(),
            stage_name: stage.name.clone(),
            ..Default::default()
        };

        for (index, placement) in stage.objects.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(stage_key, "stage load cancelled");
                return Err(StageError::Cancelled);
            }
            if rejected.contains(&index) {
                error!(
                    name = %placement.name,
                    model_key = %placement.model_key,
                    "stage declares more than one character, placement skipped"
                );
                continue;
            }
            if let Err(e) = self.place(placement, scene, physics, &mut loaded).await {
                match &e {
                    StageError::UnknownModel(_) => warn!(model_key = %placement.model_key, "{e}, placement skipped"),
                    _ => error!(model_key = %placement.model_key, "{e}, placement skipped"),
                }
            }
        }

        if loaded.player.is_none() {
            warn!(stage_key, "stage has no character");
        }
        info!(
            stage_key,
            instances = loaded.instances.len(),
            clips = loaded.clips.len(),
            "stage loaded"
        );
        Ok(loaded)
    }

    async fn place(
        &self,
        placement: &ObjectPlacement,
        scene: &mut SceneGraph,
        physics: &mut PhysicsWorld,
        loaded: &mut LoadedStage,
    ) -> Result<()> {
        let resource = self.registry.model(&placement.model_key)?;
        let imported = self.importer.import(&placement.model_key, resource).await?;

        let root = scene.add_node(SYNTHETIC_ROOT, None, Transform::IDENTITY);
        let ids = instantiate(&imported, root, scene);

        let Some(mesh) = scene.first_mesh_descendant(root) else {
            scene.dispose(root);
            return Err(StageError::import(&placement.model_key, "model contains no mesh"));
        };

        // Animations on the mesh or anything above it are re-targeted to the mesh
        let mut wrappers: HashSet<NodeId> = HashSet::from([root, mesh]);
        let mut up = scene.get(mesh).and_then(|n| n.parent);
        while let Some(id) = up {
            wrappers.insert(id);
            up = scene.get(id).and_then(|n| n.parent);
        }

        scene.set_parent(mesh, None);
        for child in scene.get(mesh).map(|n| n.children.clone()).unwrap_or_default() {
            scene.dispose(child);
        }
        let disposed = scene.dispose(root);
        debug!(model_key = %placement.model_key, disposed = disposed.len(), "detached mesh from import root");

        let node = scene
            .get_mut(mesh)
            .ok_or_else(|| StageError::import(&placement.model_key, "mesh vanished during detach"))?;
        node.name = placement.name.clone();
        node.transform = Transform {
            translation: placement.position(),
            rotation: placement.rotation(),
            scale: placement.scale(),
        };
        node.stage_object = Some(StageObject {
            model_key: placement.model_key.clone(),
            role: placement.role,
        });

        let body = match placement.role {
            Role::Decor => None,
            role => match body_shape(scene, mesh) {
                Ok(shape) => Some(self.attach_body(role, shape, mesh, scene, physics, loaded)),
                Err(e) => {
                    error!(name = %placement.name, "{e}, object left non-interactive");
                    None
                }
            },
        };

        let clips = imported.animations.iter().map(|anim| {
            let mut clip = AnimationClip::new(&anim.name, build_tracks(&anim.tracks, &ids));
            clip.stop();
            clip.retarget(|t| wrappers.contains(&t).then_some(mesh));
            clip
        });
        let clips: Vec<AnimationClip> = clips.filter(|c| !c.tracks.is_empty()).collect();
        let player_owned = loaded.player.is_some_and(|p| p.node == mesh);
        if player_owned {
            loaded.clips = AnimationClipSet::new(clips);
        } else {
            for mut clip in clips {
                clip.play(true);
                loaded.ambient_clips.push(clip);
            }
        }

        loaded.instances.push(SceneInstance {
            node: mesh,
            body,
            role: placement.role,
            model_key: placement.model_key.clone(),
        });
        debug!(name = %placement.name, role = ?placement.role, "placed object");
        Ok(())
    }

    fn attach_body(
        &self,
        role: Role,
        shape: BodyShape,
        mesh: NodeId,
        scene: &mut SceneGraph,
        physics: &mut PhysicsWorld,
        loaded: &mut LoadedStage,
    ) -> RigidBodyHandle {
        let handle = match role {
            Role::DynamicCharacter => {
                let handle = physics.add_character(shape, self.config.character_mass);
                loaded.player = Some(PlayerHandle {
                    node: mesh,
                    body: handle,
                    half_extents: shape.half_extents,
                });
                handle
            }
            _ => physics.add_ground(shape),
        };
        if let Some(node) = scene.get_mut(mesh) {
            node.body = Some(handle);
        }
        handle
    }
}

/// Add the imported nodes below `root`. Returns the scene id of every imported node.
fn instantiate(model: &ImportedModel, root: NodeId, scene: &mut SceneGraph) -> Vec<NodeId> {
    let mut ids: Vec<Option<NodeId>> = vec![None; model.nodes.len()];
    // parents may be listed after their children
    let mut pending: Vec<usize> = (0..model.nodes.len()).collect();
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|&i| {
            let node = &model.nodes[i];
            let parent = match node.parent {
                None => Some(root),
                Some(p) if p < ids.len() => ids[p],
                Some(_) => Some(root),
            };
            let Some(parent) = parent else {
                return true;
            };
            let id = match &node.geometry {
                Some(g) => scene.add_mesh(&node.name, Some(parent), node.transform, g.clone()),
                None => scene.add_node(&node.name, Some(parent), node.transform),
            };
            ids[i] = Some(id);
            false
        });
        if pending.len() == before {
            // cyclic parents, hang the rest off the root
            for &i in &pending {
                let n = &model.nodes[i];
                ids[i] = Some(scene.add_node(&n.name, Some(root), n.transform));
            }
            break;
        }
    }
    ids.into_iter().map(|id| id.unwrap_or(root)).collect()
}

fn build_tracks(tracks: &[ImportedTrack], ids: &[NodeId]) -> Vec<Track> {
    let lookup: HashMap<usize, NodeId> = ids.iter().copied().enumerate().collect();
    tracks
        .iter()
        .filter_map(|t| {
            Some(Track {
                target: *lookup.get(&t.node)?,
                times: t.times.clone(),
                values: t.values.clone(),
            })
        })
        .collect()
}

/// Collider for a placed mesh: its own local bounds times its scale
fn body_shape(scene: &SceneGraph, mesh: NodeId) -> Result<BodyShape> {
    let node = scene.get(mesh).ok_or_else(|| StageError::Geometry {
        name: format!("{mesh:?}"),
        reason: "node missing".into(),
    })?;
    let geometry_error = |reason: &str| StageError::Geometry {
        name: node.name.clone(),
        reason: reason.to_string(),
    };
    let bounds = node.geometry.as_ref().ok_or_else(|| geometry_error("no geometry"))?.bounds;
    let raw = bounds.half_extents() * node.transform.scale.abs();
    if !raw.is_finite() || raw.max_element() <= f32::EPSILON {
        return Err(geometry_error("zero-size bounding box"));
    }
    Ok(BodyShape::fitted(bounds, &node.transform))
}
