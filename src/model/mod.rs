// MODEL: Stage data and scene state
pub mod animation;
pub mod camera;
pub mod scene;
pub mod selection;
pub mod stage;

pub use animation::{AnimationClip, AnimationClipSet, Keyframes, Track};
pub use camera::Camera;
pub use scene::{Aabb, Geometry, NodeId, SceneGraph, SceneNode, StageObject, Transform};
pub use selection::{BridgeId, SharedSelection};
pub use stage::{AssetRegistry, ModelResource, ObjectPlacement, Role, StageDefinition, Vec3Data};
