use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, StageError};

/// `{ "x": .., "y": .., "z": .. }` as it appears in stage data
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3Data {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Vec3Data> for Vec3 {
    fn from(v: Vec3Data) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

impl From<Vec3> for Vec3Data {
    fn from(v: Vec3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

/// Physics and interaction category of a placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Zero mass, collidable, immovable, hit by the grounded ray
    StaticGround,
    /// The player: positive mass, upright-locked
    DynamicCharacter,
    /// Rendered only, no physics body
    #[default]
    Decor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPlacement {
    #[serde(rename = "key")]
    pub model_key: String,
    pub name: String,
    pub position: Vec3Data,
    /// Euler angles (XYZ order, radians); identity when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec3Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec3Data>,
    #[serde(default)]
    pub role: Role,
}

impl ObjectPlacement {
    pub fn new(model_key: &str, name: &str, position: Vec3, role: Role) -> Self {
        Self {
            model_key: model_key.to_string(),
            name: name.to_string(),
            position: position.into(),
            rotation: None,
            scale: None,
            role,
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = Some(scale.into());
        self
    }

    pub fn with_rotation(mut self, euler_xyz: Vec3) -> Self {
        self.rotation = Some(euler_xyz.into());
        self
    }

    pub fn position(&self) -> Vec3 {
        self.position.into()
    }

    pub fn scale(&self) -> Vec3 {
        self.scale.map(Vec3::from).unwrap_or(Vec3::ONE)
    }

    pub fn rotation(&self) -> glam::Quat {
        match self.rotation {
            Some(r) => glam::Quat::from_euler(glam::EulerRot::XYZ, r.x, r.y, r.z),
            None => glam::Quat::IDENTITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Filled from the registry map key when loaded from `asset_define.json`
    #[serde(default)]
    pub key: String,
    pub name: String,
    pub objects: Vec<ObjectPlacement>,
}

impl StageDefinition {
    /// Indices of character placements beyond the first one. Those are rejected by
    /// the loader: a stage has at most one player.
    pub fn extra_characters(&self) -> Vec<usize> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, o)| o.role == Role::DynamicCharacter)
            .map(|(i, _)| i)
            .skip(1)
            .collect()
    }
}

/// Loadable location of a model file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResource {
    pub root_url: String,
    pub file_name: String,
}

impl ModelResource {
    pub fn url(&self) -> String {
        if self.root_url.is_empty() || self.root_url.ends_with('/') {
            format!("{}{}", self.root_url, self.file_name)
        } else {
            format!("{}/{}", self.root_url, self.file_name)
        }
    }
}

/// Pre-populated, read-only lookup of stages and models
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetRegistry {
    #[serde(default)]
    stages: HashMap<String, StageDefinition>,
    #[serde(default)]
    models: HashMap<String, ModelResource>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an asset definition document (`{ "stages": {..}, "models": {..} }`)
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut registry: AssetRegistry = serde_json::from_str(json)?;
        for (key, stage) in registry.stages.iter_mut() {
            stage.key = key.clone();
        }
        Ok(registry)
    }

    pub fn insert_stage(&mut self, stage: StageDefinition) {
        self.stages.insert(stage.key.clone(), stage);
    }

    pub fn insert_model(&mut self, key: &str, resource: ModelResource) {
        self.models.insert(key.to_string(), resource);
    }

    pub fn stage(&self, key: &str) -> Result<&StageDefinition> {
        self.stages
            .get(key)
            .ok_or_else(|| StageError::UnknownStage(key.to_string()))
    }

    pub fn model(&self, key: &str) -> Result<&ModelResource> {
        self.models
            .get(key)
            .ok_or_else(|| StageError::UnknownModel(key.to_string()))
    }
}
