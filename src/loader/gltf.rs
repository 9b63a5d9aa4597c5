//! glTF 2.0 importer.
//!
//! Reads `.glb` or `.gltf` bytes, keeps node hierarchy, triangle meshes and node
//! animations. Materials are reduced to their base color factor.

use ::gltf::animation::util::ReadOutputs;
use ::gltf::mesh::Mode;
use glam::{Quat, Vec3};
use std::collections::HashMap;
#[cfg(not(target_arch = "wasm32"))]
use std::path::PathBuf;
use tracing::{debug, warn};

use super::{ImportedAnimation, ImportedModel, ImportedNode, ImportedTrack, ModelImporter};
use crate::error::{Result, StageError};
use crate::model::{Geometry, Keyframes, ModelResource, Transform};

/// Loads models from disk (native) or over `fetch` (web)
#[derive(Debug, Clone, Default)]
pub struct GltfImporter {
    /// Directory model URLs are resolved against on native targets
    #[cfg(not(target_arch = "wasm32"))]
    pub asset_dir: PathBuf,
}

impl GltfImporter {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self { asset_dir: asset_dir.into() }
    }

    #[cfg(target_arch = "wasm32")]
    pub fn new() -> Self {
        Self {}
    }

    #[cfg(not(target_arch = "wasm32"))]
    async fn read(&self, model_key: &str, resource: &ModelResource) -> Result<(Vec<u8>, Option<PathBuf>)> {
        let path = self.asset_dir.join(resource.url());
        let bytes = std::fs::read(&path).map_err(|e| StageError::import(model_key, format!("{}: {e}", path.display())))?;
        Ok((bytes, path.parent().map(PathBuf::from)))
    }

    #[cfg(target_arch = "wasm32")]
    async fn read(&self, model_key: &str, resource: &ModelResource) -> Result<(Vec<u8>, Option<std::path::PathBuf>)> {
        let bytes = crate::host::web::fetch_bytes(&resource.url())
            .await
            .map_err(|e| StageError::import(model_key, e))?;
        // external buffers cannot be resolved from a byte slice in the browser
        Ok((bytes, None))
    }
}

impl ModelImporter for GltfImporter {
    async fn import(&self, model_key: &str, resource: &ModelResource) -> Result<ImportedModel> {
        let (bytes, base) = self.read(model_key, resource).await?;
        let model = parse(&bytes, base.as_deref()).map_err(|e| StageError::import(model_key, e))?;
        debug!(
            model_key,
            nodes = model.nodes.len(),
            animations = model.animations.len(),
            "imported glTF"
        );
        Ok(model)
    }
}

/// Decode a glTF document. `base` resolves relative buffer URIs.
pub fn parse(bytes: &[u8], base: Option<&std::path::Path>) -> std::result::Result<ImportedModel, ::gltf::Error> {
    let ::gltf::Gltf { document, blob } = ::gltf::Gltf::from_slice(bytes)?;
    let buffers = ::gltf::import_buffers(&document, base, blob)?;

    let scene = document.default_scene().or_else(|| document.scenes().next());
    let mut model = ImportedModel::default();
    // glTF node index -> imported node index
    let mut index_of: HashMap<usize, usize> = HashMap::new();

    let mut stack: Vec<(::gltf::Node, Option<usize>)> = match scene {
        Some(scene) => scene.nodes().map(|n| (n, None)).collect(),
        None => Vec::new(),
    };
    stack.reverse();
    while let Some((node, parent)) = stack.pop() {
        let (t, r, s) = node.transform().decomposed();
        let geometry = node.mesh().and_then(|mesh| read_mesh(&mesh, &buffers));
        let name = node
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node_{}", node.index()));

        let index = model.nodes.len();
        index_of.insert(node.index(), index);
        model.nodes.push(ImportedNode {
            name,
            parent,
            transform: Transform {
                translation: Vec3::from_array(t),
                rotation: Quat::from_array(r),
                scale: Vec3::from_array(s),
            },
            geometry,
        });
        let children: Vec<_> = node.children().collect();
        stack.extend(children.into_iter().rev().map(|c| (c, Some(index))));
    }

    for (i, animation) in document.animations().enumerate() {
        let name = animation
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("animation_{i}"));
        let tracks = animation
            .channels()
            .filter_map(|channel| {
                let node = *index_of.get(&channel.target().node().index())?;
                let reader = channel.reader(|b| buffers.get(b.index()).map(|d| &d.0[..]));
                let times: Vec<f32> = reader.read_inputs()?.collect();
                let values = match reader.read_outputs()? {
                    ReadOutputs::Translations(v) => Keyframes::Translation(v.map(Vec3::from_array).collect()),
                    ReadOutputs::Rotations(v) => Keyframes::Rotation(v.into_f32().map(Quat::from_array).collect()),
                    ReadOutputs::Scales(v) => Keyframes::Scale(v.map(Vec3::from_array).collect()),
                    ReadOutputs::MorphTargetWeights(_) => return None,
                };
                Some(ImportedTrack { node, times, values })
            })
            .collect();
        model.animations.push(ImportedAnimation { name, tracks });
    }

    Ok(model)
}

/// Merge every triangle primitive of a mesh into one geometry
fn read_mesh(mesh: &::gltf::Mesh, buffers: &[::gltf::buffer::Data]) -> Option<Geometry> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut color = [0.8, 0.8, 0.8, 1.0];

    for primitive in mesh.primitives() {
        if primitive.mode() != Mode::Triangles {
            warn!(mesh = mesh.name().unwrap_or("?"), mode = ?primitive.mode(), "skipping non-triangle primitive");
            continue;
        }
        let reader = primitive.reader(|b| buffers.get(b.index()).map(|d| &d.0[..]));
        let Some(prim_positions) = reader.read_positions() else {
            continue;
        };
        let base = positions.len() as u32;
        positions.extend(prim_positions);
        let count = positions.len() - base as usize;

        match reader.read_normals() {
            Some(n) => normals.extend(n),
            None => normals.extend(std::iter::repeat([0.0, 1.0, 0.0]).take(count)),
        }
        match reader.read_indices() {
            Some(idx) => indices.extend(idx.into_u32().map(|i| base + i)),
            None => indices.extend(base..base + count as u32),
        }
        color = primitive.material().pbr_metallic_roughness().base_color_factor();
    }

    (!positions.is_empty()).then(|| Geometry::new(positions, normals, indices, color))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    /// Minimal glTF: one node with a single triangle, positions in an embedded buffer
    fn triangle_gltf() -> Vec<u8> {
        let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0];
        let bytes: Vec<u8> = positions.iter().flat_map(|f| f.to_le_bytes()).collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let uri = format!("data:application/octet-stream;base64,{encoded}");
        format!(
            r#"{{
                "asset": {{ "version": "2.0" }},
                "scene": 0,
                "scenes": [{{ "nodes": [0] }}],
                "nodes": [{{ "name": "wrapper", "children": [1] }}, {{ "name": "tri", "mesh": 0, "translation": [1, 2, 3] }}],
                "meshes": [{{ "primitives": [{{ "attributes": {{ "POSITION": 0 }} }}] }}],
                "buffers": [{{ "byteLength": 36, "uri": "{uri}" }}],
                "bufferViews": [{{ "buffer": 0, "byteLength": 36 }}],
                "accessors": [{{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                                 "min": [0, 0, 0], "max": [1, 2, 0] }}]
            }}"#
        )
        .into_bytes()
    }

    #[test]
    fn parses_hierarchy_and_geometry() {
        let model = parse(&triangle_gltf(), None).unwrap();
        assert_eq!(model.nodes.len(), 2);
        assert_eq!(model.nodes[0].name, "wrapper");
        assert!(model.nodes[0].geometry.is_none());
        assert_eq!(model.nodes[1].parent, Some(0));
        assert_eq!(model.nodes[1].transform.translation, Vec3::new(1.0, 2.0, 3.0));

        let geometry = model.nodes[1].geometry.as_ref().unwrap();
        assert_eq!(geometry.indices, vec![0, 1, 2]);
        assert_eq!(geometry.bounds.max, Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse(b"not a model", None).is_err());
    }
}
