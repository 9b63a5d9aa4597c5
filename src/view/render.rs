use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, warn};
use wgpu::util::DeviceExt;
use wgpu::*;

use super::gpu_init::GpuContext;
use super::{FrameView, StageRenderer};
use crate::error::{Result, StageError};
use crate::model::{Geometry, NodeId};
use crate::ui;

const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
const CLEAR_COLOR: Color = Color { r: 0.1, g: 0.1, b: 0.2, a: 1.0 };
const HIGHLIGHT: [f32; 4] = [1.0, 0.85, 0.2, 0.35];

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightingUniform {
    pub sky_dir: [f32; 3],
    pub intensity: f32,
    pub ground: [f32; 3],
    pub _pad: f32,
}

impl Default for LightingUniform {
    /// A single hemispheric light straight from above
    fn default() -> Self {
        Self {
            sky_dir: [0.0, 1.0, 0.0],
            intensity: 1.0,
            ground: [0.35, 0.33, 0.4],
            _pad: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ModelUniform {
    pub transform: [[f32; 4]; 4],
    pub color: [f32; 4],
    pub highlight: [f32; 4],
}

/// GPU copy of one mesh node
struct MeshBuffer {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    model_buffer: Buffer,
    model_bind_group: BindGroup,
}

impl MeshBuffer {
    fn upload(device: &Device, layout: &BindGroupLayout, geometry: &Geometry) -> Self {
        let vertices: Vec<Vertex> = geometry
            .positions
            .iter()
            .zip(geometry.normals.iter().chain(std::iter::repeat(&[0.0, 1.0, 0.0])))
            .map(|(pos, normal)| Vertex { pos: *pos, normal: *normal })
            .collect();

        let vertex_buffer = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("mesh_vertex_buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("mesh_index_buffer"),
            contents: bytemuck::cast_slice(&geometry.indices),
            usage: BufferUsages::INDEX,
        });
        let model_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("mesh_model_buffer"),
            size: std::mem::size_of::<ModelUniform>() as BufferAddress,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let model_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("mesh_model_bind_group"),
            layout,
            entries: &[BindGroupEntry { binding: 0, resource: model_buffer.as_entire_binding() }],
        });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: geometry.indices.len() as u32,
            model_buffer,
            model_bind_group,
        }
    }
}

pub fn create_depth_texture(device: &Device, width: u32, height: u32) -> (Texture, TextureView) {
    let depth_texture = device.create_texture(&TextureDescriptor {
        label: Some("depth_texture"),
        size: Extent3d { width: width.max(1), height: height.max(1), depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth_view = depth_texture.create_view(&TextureViewDescriptor::default());
    (depth_texture, depth_view)
}

fn uniform_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_mesh_pipeline(device: &Device, format: TextureFormat, layouts: &[&BindGroupLayout]) -> RenderPipeline {
    let shader = device.create_shader_module(ShaderModuleDescriptor {
        label: Some("mesh_shader"),
        source: ShaderSource::Wgsl(include_str!("shaders/mesh.wgsl").into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some("mesh_pipeline_layout"),
        bind_group_layouts: layouts,
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("mesh_pipeline"),
        layout: Some(&pipeline_layout),
        vertex: VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[VertexBufferLayout {
                array_stride: std::mem::size_of::<Vertex>() as BufferAddress,
                step_mode: VertexStepMode::Vertex,
                attributes: &[
                    VertexAttribute { offset: 0, shader_location: 0, format: VertexFormat::Float32x3 },
                    VertexAttribute { offset: 12, shader_location: 1, format: VertexFormat::Float32x3 },
                ],
            }],
            compilation_options: Default::default(),
        },
        fragment: Some(FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(ColorTargetState {
                format,
                blend: Some(BlendState::ALPHA_BLENDING),
                write_mask: ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: FrontFace::Ccw,
            // imported models do not agree on winding
            cull_mode: None,
            polygon_mode: PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
            stencil: StencilState::default(),
            bias: DepthBiasState::default(),
        }),
        multisample: MultisampleState { count: 1, mask: !0, alpha_to_coverage_enabled: false },
        multiview: None,
        cache: None,
    })
}

/// wgpu renderer for a stage: one pipeline, one hemispheric light, egui overlay on top
pub struct SceneRenderer {
    gpu: GpuContext,
    pipeline: RenderPipeline,
    camera_buffer: Buffer,
    lighting_buffer: Buffer,
    camera_bind_group: BindGroup,
    model_layout: BindGroupLayout,
    depth_view: TextureView,
    meshes: HashMap<NodeId, MeshBuffer>,
    egui_ctx: egui::Context,
    egui_renderer: egui_wgpu::Renderer,
    pixels_per_point: f32,
    disposed: bool,
}

impl SceneRenderer {
    pub fn new(gpu: GpuContext) -> Self {
        let device = gpu.device.as_ref();

        let camera_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("camera_buffer"),
            size: std::mem::size_of::<CameraUniform>() as BufferAddress,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let lighting_buffer = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("lighting_buffer"),
            contents: bytemuck::bytes_of(&LightingUniform::default()),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        let camera_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("camera_bind_group_layout"),
            entries: &[
                uniform_entry(0, ShaderStages::VERTEX),
                uniform_entry(1, ShaderStages::FRAGMENT),
            ],
        });
        let model_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("model_bind_group_layout"),
            entries: &[uniform_entry(0, ShaderStages::VERTEX_FRAGMENT)],
        });
        let camera_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("camera_bind_group"),
            layout: &camera_layout,
            entries: &[
                BindGroupEntry { binding: 0, resource: camera_buffer.as_entire_binding() },
                BindGroupEntry { binding: 1, resource: lighting_buffer.as_entire_binding() },
            ],
        });

        let pipeline = create_mesh_pipeline(device, gpu.format, &[&camera_layout, &model_layout]);
        let (_, depth_view) = create_depth_texture(device, gpu.config.width, gpu.config.height);
        let egui_renderer = egui_wgpu::Renderer::new(device, gpu.format, egui_wgpu::RendererOptions::default());

        Self {
            gpu,
            pipeline,
            camera_buffer,
            lighting_buffer,
            camera_bind_group,
            model_layout,
            depth_view,
            meshes: HashMap::new(),
            egui_ctx: egui::Context::default(),
            egui_renderer,
            pixels_per_point: 1.0,
            disposed: false,
        }
    }

    pub fn set_pixels_per_point(&mut self, ppp: f32) {
        self.pixels_per_point = ppp.max(0.5);
    }

    pub fn set_lighting(&self, lighting: LightingUniform) {
        self.gpu.queue.write_buffer(&self.lighting_buffer, 0, bytemuck::bytes_of(&lighting));
    }

    /// Upload new meshes, drop the ones whose nodes were disposed, refresh model uniforms
    fn sync_meshes(&mut self, frame: &FrameView<'_>) {
        let scene = frame.scene;
        self.meshes.retain(|id, _| scene.get(*id).is_some_and(|n| n.geometry.is_some()));

        for (id, node) in scene.iter() {
            let Some(geometry) = node.geometry.as_ref().filter(|g| !g.indices.is_empty()) else {
                continue;
            };
            let mesh = self
                .meshes
                .entry(id)
                .or_insert_with(|| MeshBuffer::upload(&self.gpu.device, &self.model_layout, geometry));
            let uniform = ModelUniform {
                transform: scene.world_matrix(id).to_cols_array_2d(),
                color: geometry.color,
                highlight: if frame.selected == Some(id) { HIGHLIGHT } else { [0.0; 4] },
            };
            self.gpu.queue.write_buffer(&mesh.model_buffer, 0, bytemuck::bytes_of(&uniform));
        }
    }

    fn acquire_frame(&mut self) -> Result<Option<SurfaceTexture>> {
        match self.gpu.surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                debug!("surface lost, reconfiguring");
                self.gpu.reconfigure();
                Ok(None)
            }
            Err(SurfaceError::Timeout) => {
                warn!("surface timeout, skipping frame");
                Ok(None)
            }
            Err(e) => Err(StageError::Renderer(format!("surface error: {e:?}"))),
        }
    }
}

impl StageRenderer for SceneRenderer {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || self.disposed {
            return;
        }
        self.gpu.resize(width, height);
        let (_, depth_view) = create_depth_texture(&self.gpu.device, width, height);
        self.depth_view = depth_view;
    }

    fn render(&mut self, frame: &FrameView<'_>) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        let camera = CameraUniform { view_proj: frame.camera.view_proj().to_cols_array_2d() };
        self.gpu.queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&camera));
        self.sync_meshes(frame);

        let Some(surface_frame) = self.acquire_frame()? else {
            return Ok(());
        };
        let (width, height) = (self.gpu.config.width, self.gpu.config.height);
        let ppp = self.pixels_per_point;

        let egui_output = ui::build_ui(
            &self.egui_ctx,
            frame.overlay,
            (width as f32 / ppp) as u32,
            (height as f32 / ppp) as u32,
            frame.now,
        );
        let primitives = self.egui_ctx.tessellate(egui_output.shapes, ppp);
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [width, height],
            pixels_per_point: ppp,
        };

        let device = self.gpu.device.as_ref();
        let queue = self.gpu.queue.as_ref();
        let view = surface_frame.texture.create_view(&TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor { label: Some("stage_encoder") });

        {
            let mut rp = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("stage_render_pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Clear(CLEAR_COLOR), store: StoreOp::Store },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(Operations { load: LoadOp::Clear(1.0), store: StoreOp::Store }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            rp.set_pipeline(&self.pipeline);
            rp.set_bind_group(0, &self.camera_bind_group, &[]);
            for (id, node) in frame.scene.iter() {
                if !node.visible {
                    continue;
                }
                let Some(mesh) = self.meshes.get(&id) else { continue };
                rp.set_bind_group(1, &mesh.model_bind_group, &[]);
                rp.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                rp.set_index_buffer(mesh.index_buffer.slice(..), IndexFormat::Uint32);
                rp.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }

        for (id, image_delta) in &egui_output.textures_delta.set {
            self.egui_renderer.update_texture(device, queue, *id, image_delta);
        }
        self.egui_renderer
            .update_buffers(device, queue, &mut encoder, &primitives, &screen_descriptor);

        {
            let egui_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("egui_render_pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Load, store: StoreOp::Store },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.egui_renderer
                .render(&mut egui_pass.forget_lifetime(), &primitives, &screen_descriptor);
        }

        for id in &egui_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        queue.submit(std::iter::once(encoder.finish()));
        surface_frame.present();
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        debug!(meshes = self.meshes.len(), "releasing stage GPU resources");
        for mesh in self.meshes.drain().map(|(_, m)| m) {
            mesh.vertex_buffer.destroy();
            mesh.index_buffer.destroy();
            mesh.model_buffer.destroy();
        }
        self.disposed = true;
    }
}
