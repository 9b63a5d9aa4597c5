// VIEW: Rendering and graphics
pub mod gpu_init;
pub mod render;

pub use gpu_init::GpuContext;
pub use render::SceneRenderer;

use crate::error::Result;
use crate::model::{Camera, NodeId, SceneGraph};
use crate::ui::OverlayStats;

/// Everything a renderer may look at for one frame
pub struct FrameView<'a> {
    pub scene: &'a SceneGraph,
    pub camera: &'a Camera,
    pub selected: Option<NodeId>,
    pub overlay: &'a OverlayStats,
    /// Host timestamp in milliseconds
    pub now: f64,
}

/// Draws the stage. Implemented by the wgpu renderer and by test doubles.
pub trait StageRenderer {
    fn resize(&mut self, width: u32, height: u32);
    fn render(&mut self, frame: &FrameView<'_>) -> Result<()>;
    /// Release GPU resources. Called once when the stage shuts down.
    fn dispose(&mut self) {}
}
