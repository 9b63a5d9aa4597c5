//! Platform side of the stage: surfaces, timers, input listeners, render loop.

#[cfg(target_arch = "wasm32")]
pub mod web;

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use crate::controller::{InputProcessor, InputState};
use crate::error::Result;
use crate::view::StageRenderer;

/// Per-frame callback handed to the host. The argument is a timestamp in milliseconds.
pub type FrameCallback = Box<dyn FnMut(f64)>;

/// What the bridge needs from the environment it runs in.
///
/// All methods are called from the single UI thread. Implementations must tolerate
/// `stop_render_loop`, `detach_input` and `set_viewport_visible(false)` being called
/// repeatedly or without a matching start.
pub trait StageHost {
    /// Whether the renderer and physics runtimes can be created yet
    fn engines_available(&self) -> bool;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;

    /// `true` shows the 3D viewport and hides the 2D surface, `false` the reverse.
    /// Exactly one of the two is visible after every call.
    fn set_viewport_visible(&self, visible: bool);

    fn viewport_size(&self) -> (u32, u32);

    fn create_renderer(&self) -> impl Future<Output = Result<Box<dyn StageRenderer>>>;

    /// Start feeding input events into `input`
    fn attach_input(&self, input: Rc<RefCell<InputState>>, processor: &InputProcessor) -> Result<()>;

    fn detach_input(&self);

    fn start_render_loop(&self, callback: FrameCallback);

    fn stop_render_loop(&self);
}
