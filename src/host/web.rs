//! Browser host: DOM surfaces, `requestAnimationFrame`, `setTimeout`, `fetch`, and the
//! `wasm_bindgen` entry points used by the narrative engine.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, warn};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::wasm_bindgen;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Document, Event, EventTarget, HtmlCanvasElement, HtmlElement, KeyboardEvent, MouseEvent, Response, Window};

use super::{FrameCallback, StageHost};
use crate::bridge::{StageBridge, StageParams};
use crate::config::{StageConfig, SurfaceConfig};
use crate::controller::input::wasm::{keyboard_event_to_input, mouse_down_to_input, mouse_move_to_input, mouse_up_to_input};
use crate::controller::{InputEvent, InputProcessor, InputState};
use crate::error::{Result, StageError};
use crate::loader::gltf::GltfImporter;
use crate::model::{AssetRegistry, SharedSelection};
use crate::view::{GpuContext, SceneRenderer, StageRenderer};

thread_local! {
    /// One selection per page, shared by every stage instance on it
    static SELECTION: SharedSelection = SharedSelection::new();
}

struct Listener {
    target: EventTarget,
    kind: &'static str,
    closure: Closure<dyn FnMut(Event)>,
}

struct RenderLoop {
    active: Rc<Cell<bool>>,
    request_id: Rc<Cell<Option<i32>>>,
    closure: Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>>,
}

pub struct WebHost {
    window: Window,
    document: Document,
    surfaces: SurfaceConfig,
    listeners: RefCell<Vec<Listener>>,
    render_loop: RefCell<Option<RenderLoop>>,
}

impl WebHost {
    pub fn new(surfaces: SurfaceConfig) -> Result<Self> {
        let window = web_sys::window().ok_or_else(|| StageError::Host("no global window".into()))?;
        let document = window
            .document()
            .ok_or_else(|| StageError::Host("no document on window".into()))?;
        Ok(Self {
            window,
            document,
            surfaces,
            listeners: RefCell::new(Vec::new()),
            render_loop: RefCell::new(None),
        })
    }

    fn element(&self, id: &str) -> Option<HtmlElement> {
        self.document.get_element_by_id(id)?.dyn_into::<HtmlElement>().ok()
    }

    fn canvas(&self) -> Option<HtmlCanvasElement> {
        self.document
            .get_element_by_id(&self.surfaces.viewport_id)?
            .dyn_into::<HtmlCanvasElement>()
            .ok()
    }

    fn set_display(&self, id: &str, display: &str) {
        match self.element(id) {
            Some(el) => {
                if let Err(e) = el.style().set_property("display", display) {
                    warn!(id, "failed to set display: {e:?}");
                }
            }
            None => warn!(id, "surface element not found"),
        }
    }

    fn listen(&self, target: &EventTarget, kind: &'static str, handler: impl FnMut(Event) + 'static) -> Result<()> {
        let closure = Closure::<dyn FnMut(Event)>::new(handler);
        target.add_event_listener_with_callback(kind, closure.as_ref().unchecked_ref())?;
        self.listeners.borrow_mut().push(Listener {
            target: target.clone(),
            kind,
            closure,
        });
        Ok(())
    }
}

/// Match the canvas backing store to its CSS size times the device pixel ratio
fn sync_canvas_size(window: &Window, canvas: &HtmlCanvasElement) -> (u32, u32) {
    let dpr = window.device_pixel_ratio();
    let width = ((canvas.client_width() as f64 * dpr) as u32).max(1);
    let height = ((canvas.client_height() as f64 * dpr) as u32).max(1);
    if canvas.width() != width || canvas.height() != height {
        canvas.set_width(width);
        canvas.set_height(height);
    }
    (width, height)
}

fn push_event(input: &Rc<RefCell<InputState>>, event: InputEvent) {
    match input.try_borrow_mut() {
        Ok(mut state) => state.process_event(&event),
        Err(_) => debug!(?event, "input state busy, dropping event"),
    }
}

impl StageHost for WebHost {
    /// Renderer and physics are compiled into this module, so readiness only
    /// depends on the viewport canvas being mounted
    fn engines_available(&self) -> bool {
        self.canvas().is_some()
    }

    async fn sleep(&self, duration: Duration) {
        let window = self.window.clone();
        let ms = duration.as_millis().min(i32::MAX as u128) as i32;
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            if let Err(e) = window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms) {
                error!("setTimeout failed: {e:?}");
            }
        });
        if let Err(e) = JsFuture::from(promise).await {
            warn!("sleep interrupted: {e:?}");
        }
    }

    fn set_viewport_visible(&self, visible: bool) {
        let (shown, hidden) = if visible {
            (&self.surfaces.viewport_id, &self.surfaces.presentation_id)
        } else {
            (&self.surfaces.presentation_id, &self.surfaces.viewport_id)
        };
        self.set_display(hidden, "none");
        self.set_display(shown, "block");
        if visible {
            if let Some(canvas) = self.canvas() {
                let _ = canvas.focus();
            }
        }
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.canvas()
            .map(|c| sync_canvas_size(&self.window, &c))
            .unwrap_or((1, 1))
    }

    async fn create_renderer(&self) -> Result<Box<dyn StageRenderer>> {
        let canvas = self
            .canvas()
            .ok_or_else(|| StageError::Host(format!("canvas `{}` not found", self.surfaces.viewport_id)))?;
        let (width, height) = sync_canvas_size(&self.window, &canvas);
        let gpu = GpuContext::new(&canvas, width, height).await?;
        let mut renderer = SceneRenderer::new(gpu);
        renderer.set_pixels_per_point(self.window.device_pixel_ratio() as f32);
        Ok(Box::new(renderer))
    }

    fn attach_input(&self, input: Rc<RefCell<InputState>>, processor: &InputProcessor) -> Result<()> {
        self.detach_input();
        let canvas = self
            .canvas()
            .ok_or_else(|| StageError::Host(format!("canvas `{}` not found", self.surfaces.viewport_id)))?;
        let window: &EventTarget = self.window.as_ref();
        let document: &EventTarget = self.document.as_ref();
        let canvas_target: &EventTarget = canvas.as_ref();

        {
            let input = input.clone();
            let keys = processor.clone();
            self.listen(window, "keydown", move |e| {
                if let Some(e) = e.dyn_ref::<KeyboardEvent>() {
                    if keys.is_navigation_key(&e.key()) {
                        e.prevent_default();
                    }
                    push_event(&input, keyboard_event_to_input(e, true));
                }
            })?;
        }
        {
            let input = input.clone();
            self.listen(window, "keyup", move |e| {
                if let Some(e) = e.dyn_ref::<KeyboardEvent>() {
                    push_event(&input, keyboard_event_to_input(e, false));
                }
            })?;
        }
        {
            let input = input.clone();
            let c = canvas.clone();
            self.listen(canvas_target, "mousedown", move |e| {
                if let Some(e) = e.dyn_ref::<MouseEvent>() {
                    push_event(&input, mouse_down_to_input(e, &c));
                }
            })?;
        }
        {
            let input = input.clone();
            self.listen(window, "mouseup", move |e| {
                if let Some(e) = e.dyn_ref::<MouseEvent>() {
                    push_event(&input, mouse_up_to_input(e));
                }
            })?;
        }
        {
            let input = input.clone();
            let c = canvas.clone();
            self.listen(canvas_target, "mousemove", move |e| {
                if let Some(e) = e.dyn_ref::<MouseEvent>() {
                    push_event(&input, mouse_move_to_input(e, &c));
                }
            })?;
        }
        // right drag orbits the camera
        self.listen(canvas_target, "contextmenu", |e| e.prevent_default())?;
        {
            let input = input.clone();
            let w = self.window.clone();
            let c = canvas.clone();
            self.listen(window, "resize", move |_| {
                let (width, height) = sync_canvas_size(&w, &c);
                push_event(&input, InputEvent::Resized { width, height });
            })?;
        }
        {
            let input = input.clone();
            self.listen(window, "blur", move |_| push_event(&input, InputEvent::FocusLost))?;
        }
        {
            let doc = self.document.clone();
            self.listen(document, "visibilitychange", move |_| {
                push_event(&input, InputEvent::VisibilityChanged { visible: !doc.hidden() });
            })?;
        }
        debug!(listeners = self.listeners.borrow().len(), "stage input attached");
        Ok(())
    }

    fn detach_input(&self) {
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for l in &listeners {
            if let Err(e) = l
                .target
                .remove_event_listener_with_callback(l.kind, l.closure.as_ref().unchecked_ref())
            {
                warn!(kind = l.kind, "failed to remove listener: {e:?}");
            }
        }
    }

    fn start_render_loop(&self, mut callback: FrameCallback) {
        self.stop_render_loop();

        let active = Rc::new(Cell::new(true));
        let request_id: Rc<Cell<Option<i32>>> = Rc::new(Cell::new(None));
        let slot: Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>> = Rc::new(RefCell::new(None));

        let closure = {
            let active = active.clone();
            let request_id = request_id.clone();
            let slot = slot.clone();
            let window = self.window.clone();
            Closure::<dyn FnMut(f64)>::new(move |now: f64| {
                request_id.set(None);
                if !active.get() {
                    return;
                }
                callback(now);
                // the callback may have stopped the loop
                if !active.get() {
                    return;
                }
                if let Some(next) = slot.borrow().as_ref() {
                    match window.request_animation_frame(next.as_ref().unchecked_ref()) {
                        Ok(id) => request_id.set(Some(id)),
                        Err(e) => error!("requestAnimationFrame failed: {e:?}"),
                    }
                }
            })
        };

        match self.window.request_animation_frame(closure.as_ref().unchecked_ref()) {
            Ok(id) => request_id.set(Some(id)),
            Err(e) => {
                error!("requestAnimationFrame failed: {e:?}");
                return;
            }
        }
        *slot.borrow_mut() = Some(closure);
        *self.render_loop.borrow_mut() = Some(RenderLoop {
            active,
            request_id,
            closure: slot,
        });
    }

    fn stop_render_loop(&self) {
        let Some(render_loop) = self.render_loop.borrow_mut().take() else {
            return;
        };
        render_loop.active.set(false);
        if let Some(id) = render_loop.request_id.take() {
            let _ = self.window.cancel_animation_frame(id);
        }
        if let Some(closure) = render_loop.closure.borrow_mut().take() {
            // we may be inside this very closure; release it after the current task
            wasm_bindgen_futures::spawn_local(async move { drop(closure) });
        }
    }
}

impl Drop for WebHost {
    fn drop(&mut self) {
        self.stop_render_loop();
        self.detach_input();
    }
}

/// GET `url` and return the body bytes
pub async fn fetch_bytes(url: &str) -> Result<Vec<u8>> {
    let window = web_sys::window().ok_or_else(|| StageError::Host("no global window".into()))?;
    let response: Response = JsFuture::from(window.fetch_with_str(url)).await?.dyn_into()?;
    if !response.ok() {
        return Err(StageError::Host(format!("GET {url} returned {}", response.status())));
    }
    let buffer = JsFuture::from(response.array_buffer()?).await?;
    Ok(js_sys::Uint8Array::new(&buffer).to_vec())
}

fn js_error(e: StageError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Stage instance as seen from JavaScript
#[wasm_bindgen]
pub struct WebStage {
    bridge: Rc<StageBridge<WebHost, GltfImporter>>,
}

#[wasm_bindgen]
impl WebStage {
    /// `registry_json` is the asset definition document, `config_json` optional overrides
    #[wasm_bindgen(constructor)]
    pub fn new(registry_json: &str, config_json: Option<String>) -> std::result::Result<WebStage, JsValue> {
        let registry = AssetRegistry::from_json_str(registry_json).map_err(js_error)?;
        let config = match config_json.as_deref() {
            Some(json) => StageConfig::from_json_str(json).map_err(js_error)?,
            None => StageConfig::default(),
        };
        let host = WebHost::new(config.surfaces.clone()).map_err(js_error)?;
        let selection = SELECTION.with(SharedSelection::clone);
        let bridge = StageBridge::new(Rc::new(host), GltfImporter::new(), Rc::new(registry), config, selection);
        Ok(WebStage { bridge: Rc::new(bridge) })
    }

    /// Resolves when the stage is running, rejects with the error message otherwise
    pub fn enter(&self, stage_key: String, return_to: Option<String>, debug: bool) -> js_sys::Promise {
        let bridge = self.bridge.clone();
        let params = StageParams { stage_key, return_to, debug };
        wasm_bindgen_futures::future_to_promise(async move {
            bridge.initialize(params).await.map_err(js_error)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    pub fn leave(&self) {
        self.bridge.shutdown();
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.bridge.resize(width, height);
    }

    /// Pending lifecycle events as a JSON array
    #[wasm_bindgen(js_name = drainEvents)]
    pub fn drain_events(&self) -> std::result::Result<String, JsValue> {
        serde_json::to_string(&self.bridge.signals().drain()).map_err(|e| js_error(e.into()))
    }
}
