use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, MouseButton as WinitButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use odyssey_stage::controller::input::MouseButton;
use odyssey_stage::controller::{InputEvent, InputProcessor, InputState};
use odyssey_stage::host::FrameCallback;
use odyssey_stage::model::{AssetRegistry, SharedSelection};
use odyssey_stage::view::{GpuContext, SceneRenderer, StageRenderer};
use odyssey_stage::{logging, GltfImporter, StageBridge, StageConfig, StageError, StageEvent, StageHost, StageParams};

/// Walk around a stage outside the browser
#[derive(Debug, Parser)]
#[command(name = "odyssey-stage", version)]
struct Args {
    /// Asset definition document (`{ "stages": .., "models": .. }`)
    #[arg(long)]
    registry: PathBuf,

    /// Stage key to enter
    #[arg(long)]
    stage: String,

    /// Directory model URLs are resolved against. Defaults to the registry's directory.
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Optional JSON file with tunable overrides
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable the scene editor and the editor overlay
    #[arg(long)]
    debug: bool,

    /// Passed through to the return event
    #[arg(long)]
    return_to: Option<String>,
}

/// Desktop stand-in for the page: one window is the viewport, the terminal plays
/// the narrative side
#[derive(Default)]
struct NativeHost {
    window: RefCell<Option<Arc<Window>>>,
    input: RefCell<Option<Rc<RefCell<InputState>>>>,
    frame: RefCell<Option<FrameCallback>>,
    running: Cell<bool>,
}

impl NativeHost {
    fn set_window(&self, window: Arc<Window>) {
        *self.window.borrow_mut() = Some(window);
    }

    fn push_input(&self, event: InputEvent) {
        if let Some(input) = self.input.borrow().as_ref() {
            if let Ok(mut state) = input.try_borrow_mut() {
                state.process_event(&event);
            }
        }
    }

    /// Run the registered frame callback once. The callback may stop the loop.
    fn run_frame(&self, now_ms: f64) {
        let taken = self.frame.borrow_mut().take();
        if let Some(mut callback) = taken {
            callback(now_ms);
            if self.running.get() && self.frame.borrow().is_none() {
                *self.frame.borrow_mut() = Some(callback);
            }
        }
    }
}

impl StageHost for NativeHost {
    fn engines_available(&self) -> bool {
        self.window.borrow().is_some()
    }

    async fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn set_viewport_visible(&self, visible: bool) {
        info!(visible, "viewport visibility");
        if let Some(window) = self.window.borrow().as_ref() {
            window.set_visible(visible);
        }
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.window
            .borrow()
            .as_ref()
            .map(|w| {
                let size = w.inner_size();
                (size.width.max(1), size.height.max(1))
            })
            .unwrap_or((1, 1))
    }

    async fn create_renderer(&self) -> odyssey_stage::Result<Box<dyn StageRenderer>> {
        let window = self
            .window
            .borrow()
            .clone()
            .ok_or_else(|| StageError::Host("no window".into()))?;
        let (width, height) = self.viewport_size();
        let scale = window.scale_factor() as f32;
        let gpu = GpuContext::new_native(window, width, height).await?;
        let mut renderer = SceneRenderer::new(gpu);
        renderer.set_pixels_per_point(scale);
        Ok(Box::new(renderer))
    }

    fn attach_input(&self, input: Rc<RefCell<InputState>>, _processor: &InputProcessor) -> odyssey_stage::Result<()> {
        *self.input.borrow_mut() = Some(input);
        Ok(())
    }

    fn detach_input(&self) {
        self.input.borrow_mut().take();
    }

    fn start_render_loop(&self, callback: FrameCallback) {
        *self.frame.borrow_mut() = Some(callback);
        self.running.set(true);
    }

    fn stop_render_loop(&self) {
        self.running.set(false);
        // the slot is empty while the callback runs; run_frame drops it afterwards
        if let Ok(mut slot) = self.frame.try_borrow_mut() {
            slot.take();
        }
    }
}

/// Physical key to the `KeyboardEvent.key` name the bindings use
fn web_key_name(code: KeyCode) -> Option<String> {
    let debug_name = format!("{code:?}");
    if let Some(letter) = debug_name.strip_prefix("Key") {
        return Some(letter.to_lowercase());
    }
    if let Some(digit) = debug_name.strip_prefix("Digit") {
        return Some(digit.to_string());
    }
    let name = match code {
        KeyCode::Space => " ",
        KeyCode::Escape => "Escape",
        KeyCode::ShiftLeft | KeyCode::ShiftRight => "Shift",
        KeyCode::ControlLeft | KeyCode::ControlRight => "Control",
        KeyCode::ArrowUp => "ArrowUp",
        KeyCode::ArrowDown => "ArrowDown",
        KeyCode::ArrowLeft => "ArrowLeft",
        KeyCode::ArrowRight => "ArrowRight",
        KeyCode::Enter => "Enter",
        _ => return None,
    };
    Some(name.to_string())
}

struct App {
    args: Args,
    host: Rc<NativeHost>,
    bridge: Option<StageBridge<NativeHost, GltfImporter>>,
    window: Option<Arc<Window>>,
    cursor: (f32, f32),
    started: Instant,
    failure: Option<StageError>,
}

impl App {
    fn new(args: Args) -> Self {
        Self {
            args,
            host: Rc::new(NativeHost::default()),
            bridge: None,
            window: None,
            cursor: (0.0, 0.0),
            started: Instant::now(),
            failure: None,
        }
    }

    fn build_bridge(&self) -> odyssey_stage::Result<StageBridge<NativeHost, GltfImporter>> {
        let registry = AssetRegistry::from_json_str(&std::fs::read_to_string(&self.args.registry)?)?;
        let config = match &self.args.config {
            Some(path) => StageConfig::from_json_str(&std::fs::read_to_string(path)?)?,
            None => StageConfig::default(),
        };
        let assets = self
            .args
            .assets
            .clone()
            .or_else(|| self.args.registry.parent().map(PathBuf::from))
            .unwrap_or_default();
        Ok(StageBridge::new(
            self.host.clone(),
            GltfImporter::new(assets),
            Rc::new(registry),
            config,
            SharedSelection::new(),
        ))
    }

    fn enter_stage(&mut self) -> odyssey_stage::Result<()> {
        let bridge = self.build_bridge()?;
        let params = StageParams {
            stage_key: self.args.stage.clone(),
            return_to: self.args.return_to.clone(),
            debug: self.args.debug,
        };
        let entered = pollster::block_on(bridge.initialize(params));
        self.bridge = Some(bridge);
        entered
    }

    /// Print lifecycle events for whoever launched us. Returns `true` once the stage
    /// handed control back.
    fn forward_signals(&self) -> bool {
        let Some(bridge) = &self.bridge else {
            return false;
        };
        let mut finished = false;
        for event in bridge.signals().drain() {
            match serde_json::to_string(&event) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("failed to encode stage event: {e}"),
            }
            finished |= matches!(event, StageEvent::ReturnToNarrative { .. });
        }
        finished
    }

    fn handle_key(&self, event: &KeyEvent) {
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        let Some(key) = web_key_name(code) else {
            return;
        };
        self.host.push_input(match event.state {
            ElementState::Pressed => InputEvent::KeyDown(key),
            ElementState::Released => InputEvent::KeyUp(key),
        });
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(format!("odyssey-stage - {}", self.args.stage))
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                self.failure = Some(StageError::Host(format!("failed to create window: {e}")));
                event_loop.exit();
                return;
            }
        };
        self.host.set_window(window.clone());
        self.window = Some(window);
        self.started = Instant::now();

        if let Err(e) = self.enter_stage() {
            self.forward_signals();
            self.failure = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(bridge) = &self.bridge {
                    bridge.shutdown();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => self.host.push_input(InputEvent::Resized {
                width: size.width,
                height: size.height,
            }),
            WindowEvent::Focused(false) => self.host.push_input(InputEvent::FocusLost),
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(&event),
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x as f32, position.y as f32);
                self.host.push_input(InputEvent::PointerMove {
                    x: self.cursor.0,
                    y: self.cursor.1,
                });
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let button = match button {
                    WinitButton::Left => MouseButton::Left,
                    WinitButton::Right => MouseButton::Right,
                    WinitButton::Middle => MouseButton::Middle,
                    _ => return,
                };
                self.host.push_input(match state {
                    ElementState::Pressed => InputEvent::PointerDown {
                        button,
                        x: self.cursor.0,
                        y: self.cursor.1,
                    },
                    ElementState::Released => InputEvent::PointerUp { button },
                });
            }
            WindowEvent::RedrawRequested => {
                let now_ms = self.started.elapsed().as_secs_f64() * 1000.0;
                self.host.run_frame(now_ms);
                if self.forward_signals() {
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> odyssey_stage::Result<()> {
    logging::init();
    let args = Args::parse();
    info!(stage = %args.stage, registry = %args.registry.display(), "starting native stage viewer");

    let event_loop = EventLoop::new().map_err(|e| StageError::Host(format!("failed to create event loop: {e}")))?;
    let mut app = App::new(args);
    event_loop
        .run_app(&mut app)
        .map_err(|e| StageError::Host(format!("event loop failed: {e}")))?;

    // dispose the stage before the window goes away
    drop(app.bridge.take());
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
