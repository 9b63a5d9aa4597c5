/// Platform-agnostic input handling system
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Platform-independent input events
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    // Keyboard events
    KeyDown(String),
    KeyUp(String),

    // Pointer events (canvas pixel coordinates)
    PointerDown { button: MouseButton, x: f32, y: f32 },
    PointerUp { button: MouseButton },
    PointerMove { x: f32, y: f32 },

    // Window events
    Resized { width: u32, height: u32 },
    FocusLost,
    VisibilityChanged { visible: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn from_web_button(button: i16) -> Self {
        match button {
            0 => MouseButton::Left,
            1 => MouseButton::Middle,
            2 => MouseButton::Right,
            _ => MouseButton::Left,
        }
    }
}

/// Single-character keys are case-folded so "W" and "w" are the same key
pub fn normalize_key(key: &str) -> String {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.to_lowercase().collect(),
        _ if key == "Spacebar" => " ".to_string(),
        _ => key.to_string(),
    }
}

/// Keyboard and pointer state shared between the host listeners and the stage loop.
///
/// Held keys live in `pressed_keys`. Press edges are collected in `just_pressed` and
/// consumed once per tick, so an auto-repeating key produces a single edge.
#[derive(Debug, Default)]
pub struct InputState {
    pub pressed_keys: HashSet<String>,
    just_pressed: HashSet<String>,
    pointer_clicks: Vec<(f32, f32)>,
    pub pointer_pos: (f32, f32),
    pub dragging: bool,
    drag_delta: (f32, f32),
    pending_resize: Option<(u32, u32)>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process an input event and update state
    pub fn process_event(&mut self, event: &InputEvent) {
        match event {
            InputEvent::KeyDown(key) => {
                let key = normalize_key(key);
                if self.pressed_keys.insert(key.clone()) {
                    self.just_pressed.insert(key);
                }
            }
            InputEvent::KeyUp(key) => {
                self.pressed_keys.remove(normalize_key(key).as_str());
            }
            InputEvent::PointerDown { button, x, y } => {
                match button {
                    MouseButton::Left => self.pointer_clicks.push((*x, *y)),
                    MouseButton::Right => self.dragging = true,
                    MouseButton::Middle => {}
                }
                self.pointer_pos = (*x, *y);
            }
            InputEvent::PointerUp { button } => {
                if *button == MouseButton::Right {
                    self.dragging = false;
                }
            }
            InputEvent::PointerMove { x, y } => {
                if self.dragging {
                    self.drag_delta.0 += x - self.pointer_pos.0;
                    self.drag_delta.1 += y - self.pointer_pos.1;
                }
                self.pointer_pos = (*x, *y);
            }
            InputEvent::Resized { width, height } => {
                self.pending_resize = Some((*width, *height));
            }
            InputEvent::FocusLost | InputEvent::VisibilityChanged { .. } => {
                self.clear_keys();
            }
        }
    }

    pub fn is_key_pressed(&self, key: &str) -> bool {
        self.pressed_keys.contains(key)
    }

    pub fn was_just_pressed(&self, key: &str) -> bool {
        self.just_pressed.contains(key)
    }

    pub fn clear_keys(&mut self) {
        self.pressed_keys.clear();
        self.just_pressed.clear();
        self.dragging = false;
    }

    /// Drop per-tick edges. Called at the end of every stage tick.
    pub fn end_frame(&mut self) {
        self.just_pressed.clear();
        self.pointer_clicks.clear();
    }

    pub fn take_pointer_clicks(&mut self) -> Vec<(f32, f32)> {
        std::mem::take(&mut self.pointer_clicks)
    }

    pub fn consume_drag(&mut self) -> (f32, f32) {
        std::mem::take(&mut self.drag_delta)
    }

    pub fn take_resize(&mut self) -> Option<(u32, u32)> {
        self.pending_resize.take()
    }
}

/// Key mapping configuration. Values are `KeyboardEvent.key` names after
/// [`normalize_key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub forward: String,
    pub backward: String,
    pub left: String,
    pub right: String,
    pub jump: String,
    pub exit: String,
    pub edit_translate: String,
    pub edit_rotate: String,
    pub edit_scale: String,
    pub export: String,
    pub vertical_modifier: String,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            forward: "w".to_string(),
            backward: "s".to_string(),
            left: "a".to_string(),
            right: "d".to_string(),
            jump: " ".to_string(),
            exit: "Escape".to_string(),
            edit_translate: "1".to_string(),
            edit_rotate: "2".to_string(),
            edit_scale: "3".to_string(),
            export: "p".to_string(),
            vertical_modifier: "Shift".to_string(),
        }
    }
}

/// The four directional inputs sampled for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Directions {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
}

impl Directions {
    pub fn any(&self) -> bool {
        self.forward || self.backward || self.left || self.right
    }
}

/// High-level input processor
#[derive(Debug, Clone)]
pub struct InputProcessor {
    bindings: KeyBindings,
}

impl Default for InputProcessor {
    fn default() -> Self {
        Self::new(KeyBindings::default())
    }
}

impl InputProcessor {
    pub fn new(bindings: KeyBindings) -> Self {
        let bindings = KeyBindings {
            forward: normalize_key(&bindings.forward),
            backward: normalize_key(&bindings.backward),
            left: normalize_key(&bindings.left),
            right: normalize_key(&bindings.right),
            jump: normalize_key(&bindings.jump),
            exit: normalize_key(&bindings.exit),
            edit_translate: normalize_key(&bindings.edit_translate),
            edit_rotate: normalize_key(&bindings.edit_rotate),
            edit_scale: normalize_key(&bindings.edit_scale),
            export: normalize_key(&bindings.export),
            vertical_modifier: normalize_key(&bindings.vertical_modifier),
        };
        Self { bindings }
    }

    pub fn bindings(&self) -> &KeyBindings {
        &self.bindings
    }

    pub fn directions(&self, input: &InputState) -> Directions {
        Directions {
            forward: input.is_key_pressed(&self.bindings.forward) || input.is_key_pressed("ArrowUp"),
            backward: input.is_key_pressed(&self.bindings.backward) || input.is_key_pressed("ArrowDown"),
            left: input.is_key_pressed(&self.bindings.left) || input.is_key_pressed("ArrowLeft"),
            right: input.is_key_pressed(&self.bindings.right) || input.is_key_pressed("ArrowRight"),
        }
    }

    pub fn jump_pressed(&self, input: &InputState) -> bool {
        input.was_just_pressed(&self.bindings.jump)
    }

    pub fn exit_pressed(&self, input: &InputState) -> bool {
        input.was_just_pressed(&self.bindings.exit)
    }

    pub fn export_pressed(&self, input: &InputState) -> bool {
        input.was_just_pressed(&self.bindings.export)
    }

    pub fn vertical_held(&self, input: &InputState) -> bool {
        input.is_key_pressed(&self.bindings.vertical_modifier)
    }

    /// Keys whose browser default action (scrolling, focus moves) must be suppressed
    pub fn is_navigation_key(&self, key: &str) -> bool {
        let key = normalize_key(key);
        let b = &self.bindings;
        [&b.forward, &b.backward, &b.left, &b.right, &b.jump].iter().any(|k| **k == key)
            || matches!(key.as_str(), "ArrowUp" | "ArrowDown" | "ArrowLeft" | "ArrowRight")
    }
}

#[cfg(target_arch = "wasm32")]
pub mod wasm {
    use super::*;
    use web_sys::{HtmlCanvasElement, KeyboardEvent, MouseEvent};

    pub fn keyboard_event_to_input(e: &KeyboardEvent, is_down: bool) -> InputEvent {
        let key = e.key();
        if is_down {
            InputEvent::KeyDown(key)
        } else {
            InputEvent::KeyUp(key)
        }
    }

    /// Pointer coordinates relative to the canvas, in canvas pixels
    fn canvas_point(e: &MouseEvent, canvas: &HtmlCanvasElement) -> (f32, f32) {
        let rect = canvas.get_bounding_client_rect();
        let sx = if rect.width() > 0.0 { canvas.width() as f64 / rect.width() } else { 1.0 };
        let sy = if rect.height() > 0.0 { canvas.height() as f64 / rect.height() } else { 1.0 };
        (
            ((e.client_x() as f64 - rect.left()) * sx) as f32,
            ((e.client_y() as f64 - rect.top()) * sy) as f32,
        )
    }

    pub fn mouse_down_to_input(e: &MouseEvent, canvas: &HtmlCanvasElement) -> InputEvent {
        let (x, y) = canvas_point(e, canvas);
        InputEvent::PointerDown {
            button: MouseButton::from_web_button(e.button()),
            x,
            y,
        }
    }

    pub fn mouse_up_to_input(e: &MouseEvent) -> InputEvent {
        InputEvent::PointerUp {
            button: MouseButton::from_web_button(e.button()),
        }
    }

    pub fn mouse_move_to_input(e: &MouseEvent, canvas: &HtmlCanvasElement) -> InputEvent {
        let (x, y) = canvas_point(e, canvas);
        InputEvent::PointerMove { x, y }
    }
}
