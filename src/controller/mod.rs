// CONTROLLER: Input, character control, physics and the per-frame update
pub mod camera_controller;
pub mod character;
pub mod editor;
pub mod frame_loop;
pub mod input;
pub mod physics;

pub use camera_controller::FollowCamera;
pub use character::{CharacterController, CharacterFrame, LocomotionState, PlayerHandle};
pub use editor::{EditMode, SceneEditor};
pub use frame_loop::{RuntimeParts, StageRuntime, TickReport};
pub use input::{InputEvent, InputProcessor, InputState, KeyBindings};
pub use physics::PhysicsWorld;
