//! 3D exploration stages for a visual-novel engine.
//!
//! The narrative layer enters a stage through [`StageBridge::initialize`]; the bridge
//! swaps the 2D surface for the 3D viewport, loads the stage's models into a scene
//! graph and a rapier world, and drives a physics-backed character until the exit key
//! sends [`StageEvent::ReturnToNarrative`].

pub mod bridge;
pub mod config;
pub mod error;
pub mod host;
pub mod loader;
pub mod logging;
pub mod ui;

// MVC Architecture
pub mod controller;
pub mod model;
pub mod view;

pub use bridge::{BridgePhase, StageBridge, StageEvent, StageParams, StageSignals};
pub use config::StageConfig;
pub use error::{Result, StageError};
#[cfg(target_arch = "wasm32")]
pub use host::web::{WebHost, WebStage};
pub use host::StageHost;
pub use loader::{GltfImporter, ModelImporter, StageLoader};

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    logging::init();
}
