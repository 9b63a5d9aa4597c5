//! Hand-off between the narrative layer and the 3D stage.
//!
//! The bridge waits for the 3D runtimes, swaps the visible surface, builds the stage
//! runtime and registers its per-frame callback with the host. Everything it shares
//! with that callback lives behind `Rc`, so `shutdown` can run at any point, including
//! from inside the callback when the exit key is pressed.

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use crate::config::StageConfig;
use crate::controller::{InputProcessor, InputState, PhysicsWorld, RuntimeParts, StageRuntime};
use crate::error::{Result, StageError};
use crate::host::{FrameCallback, StageHost};
use crate::loader::{CancelToken, ModelImporter, StageLoader};
use crate::model::{AssetRegistry, BridgeId, SceneGraph, SharedSelection};

/// Value of the `from` field of every return event
pub const STAGE_ORIGIN: &str = "VoxelScene";

/// Upper bound for a single frame delta, in seconds
const MAX_FRAME_DT: f32 = 0.25;

/// What the narrative engine passes when it enters a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageParams {
    pub stage_key: String,
    #[serde(default)]
    pub return_to: Option<String>,
    #[serde(default)]
    pub debug: bool,
}

impl StageParams {
    pub fn new(stage_key: &str) -> Self {
        Self {
            stage_key: stage_key.to_string(),
            return_to: None,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StageEvent {
    SceneReady {
        stage_key: String,
    },
    ReturnToNarrative {
        from: String,
        stage_key: String,
        return_to: Option<String>,
        error: Option<String>,
    },
    SnapshotExported {
        stage_key: String,
        json: String,
    },
}

impl StageEvent {
    fn return_to_narrative(params: &StageParams, error: Option<String>) -> Self {
        StageEvent::ReturnToNarrative {
            from: STAGE_ORIGIN.to_string(),
            stage_key: params.stage_key.clone(),
            return_to: params.return_to.clone(),
            error,
        }
    }
}

/// Outgoing lifecycle events, drained by the host
#[derive(Debug, Clone, Default)]
pub struct StageSignals {
    queue: Rc<RefCell<VecDeque<StageEvent>>>,
}

impl StageSignals {
    pub fn emit(&self, event: StageEvent) {
        info!(?event, "stage signal");
        self.queue.borrow_mut().push_back(event);
    }

    pub fn drain(&self) -> Vec<StageEvent> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Idle,
    WaitingForEngines,
    Loading,
    Running,
    Closed,
}

impl BridgePhase {
    fn is_active(self) -> bool {
        !matches!(self, BridgePhase::Idle | BridgePhase::Closed)
    }
}

/// Handles needed to tear a session down, shared with the frame callback
struct Teardown<H: StageHost> {
    host: Rc<H>,
    runtime: Rc<RefCell<Option<StageRuntime>>>,
    input: Rc<RefCell<InputState>>,
    selection: SharedSelection,
    owner: BridgeId,
    phase: Rc<Cell<BridgePhase>>,
    cancel: CancelToken,
}

impl<H: StageHost> Teardown<H> {
    fn run(&self) {
        self.cancel.cancel();
        if !self.phase.get().is_active() {
            return;
        }
        self.phase.set(BridgePhase::Closed);

        self.host.stop_render_loop();
        match self.runtime.try_borrow_mut() {
            Ok(mut slot) => {
                if let Some(mut runtime) = slot.take() {
                    runtime.dispose();
                }
            }
            Err(_) => warn!("stage runtime busy during shutdown, leaving it to be dropped later"),
        }
        self.host.detach_input();
        if let Ok(mut input) = self.input.try_borrow_mut() {
            input.clear_keys();
        }
        self.host.set_viewport_visible(false);
        self.selection.release(self.owner);
        info!("stage shut down");
    }
}

pub struct StageBridge<H: StageHost, I: ModelImporter> {
    host: Rc<H>,
    importer: I,
    registry: Rc<AssetRegistry>,
    config: StageConfig,
    selection: SharedSelection,
    id: BridgeId,
    signals: StageSignals,
    input: Rc<RefCell<InputState>>,
    runtime: Rc<RefCell<Option<StageRuntime>>>,
    phase: Rc<Cell<BridgePhase>>,
    cancel: RefCell<CancelToken>,
}

impl<H: StageHost + 'static, I: ModelImporter> StageBridge<H, I> {
    pub fn new(
        host: Rc<H>,
        importer: I,
        registry: Rc<AssetRegistry>,
        config: StageConfig,
        selection: SharedSelection,
    ) -> Self {
        let id = selection.register();
        Self {
            host,
            importer,
            registry,
            config,
            selection,
            id,
            signals: StageSignals::default(),
            input: Rc::new(RefCell::new(InputState::new())),
            runtime: Rc::new(RefCell::new(None)),
            phase: Rc::new(Cell::new(BridgePhase::Idle)),
            cancel: RefCell::new(CancelToken::new()),
        }
    }

    pub fn id(&self) -> BridgeId {
        self.id
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase.get()
    }

    pub fn signals(&self) -> StageSignals {
        self.signals.clone()
    }

    pub fn input(&self) -> Rc<RefCell<InputState>> {
        self.input.clone()
    }

    /// Token of the current session. Cancelling it stops a load in progress.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.borrow().clone()
    }

    /// Run `f` against the live runtime, if any
    pub fn with_runtime<R>(&self, f: impl FnOnce(&mut StageRuntime) -> R) -> Option<R> {
        let mut slot = self.runtime.try_borrow_mut().ok()?;
        slot.as_mut().map(f)
    }

    /// Enter a stage. Resolves once the stage is running or has failed; a failure has
    /// already been reported through [`StageEvent::ReturnToNarrative`] (unless cancelled)
    /// and the 2D surface restored.
    pub async fn initialize(&self, params: StageParams) -> Result<()> {
        if self.phase.get().is_active() {
            self.shutdown();
        }
        let cancel = CancelToken::new();
        *self.cancel.borrow_mut() = cancel.clone();
        self.phase.set(BridgePhase::WaitingForEngines);
        info!(stage_key = %params.stage_key, debug = params.debug, "entering stage");

        let entered = match self.wait_for_engines(&cancel).await {
            Ok(()) => self.enter(&params, &cancel).await,
            Err(e) => Err(e),
        };
        entered.map_err(|e| self.fail(&params, &cancel, e))
    }

    /// Readiness gate: poll at a fixed interval, give up after `max_attempts` polls
    async fn wait_for_engines(&self, cancel: &CancelToken) -> Result<()> {
        let interval = self.config.readiness.retry_interval();
        let max_attempts = self.config.readiness.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            if self.host.engines_available() {
                debug!(attempt, "3D engines available");
                return Ok(());
            }
            if attempt < max_attempts {
                self.host.sleep(interval).await;
            }
        }
        Err(StageError::EnginesUnavailable { attempts: max_attempts })
    }

    async fn enter(&self, params: &StageParams, cancel: &CancelToken) -> Result<()> {
        self.registry.stage(&params.stage_key)?;

        self.host.set_viewport_visible(true);
        let renderer = self.host.create_renderer().await?;
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        self.phase.set(BridgePhase::Loading);
        let mut scene = SceneGraph::new();
        let mut physics = PhysicsWorld::new(&self.config.physics);
        let loaded = StageLoader::new(&self.registry, &self.importer, &self.config.controller)
            .load(&params.stage_key, &mut scene, &mut physics, cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let runtime = StageRuntime::new(RuntimeParts {
            config: self.config.clone(),
            loaded,
            scene,
            physics,
            renderer,
            input: self.input.clone(),
            selection: self.selection.clone(),
            owner: self.id,
            viewport: self.host.viewport_size(),
            debug: params.debug,
        });

        self.input.borrow_mut().clear_keys();
        self.host
            .attach_input(self.input.clone(), &InputProcessor::new(self.config.bindings.clone()))?;
        self.selection.claim_foreground(self.id);
        *self.runtime.borrow_mut() = Some(runtime);
        self.phase.set(BridgePhase::Running);

        self.signals.emit(StageEvent::SceneReady {
            stage_key: params.stage_key.clone(),
        });
        self.host.start_render_loop(self.frame_callback(params, cancel));
        Ok(())
    }

    /// Report a failed entry and restore the 2D surface. A session that was replaced
    /// by a newer `initialize` leaves the bridge alone.
    fn fail(&self, params: &StageParams, cancel: &CancelToken, error: StageError) -> StageError {
        if !cancel.same_as(&self.cancel.borrow()) {
            debug!(stage_key = %params.stage_key, "stale stage session finished: {error}");
            return error;
        }
        if error.is_reportable() {
            error!(stage_key = %params.stage_key, "stage entry failed: {error}");
            self.signals
                .emit(StageEvent::return_to_narrative(params, Some(error.to_string())));
        } else {
            info!(stage_key = %params.stage_key, "stage entry cancelled");
        }
        self.teardown(cancel.clone()).run();
        error
    }

    fn frame_callback(&self, params: &StageParams, cancel: &CancelToken) -> FrameCallback {
        let runtime = self.runtime.clone();
        let phase = self.phase.clone();
        let signals = self.signals.clone();
        let teardown = self.teardown(cancel.clone());
        let params = params.clone();
        let mut last_ms: Option<f64> = None;

        Box::new(move |now_ms: f64| {
            if phase.get() != BridgePhase::Running {
                return;
            }
            let dt = last_ms
                .map(|last| ((now_ms - last) / 1000.0) as f32)
                .unwrap_or(1.0 / 60.0)
                .clamp(0.0, MAX_FRAME_DT);
            last_ms = Some(now_ms);

            let outcome = {
                let Ok(mut slot) = runtime.try_borrow_mut() else {
                    return;
                };
                let Some(rt) = slot.as_mut() else {
                    return;
                };
                rt.tick(dt)
            };

            match outcome {
                Ok(report) => {
                    if let Some(json) = report.snapshot {
                        signals.emit(StageEvent::SnapshotExported {
                            stage_key: params.stage_key.clone(),
                            json,
                        });
                    }
                    if report.exit_requested {
                        signals.emit(StageEvent::return_to_narrative(&params, None));
                        teardown.run();
                    }
                }
                Err(e) => error!(stage_key = %params.stage_key, "stage frame failed: {e}"),
            }
        })
    }

    /// Forward a viewport size change to the renderer and camera
    pub fn resize(&self, width: u32, height: u32) {
        self.with_runtime(|rt| rt.resize(width, height));
    }

    /// Stop the render loop, dispose the stage and give the screen back to the 2D layer.
    /// Safe to call repeatedly and at any phase, including during `initialize`.
    pub fn shutdown(&self) {
        let cancel = self.cancel_token();
        self.teardown(cancel).run();
    }
}

impl<H: StageHost, I: ModelImporter> StageBridge<H, I> {
    fn teardown(&self, cancel: CancelToken) -> Teardown<H> {
        Teardown {
            host: self.host.clone(),
            runtime: self.runtime.clone(),
            input: self.input.clone(),
            selection: self.selection.clone(),
            owner: self.id,
            phase: self.phase.clone(),
            cancel,
        }
    }
}

impl<H: StageHost, I: ModelImporter> Drop for StageBridge<H, I> {
    fn drop(&mut self) {
        let cancel = self.cancel.borrow().clone();
        self.teardown(cancel).run();
    }
}
