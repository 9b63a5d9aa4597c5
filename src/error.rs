use thiserror::Error;

pub type Result<T> = std::result::Result<T, StageError>;

/// Everything that can go wrong between "enter stage" and "return to narrative".
///
/// None of these are fatal to the host process. The loader and the bridge decide
/// whether a variant degrades a single placement or aborts the stage entry.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage `{0}` is not defined in the asset registry")]
    UnknownStage(String),

    #[error("model `{0}` is not defined in the asset registry")]
    UnknownModel(String),

    #[error("failed to import model `{model_key}`: {reason}")]
    Import { model_key: String, reason: String },

    #[error("object `{name}` cannot be made collidable: {reason}")]
    Geometry { name: String, reason: String },

    #[error("3D engines did not become available after {attempts} attempts")]
    EnginesUnavailable { attempts: u32 },

    #[error("stage loading was cancelled")]
    Cancelled,

    #[error("renderer error: {0}")]
    Renderer(String),

    #[error("host error: {0}")]
    Host(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StageError {
    pub fn import(model_key: impl Into<String>, reason: impl ToString) -> Self {
        StageError::Import {
            model_key: model_key.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error should be reported back to the narrative engine.
    /// A cancelled load was requested by the caller, so there is nothing to report.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, StageError::Cancelled)
    }
}

#[cfg(target_arch = "wasm32")]
impl From<wasm_bindgen::JsValue> for StageError {
    fn from(value: wasm_bindgen::JsValue) -> Self {
        StageError::Host(format!("{value:?}"))
    }
}
