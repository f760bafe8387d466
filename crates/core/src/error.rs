use std::path::PathBuf;

use thiserror::Error;

use crate::types::Rect;

/// Display inaccessible, region invalid, or a capture could not be persisted.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no display attached")]
    NoDisplay,
    #[error("screen capture denied: {0}")]
    AccessDenied(String),
    #[error("capture region {0:?} lies outside the display")]
    EmptyRegion(Rect),
    #[error("unsupported screenshot format for {0} (use .png or .bmp)")]
    UnsupportedFormat(PathBuf),
    #[error("image encoding failed: {0}")]
    Encode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("capture backend: {0}")]
    Backend(String),
}

impl CaptureError {
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::NoDisplay => "no_display",
            CaptureError::AccessDenied(_) => "access_denied",
            CaptureError::EmptyRegion(_) => "empty_region",
            CaptureError::UnsupportedFormat(_) => "unsupported_format",
            CaptureError::Encode(_) => "encode",
            CaptureError::Io(_) => "io",
            CaptureError::Backend(_) => "backend",
        }
    }
}

/// An input-injection or process primitive failed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid key name '{0}'")]
    InvalidKey(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("unknown action kind '{0}'")]
    UnknownActionKind(String),
    #[error("application path does not exist: {0}")]
    MissingPath(PathBuf),
    #[error("no process matching '{0}'")]
    ProcessNotFound(String),
    #[error("fail-safe triggered")]
    Failsafe,
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("input backend: {0}")]
    Backend(String),
}

impl ExecutionError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::InvalidKey(_) => "invalid_key",
            ExecutionError::InvalidParameters(_) => "invalid_parameters",
            ExecutionError::UnknownActionKind(_) => "unknown_action_kind",
            ExecutionError::MissingPath(_) => "missing_path",
            ExecutionError::ProcessNotFound(_) => "process_not_found",
            ExecutionError::Failsafe => "failsafe",
            ExecutionError::Spawn { .. } => "spawn",
            ExecutionError::Backend(_) => "backend",
        }
    }
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("model not loaded")]
    ModelUnavailable,
    #[error("model load failed: {0}")]
    LoadFailed(String),
    #[error("model failed: {0}")]
    Model(String),
    #[error("model returned invalid output: {0}")]
    InvalidOutput(String),
}

impl DecisionError {
    pub fn code(&self) -> &'static str {
        match self {
            DecisionError::ModelUnavailable => "model_unavailable",
            DecisionError::LoadFailed(_) => "load_failed",
            DecisionError::Model(_) => "model",
            DecisionError::InvalidOutput(_) => "invalid_output",
        }
    }
}
