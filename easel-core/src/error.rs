use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Coarse failure category reported alongside a failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureCategory {
    ValidationError,
    UnknownModelError,
    LoadError,
    GenerationError,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ValidationError => "ValidationError",
            Self::UnknownModelError => "UnknownModelError",
            Self::LoadError => "LoadError",
            Self::GenerationError => "GenerationError",
        };
        f.write_str(name)
    }
}

/// Errors crossing the engine boundary. Always carried as data, never raised
/// past the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Failed to load model: {0}")]
    Load(String),

    #[error("Image generation failed: {0}")]
    Generation(String),
}

impl EngineError {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Validation(_) => FailureCategory::ValidationError,
            Self::UnknownModel(_) => FailureCategory::UnknownModelError,
            Self::Load(_) => FailureCategory::LoadError,
            Self::Generation(_) => FailureCategory::GenerationError,
        }
    }

    /// The underlying cause without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(message)
            | Self::UnknownModel(message)
            | Self::Load(message)
            | Self::Generation(message) => message,
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BridgeError {
    #[error("A generation is already in flight")]
    Busy,

    #[error("Generation engine was lost after a worker failure")]
    EngineLost,
}
