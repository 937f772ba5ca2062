//! Error types for the oxidized-runahead frontend

use bitflags::bitflags;
use thiserror::Error;

/// Main error type for the frontend
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Run-ahead error: {0}")]
    RunAhead(#[from] RunAheadError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Content not found: {0}")]
    ContentNotFound(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// Run-ahead failures
///
/// None of these are fatal to the running game. The orchestrator degrades
/// to normal execution and reports each class once per session.
#[derive(Error, Debug)]
pub enum RunAheadError {
    #[error("core does not support save states")]
    ConfigurationUnsupported,

    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    #[error("failed to create secondary instance: {0}")]
    SecondaryProvisionFailure(String),

    #[error("failed to save state")]
    SerializeFailure,

    #[error("failed to load state")]
    DeserializeFailure,
}

/// Dynamic core loading errors
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Failed to open library {path}: {message}")]
    LibraryOpen { path: String, message: String },

    #[error("Missing symbol: {0}")]
    MissingSymbol(String),

    #[error("API version mismatch: expected {expected}, found {found}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    #[error("Invalid content: {0}")]
    InvalidContent(String),
}

bitflags! {
    /// Classes of run-ahead failure, used to warn at most once per class
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FailureClass: u8 {
        const SAVESTATES_UNSUPPORTED = 0x01;
        const ALLOCATION             = 0x02;
        const SECONDARY_INSTANCE     = 0x04;
        const SAVE_STATE             = 0x08;
        const LOAD_STATE             = 0x10;
    }
}

impl RunAheadError {
    /// Notification class this failure belongs to
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::ConfigurationUnsupported => FailureClass::SAVESTATES_UNSUPPORTED,
            Self::AllocationFailure(_) => FailureClass::ALLOCATION,
            Self::SecondaryProvisionFailure(_) => FailureClass::SECONDARY_INSTANCE,
            Self::SerializeFailure => FailureClass::SAVE_STATE,
            Self::DeserializeFailure => FailureClass::LOAD_STATE,
        }
    }

    /// Message shown to the user when this failure is surfaced
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ConfigurationUnsupported => {
                "Run-Ahead has been disabled because this core does not support save states."
            }
            Self::AllocationFailure(_) => {
                "Run-Ahead has been disabled because the save state buffer could not be allocated."
            }
            Self::SecondaryProvisionFailure(_) => {
                "Failed to create a second instance. Run-Ahead will now use only one instance."
            }
            Self::SerializeFailure => "Failed to save state. Run-Ahead has been disabled.",
            Self::DeserializeFailure => "Failed to load state. Run-Ahead has been disabled.",
        }
    }
}

/// Result type alias for frontend operations
pub type Result<T> = std::result::Result<T, EmulatorError>;
