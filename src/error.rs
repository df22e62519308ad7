//! Error taxonomy shared by every subsystem.
//!
//! `Corrupt` deliberately has no variant here: slab header magic mismatches
//! are logged and handled as silent no-ops in the free path (see
//! [`crate::slab`]), never surfaced to callers.

use thiserror::Error;

/// Unified result type for the core.
pub type Result<T> = core::result::Result<T, NumaError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NumaError {
    #[error("key not found")]
    NotFound,

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("slot already occupied")]
    Exists,

    #[error("out of memory")]
    OutOfMemory,

    #[error("no migration adapter for this value encoding")]
    UnsupportedKind,
}

impl NumaError {
    /// Short, user-facing string for the administrative command surface.
    pub fn as_user_message(&self) -> String {
        match self {
            NumaError::NotFound => "Key not found".to_string(),
            NumaError::Invalid(msg) => format!("Invalid argument: {msg}"),
            NumaError::Exists => "Already exists".to_string(),
            NumaError::OutOfMemory => "Out of memory".to_string(),
            NumaError::UnsupportedKind => "Unsupported value encoding".to_string(),
        }
    }
}
