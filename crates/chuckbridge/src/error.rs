//! Error types for the chuckbridge crate.

use thiserror::Error;

use crate::config::Param;
use crate::engine::GlobalKind;

/// Errors reported by the bridge.
///
/// Compile failures are not errors: `compile` reports them through
/// [`CompileResult`](crate::CompileResult) and `replace` through the zero
/// [`ShredId`](crate::ShredId).
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A configuration value is outside its domain, or the engine refused it
    /// while staging.
    #[error("Invalid value for {param}: {reason}")]
    Config { param: Param, reason: String },

    /// The engine's own initialization reported failure.
    #[error("Engine initialization failed")]
    InitFailed,

    /// A render, lifecycle or bridge call was made before `init()` succeeded.
    #[error("Engine is not initialized")]
    EngineNotReady,

    /// A one-shot global read was not resolved within its frame budget.
    #[error(
        "Global '{name}' was not resolved within {frames} frames; retry with a larger frame budget"
    )]
    CallbackTimeout { name: String, frames: usize },

    /// A global resolved with a different kind than the one requested.
    #[error("Global '{name}' resolved as {found}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: GlobalKind,
        found: GlobalKind,
    },

    /// A caller-supplied argument was rejected before reaching the engine.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The realtime driver thread panicked; the bridge it owned is gone.
    #[error("Realtime driver thread panicked")]
    DriverPanicked,
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
