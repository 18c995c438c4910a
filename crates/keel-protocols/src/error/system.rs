//! Errors raised by individual systems.

use thiserror::Error;

/// Failure reported by a system factory or initializer.
///
/// These are recovered locally by the dispatcher: the failing system is
/// logged and left out of tick dispatch.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("System construction failed: {0}")]
    ConstructionFailed(String),

    #[error("System initialization failed: {0}")]
    InitializationFailed(String),

    #[error("{0}")]
    Custom(String),
}
