use crate::backend::BackendError;
use thiserror::Error;

/// Fatal errors from tracer-instance construction.
#[derive(Debug, Error)]
pub enum TracerError {
    /// The fixed cache arena could not be allocated.
    #[error("identity cache arena allocation failed: {0}")]
    ArenaAlloc(#[from] std::collections::TryReserveError),
}

/// Monitor setup failures. All of them latch the monitor permanently
/// Absent; operation continues cache-only.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The build-time signature does not match the running environment.
    #[error("incompatible environment signature: built {built:?}, running {running:?}")]
    IncompatibleSignature {
        /// Signature the library was built against.
        built: String,
        /// Signature of the running environment.
        running: String,
    },

    /// The notification backend could not be probed or subscribed.
    #[error("notification backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, TracerError>;
