//! Error hierarchy of the topology view state manager.
//!
//! Only programming errors and configuration failures are surfaced to callers.
//! Listener faults, stale asynchronous callbacks and unexpected dispatcher
//! faults are logged and absorbed where they occur.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller passed something the state machine cannot accept
    /// (e.g. a non-current view where a current one is required)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The async event sender no longer accepts events
    #[error("Async event sender stopped, cannot enqueue more events")]
    DispatcherStopped,

    /// No tokio runtime to host the background event sender
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// Failure reported by a topology event listener
    #[error("Listener failed: {0}")]
    Listener(String),
}
