use thiserror::Error;

/// Typed failures of the control engine.
///
/// Sampling, actuation and timeout errors are soft: the tick is skipped and
/// the previous command stays in force. `ConfigInvalid` and `FailSafe` end
/// the process. An overheat is not an error; see `SafetyState`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("sampling unavailable: {0}")]
    SamplingUnavailable(String),
    #[error("actuation failed: {0}")]
    ActuationFailed(String),
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),
    #[error("timeout waiting for BMC")]
    Timeout,
    #[error("notification failed: {0}")]
    NotificationFailed(String),
    #[error("fail-safe engaged: {0}")]
    FailSafe(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
