use crate::server_manager::ServiceMode;
use thiserror::Error;

/// Error kinds surfaced by the orchestration core.
///
/// `StateConflict` and `Validation` indicate caller logic errors and are
/// never retried. `Transport` covers unreachable services and non-success
/// protocol responses. `NotFound` covers references to networks or devices
/// that do not exist.
#[derive(Debug, Error)]
pub enum Error {
    #[error("operation not allowed while server mode is {0}")]
    StateConflict(ServiceMode),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl From<zbus::Error> for Error {
    fn from(e: zbus::Error) -> Self {
        Error::Transport(format!("network management service: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
