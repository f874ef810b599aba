use thiserror::Error;

use super::HostPtr;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("OpenCL driver not found: {0}")]
    DriverNotFound(String),

    #[error("OpenCL symbol missing: {0}")]
    MissingSymbol(String),

    #[error("no OpenCL device available")]
    NoDevice,

    #[error("{call} failed with code {code}")]
    Call { call: &'static str, code: i32 },

    #[error("kernel `{name}` failed to build:\n{log}")]
    Build { name: String, log: String },

    #[error("invalid or stale backend handle")]
    InvalidHandle,

    #[error("buffer remapped at {actual} instead of {expected}")]
    MappingMoved { expected: HostPtr, actual: HostPtr },
}

impl BackendError {
    pub fn call(call: &'static str, code: i32) -> Self {
        BackendError::Call { call, code }
    }
}
