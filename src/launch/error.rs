use thiserror::Error;

use super::LaunchState;
use crate::backend::{BackendError, HostPtr};

#[derive(Debug, Error)]
pub enum ShimError {
    #[error("{operation} called while {state}")]
    PreconditionViolation { operation: &'static str, state: LaunchState },

    #[error("not implemented: {0}")]
    UnsupportedFeature(String),

    #[error("kernel `{name}` failed to compile:\n{log}")]
    CompileError { name: String, log: String },

    #[error("host pointer {0} is not registered")]
    UnknownPointer(HostPtr),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid launch geometry: {0}")]
    InvalidGeometry(String),

    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for ShimError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Build { name, log } => ShimError::CompileError { name, log },
            other => ShimError::Backend(other),
        }
    }
}
