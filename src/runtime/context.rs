use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;

use crate::backend::{BackendError, OpenClBackend};
use crate::config::get_shim_config;

use super::logging::init_logging;

static BACKEND: OnceCell<Arc<OpenClBackend>> = OnceCell::new();

/// Context and default queue shared by every legacy entry point. Created on
/// first use; concurrent first callers block until one of them finishes. A
/// failed attempt is not cached, so the next call retries.
pub fn global_backend() -> Result<&'static Arc<OpenClBackend>, BackendError> {
    BACKEND.get_or_try_init(|| {
        init_logging();
        info!(target: "clbridge", "initialize cl context");
        OpenClBackend::new(get_shim_config()).map(Arc::new)
    })
}

pub fn assure_initialized() -> Result<(), BackendError> {
    global_backend().map(|_| ())
}

pub fn is_initialized() -> bool {
    BACKEND.get().is_some()
}
