pub mod context;
pub mod logging;

pub use context::{assure_initialized, global_backend, is_initialized};
pub use logging::init_logging;
