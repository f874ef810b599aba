use std::sync::Once;

use tracing_subscriber::EnvFilter;

pub const ENV_LOG: &str = "CLBRIDGE_LOG";

static LOGGING: Once = Once::new();

/// Installs the stderr subscriber once. Filter directives come from
/// `CLBRIDGE_LOG` (default `warn`). A subscriber installed by the host
/// application takes precedence.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init();
    });
}
