use std::sync::OnceLock;

pub mod shim_config;

pub use shim_config::{DevicePreference, ShimConfig};

static SHIM_CONFIG: OnceLock<ShimConfig> = OnceLock::new();

/// Process-wide configuration, read from the environment on first access.
pub fn get_shim_config() -> &'static ShimConfig {
    SHIM_CONFIG.get_or_init(ShimConfig::from_env)
}
